//! End-to-end behavior of the round loop against the bundled stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use saga_core::adapters::{CharacterValidator, StructuredGenerator};
use saga_core::model::{
    AgentAction, Anchor, ConstraintType, NarrativeEvent, SceneContext, SimulationLogEntry,
};
use saga_core::store::{ActRecord, ChapterRecord, SceneEntityIndex};
use saga_core::{
    AgentDecider, CharacterValidation, HaltReason, JsonlStore, MemoryStore, PlainRenderer,
    SagaConfig, SagaError, ScriptedAgent, SimulationEngine, SimulationStore,
};

fn config(max_rounds: u32) -> SagaConfig {
    let mut config = SagaConfig::default();
    config.simulation.max_rounds = max_rounds;
    config
}

fn engine(store: Arc<dyn SimulationStore>, max_rounds: u32) -> SimulationEngine {
    SimulationEngine::new(config(max_rounds), store)
        .unwrap()
        .with_renderer(Arc::new(PlainRenderer))
}

fn scene(value: serde_json::Value) -> SceneContext {
    SceneContext::from_value(value).unwrap()
}

fn scripted(id: &str, script: Vec<AgentAction>) -> Arc<dyn AgentDecider> {
    Arc::new(ScriptedAgent::new(id, script))
}

#[tokio::test]
async fn zero_agents_one_round() {
    let store = Arc::new(MemoryStore::new());
    let e = engine(store.clone(), 1);
    let mut s = scene(json!({"scene_id": "s1", "scene_version_id": "v1"}));

    let run = e.simulate_scene(&mut s, &[]).await.unwrap();
    assert_eq!(run.rounds.len(), 1);
    assert!(run.rounds[0].agent_actions.is_empty());
    assert!(run.rounds[0].dm_arbitration.action_results.is_empty());
    assert_eq!(run.halt, HaltReason::MaxRounds);

    let rendered = e.run_scene(&mut scene(json!({"scene_id": "s2"})), &[]).await.unwrap();
    assert!(rendered.starts_with("# s2"));
}

#[tokio::test]
async fn consecutive_rounds_get_increasing_log_ids() {
    let store = Arc::new(MemoryStore::new());
    let e = engine(store.clone(), 2);
    let mut s = scene(json!({"scene_id": "s1", "scene_version_id": "v1"}));
    let agents = vec![scripted(
        "alice",
        vec![
            AgentAction::new("alice", "investigate", "vault"),
            AgentAction::new("alice", "negotiate", "guard"),
        ],
    )];

    e.simulate_scene(&mut s, &agents).await.unwrap();

    let logs = store.list_simulation_logs("s1").await.unwrap();
    let ids: Vec<&str> = logs.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["sim:s1:round:1", "sim:s1:round:2"]);
    assert!(logs.windows(2).all(|w| w[0].round_number < w[1].round_number));
    assert!(logs.iter().all(|l| l.scene_version_id == "v1"));
}

#[tokio::test]
async fn every_round_has_one_result_per_action() {
    let store = Arc::new(MemoryStore::new());
    let e = engine(store, 3);
    let mut s = scene(json!({
        "scene_id": "s1",
        "world_state": {"power_levels": {"alice": 2, "bob": 2}}
    }));
    let agents = vec![
        scripted("alice", vec![AgentAction::new("alice", "attack", "bob")]),
        scripted("bob", vec![AgentAction::new("bob", "attack", "alice")]),
        scripted("carol", vec![AgentAction::wait("carol")]),
    ];

    let run = e.simulate_scene(&mut s, &agents).await.unwrap();
    for round in &run.rounds {
        assert_eq!(round.dm_arbitration.action_results.len(), round.agent_actions.len());
        assert_eq!(round.dm_arbitration.conflicts_resolved.len(), 1);
    }
}

#[tokio::test]
async fn hard_anchor_out_of_reach_halts_the_scene() {
    let store = Arc::new(MemoryStore::new());
    let e = engine(store.clone(), 2);
    let anchor = Anchor::new("a1", ConstraintType::Hard, vec!["cond".into()]);
    let mut s = scene(json!({
        "scene_id": "s1",
        "scene_version_id": "v1",
        "world_state": {},
        "next_anchor": anchor
    }));
    let agents = vec![scripted("alice", vec![AgentAction::wait("alice")])];

    let run = e.simulate_scene(&mut s, &agents).await.unwrap();
    assert_eq!(run.halt, HaltReason::AnchorUnreachable);
    assert_eq!(run.rounds.len(), 1);
    assert_eq!(run.replans.len(), 1);
    assert!(!run.replans[0].success);
    assert_eq!(run.replans[0].reason(), "hard_anchor_unreachable");
    assert!(run.rounds[0].narrative_events.contains(&NarrativeEvent::ReplanFailed {
        reason: "hard_anchor_unreachable".into()
    }));
    // the failing round is still logged
    assert_eq!(store.log_count().unwrap(), 1);
}

#[tokio::test]
async fn recoverable_gap_bridges_and_invalidates_future_scenes() {
    let store = Arc::new(MemoryStore::new());
    let mut anchor = Anchor::new(
        "a1",
        ConstraintType::Hard,
        vec!["investigate:vault".into(), "a".into(), "b".into()],
    );
    anchor.root_id = Some("root".into());
    anchor.branch_id = Some("main".into());
    store.add_anchor(anchor).unwrap();
    store
        .set_scene_entities(
            "root",
            "main",
            SceneEntityIndex {
                scene_entities: [
                    ("s0".to_string(), vec!["vault".to_string()]),
                    ("s3".to_string(), vec!["vault".to_string()]),
                    ("s4".to_string(), vec!["guard".to_string()]),
                ]
                .into_iter()
                .collect(),
                scene_sequences: [("s0".to_string(), 0), ("s3".to_string(), 3), ("s4".to_string(), 4)]
                    .into_iter()
                    .collect(),
            },
        )
        .unwrap();

    let mut config = config(1);
    config.simulation.convergence_threshold = 0.5;
    config.simulation.replan_distance = 0.5;
    let cache = Arc::new(saga_core::DependencyMatrixCache::new());
    let e = SimulationEngine::new(config, store.clone())
        .unwrap()
        .with_matrix_cache(Arc::clone(&cache));

    let mut s = scene(json!({
        "scene_id": "s1",
        "scene_version_id": "v1",
        "scene_seq": 1,
        "root_id": "root",
        "branch_id": "main",
        "world_state": {}
    }));
    let agents = vec![scripted("alice", vec![AgentAction::new("alice", "investigate", "vault")])];

    let run = e.simulate_scene(&mut s, &agents).await.unwrap();
    assert_eq!(run.replans.len(), 1);
    let replan = &run.replans[0];
    assert!(replan.success);
    assert_eq!(replan.reason(), "recoverable");
    assert_eq!(replan.new_chapters.len(), 2);
    assert_eq!(replan.invalidated_scenes, vec!["s3"]);

    let acts: Vec<ActRecord> = store.list_acts("root").await.unwrap();
    let chapters: Vec<ChapterRecord> = store.list_chapters(&acts[0].id).await.unwrap();
    assert_eq!(chapters.len(), 2);
    // new chapters change the branch, so its matrix must be rebuilt next time
    assert!(!cache.is_cached("root", "main"));
}

#[tokio::test]
async fn stagnation_ceiling_triggers_replan_below_replan_distance() {
    let mut config = config(5);
    config.simulation.stagnation_ceiling = 2;
    config.simulation.convergence_threshold = 0.4;
    config.simulation.safety_margin_rounds = 10;
    // distance never exceeds 1.0, so only stagnation can trigger a replan
    config.simulation.replan_distance = 1.0;
    let e = SimulationEngine::new(config, Arc::new(MemoryStore::new())).unwrap();

    let anchor = Anchor::new("a1", ConstraintType::Hard, vec!["a".into(), "b".into()]);
    let mut s = scene(json!({
        "scene_id": "s1",
        "scene_version_id": "v1",
        "world_state": {"a": true},
        "next_anchor": anchor
    }));
    let agents = vec![scripted("alice", vec![AgentAction::wait("alice")])];

    let run = e.simulate_scene(&mut s, &agents).await.unwrap();
    let replanned = |i: usize| {
        run.rounds[i]
            .narrative_events
            .iter()
            .any(|ev| matches!(ev, NarrativeEvent::ReplanRoute { .. }))
    };
    assert!(!replanned(0));
    assert!(replanned(1));
    assert_eq!(run.rounds[0].stagnation_count, 1);
    assert_eq!(run.rounds[1].stagnation_count, 0);
    assert_eq!(run.replans.len(), 2);
    assert!(run.replans.iter().all(|r| r.success && r.reason() == "recoverable"));
    assert_eq!(run.halt, HaltReason::MaxRounds);
}

#[tokio::test]
async fn falling_drama_forces_escalation() {
    let store = Arc::new(MemoryStore::new());
    let e = engine(store, 3);
    let mut s = scene(json!({"scene_id": "s1", "scene_version_id": "v1"}));
    let agents = vec![
        scripted(
            "alice",
            vec![
                AgentAction::new("alice", "attack", "bob"),
                AgentAction::new("alice", "attack", "bob"),
                AgentAction::new("alice", "investigate", "door"),
            ],
        ),
        scripted(
            "bob",
            vec![
                AgentAction::new("bob", "attack", "alice"),
                AgentAction::new("bob", "attack", "alice"),
                AgentAction::new("bob", "investigate", "ledger"),
            ],
        ),
        scripted(
            "carol",
            vec![
                AgentAction::new("carol", "attack", "dave"),
                AgentAction::new("carol", "investigate", "vault"),
                AgentAction::new("carol", "investigate", "well"),
            ],
        ),
        scripted(
            "dave",
            vec![
                AgentAction::new("dave", "attack", "carol"),
                AgentAction::new("dave", "investigate", "map"),
                AgentAction::new("dave", "investigate", "tower"),
            ],
        ),
    ];

    let run = e.simulate_scene(&mut s, &agents).await.unwrap();
    let drama: Vec<f64> = run.rounds.iter().map(|r| r.drama_score).collect();
    assert_eq!(drama, vec![0.5, 0.25, 0.0]);
    assert!(run.rounds[2]
        .narrative_events
        .iter()
        .any(|ev| matches!(ev, NarrativeEvent::ForceEscalation { .. })));
    // a scene without escalation starts from zero
    assert!((s.conflict_escalation() - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn malformed_injection_targets_are_rejected() {
    let err = saga_core::kernel::inject_breaking_incident(&mut scene(json!({}))).unwrap_err();
    assert_eq!(err.to_string(), "scene_context.events is required");
    let err = saga_core::kernel::inject_breaking_incident(&mut scene(json!({"events": "boom"})))
        .unwrap_err();
    assert_eq!(err.to_string(), "scene_context.events must be a list");
}

struct Unreachable;

#[async_trait]
impl SimulationStore for Unreachable {
    async fn create_simulation_log(
        &self,
        _entry: SimulationLogEntry,
    ) -> saga_core::Result<SimulationLogEntry> {
        Err(SagaError::StorageUnavailable("connection refused".into()))
    }

    async fn list_simulation_logs(&self, _scene_id: &str) -> saga_core::Result<Vec<SimulationLogEntry>> {
        Err(SagaError::StorageUnavailable("connection refused".into()))
    }

    async fn create_act(
        &self,
        _root_id: &str,
        _seq: u32,
        _title: &str,
        _purpose: &str,
        _tone: &str,
    ) -> saga_core::Result<ActRecord> {
        Err(SagaError::StorageUnavailable("connection refused".into()))
    }

    async fn list_acts(&self, _root_id: &str) -> saga_core::Result<Vec<ActRecord>> {
        Err(SagaError::StorageUnavailable("connection refused".into()))
    }

    async fn create_chapter(
        &self,
        _act_id: &str,
        _seq: u32,
        _title: &str,
        _focus: &str,
    ) -> saga_core::Result<ChapterRecord> {
        Err(SagaError::StorageUnavailable("connection refused".into()))
    }

    async fn list_chapters(&self, _act_id: &str) -> saga_core::Result<Vec<ChapterRecord>> {
        Err(SagaError::StorageUnavailable("connection refused".into()))
    }

    async fn mark_anchor_achieved(
        &self,
        _anchor_id: &str,
        _scene_version_id: &str,
    ) -> saga_core::Result<Anchor> {
        Err(SagaError::StorageUnavailable("connection refused".into()))
    }

    async fn next_unachieved_anchor(
        &self,
        _root_id: &str,
        _branch_id: &str,
    ) -> saga_core::Result<Option<Anchor>> {
        Err(SagaError::StorageUnavailable("connection refused".into()))
    }

    async fn scene_entities(&self, _root_id: &str, _branch_id: &str) -> saga_core::Result<SceneEntityIndex> {
        Err(SagaError::StorageUnavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn storage_outage_surfaces_to_caller() {
    let e = engine(Arc::new(Unreachable), 1);
    let mut s = scene(json!({"scene_id": "s1", "scene_version_id": "v1"}));
    let err = e.run_scene(&mut s, &[]).await.unwrap_err();
    assert!(matches!(err, SagaError::StorageUnavailable(_)));
    assert!(err.is_retryable());
}

/// Store whose round log is down while everything else works.
struct LogDown(MemoryStore);

#[async_trait]
impl SimulationStore for LogDown {
    async fn create_simulation_log(
        &self,
        _entry: SimulationLogEntry,
    ) -> saga_core::Result<SimulationLogEntry> {
        Err(SagaError::StorageUnavailable("down".into()))
    }

    async fn list_simulation_logs(&self, scene_id: &str) -> saga_core::Result<Vec<SimulationLogEntry>> {
        self.0.list_simulation_logs(scene_id).await
    }

    async fn create_act(
        &self,
        root_id: &str,
        seq: u32,
        title: &str,
        purpose: &str,
        tone: &str,
    ) -> saga_core::Result<ActRecord> {
        self.0.create_act(root_id, seq, title, purpose, tone).await
    }

    async fn list_acts(&self, root_id: &str) -> saga_core::Result<Vec<ActRecord>> {
        self.0.list_acts(root_id).await
    }

    async fn create_chapter(
        &self,
        act_id: &str,
        seq: u32,
        title: &str,
        focus: &str,
    ) -> saga_core::Result<ChapterRecord> {
        self.0.create_chapter(act_id, seq, title, focus).await
    }

    async fn list_chapters(&self, act_id: &str) -> saga_core::Result<Vec<ChapterRecord>> {
        self.0.list_chapters(act_id).await
    }

    async fn mark_anchor_achieved(
        &self,
        anchor_id: &str,
        scene_version_id: &str,
    ) -> saga_core::Result<Anchor> {
        self.0.mark_anchor_achieved(anchor_id, scene_version_id).await
    }

    async fn next_unachieved_anchor(
        &self,
        root_id: &str,
        branch_id: &str,
    ) -> saga_core::Result<Option<Anchor>> {
        self.0.next_unachieved_anchor(root_id, branch_id).await
    }

    async fn scene_entities(&self, root_id: &str, branch_id: &str) -> saga_core::Result<SceneEntityIndex> {
        self.0.scene_entities(root_id, branch_id).await
    }
}

#[tokio::test]
async fn unlogged_round_leaves_scene_and_anchor_untouched() {
    let structure = MemoryStore::new();
    let mut anchor = Anchor::new("a1", ConstraintType::Hard, vec!["investigate:vault".into()]);
    anchor.root_id = Some("root".into());
    anchor.branch_id = Some("main".into());
    structure.add_anchor(anchor).unwrap();
    let store = Arc::new(LogDown(structure));
    let e = engine(store.clone(), 3);

    let mut s = scene(json!({
        "scene_id": "s1",
        "scene_version_id": "v1",
        "root_id": "root",
        "branch_id": "main",
        "world_state": {}
    }));
    let agents = vec![scripted("alice", vec![AgentAction::new("alice", "investigate", "vault")])];

    let err = e.simulate_scene(&mut s, &agents).await.unwrap_err();
    assert!(matches!(err, SagaError::StorageUnavailable(_)));
    assert_eq!(store.0.achieved_in("a1").unwrap(), None);
    assert!(s.get("facts").is_none());
    assert!(!s.world_state().unwrap().unwrap().is_satisfied("investigate:vault"));
}

struct Stalling;

#[async_trait]
impl AgentDecider for Stalling {
    fn agent_id(&self) -> &str {
        "sloth"
    }

    async fn decide(&self, agent_id: &str, _scene: &SceneContext) -> saga_core::Result<AgentAction> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(AgentAction::wait(agent_id))
    }
}

#[tokio::test(start_paused = true)]
async fn slow_agents_time_out() {
    let store = Arc::new(MemoryStore::new());
    let e = engine(store.clone(), 1);
    let mut s = scene(json!({"scene_id": "s1", "scene_version_id": "v1"}));
    let agents: Vec<Arc<dyn AgentDecider>> = vec![
        scripted("alice", vec![AgentAction::new("alice", "investigate", "vault")]),
        Arc::new(Stalling),
    ];

    let err = e.run_round(&mut s, &agents, "s1-1").await.unwrap_err();
    assert!(matches!(err, SagaError::Timeout { seconds: 600, .. }));
    // no partial round reaches the scene or the log
    assert!(s.get("facts").is_none());
    assert_eq!(store.log_count().unwrap(), 0);
}

struct RejectStrangers;

#[async_trait]
impl CharacterValidator for RejectStrangers {
    async fn validate_characters(&self, agent_ids: &[String], _scene: &SceneContext) -> saga_core::Result<()> {
        match agent_ids.iter().find(|id| id.as_str() != "alice") {
            Some(id) => Err(SagaError::validation("agents", format!("{id} is not in the cast"))),
            None => Ok(()),
        }
    }
}

#[tokio::test]
async fn character_validation_runs_before_any_round() {
    let store = Arc::new(MemoryStore::new());
    let e = engine(store.clone(), 1)
        .with_character_validation(CharacterValidation::Enabled(Arc::new(RejectStrangers)));
    let mut s = scene(json!({"scene_id": "s1", "scene_version_id": "v1"}));
    let agents = vec![scripted("mallory", Vec::new())];

    let err = e.simulate_scene(&mut s, &agents).await.unwrap_err();
    assert!(err.to_string().contains("mallory"));
    assert_eq!(store.log_count().unwrap(), 0);
}

#[tokio::test]
async fn jsonl_log_survives_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonlStore::new(dir.path()));
    let e = engine(store.clone(), 2);
    let mut s = scene(json!({"scene_id": "s1", "scene_version_id": "v1"}));
    let agents = vec![scripted("alice", vec![AgentAction::new("alice", "investigate", "vault")])];

    e.simulate_scene(&mut s, &agents).await.unwrap();

    let reopened = JsonlStore::new(dir.path());
    let entries = reopened.read_all().await.unwrap();
    let ids: Vec<&str> = entries.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["sim:s1:round:1", "sim:s1:round:2"]);
    assert_eq!(entries[0].round.agent_actions[0].agent_id, "alice");
}

struct Gazetteer {
    calls: AtomicUsize,
}

#[async_trait]
impl StructuredGenerator for Gazetteer {
    async fn generate_structured(
        &self,
        payload: &serde_json::Value,
    ) -> saga_core::Result<std::collections::HashMap<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(payload["mentions"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|m| m.as_str())
            .map(|m| (m.to_string(), m.to_lowercase().replace(' ', "_")))
            .collect())
    }
}

#[tokio::test]
async fn resolved_entities_feed_the_matrix() {
    let gateway = Gazetteer { calls: AtomicUsize::new(0) };
    let mentions = [
        ("s1".to_string(), vec!["Old Vault".to_string()]),
        ("s2".to_string(), vec!["old vault".to_string(), "Guard".to_string()]),
    ]
    .into_iter()
    .collect();

    let forward = saga_core::state::resolve_scene_entities(&gateway, &mentions).await.unwrap();
    let matrix = saga_core::DependencyMatrix::from_scene_entities(&forward);
    assert_eq!(matrix.get_impacted_scenes(&["old_vault"]), vec!["s1", "s2"]);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
}
