//! In-process store, used by the CLI and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{check_round_order, ActRecord, ChapterRecord, SceneEntityIndex, SimulationStore};
use crate::error::{Result, SagaError};
use crate::model::{Anchor, SimulationLogEntry};

#[derive(Debug, Default)]
struct Inner {
    logs: Vec<SimulationLogEntry>,
    acts: Vec<ActRecord>,
    chapters: Vec<ChapterRecord>,
    anchors: Vec<Anchor>,
    achieved_in: HashMap<String, String>,
    entity_index: HashMap<(String, String), SceneEntityIndex>,
}

/// Store holding everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| SagaError::StorageUnavailable("memory store lock poisoned".into()))
    }

    /// Register an anchor for a root/branch.
    pub fn add_anchor(&self, anchor: Anchor) -> Result<()> {
        self.lock()?.anchors.push(anchor);
        Ok(())
    }

    /// Register the scene → entity forward index of a branch.
    pub fn set_scene_entities(
        &self,
        root_id: &str,
        branch_id: &str,
        index: SceneEntityIndex,
    ) -> Result<()> {
        self.lock()?
            .entity_index
            .insert((root_id.to_string(), branch_id.to_string()), index);
        Ok(())
    }

    /// Scene version an anchor was achieved in, if any.
    pub fn achieved_in(&self, anchor_id: &str) -> Result<Option<String>> {
        Ok(self.lock()?.achieved_in.get(anchor_id).cloned())
    }

    pub fn log_count(&self) -> Result<usize> {
        Ok(self.lock()?.logs.len())
    }
}

#[async_trait]
impl SimulationStore for MemoryStore {
    async fn create_simulation_log(&self, entry: SimulationLogEntry) -> Result<SimulationLogEntry> {
        let mut inner = self.lock()?;
        let scene = entry.scene_id();
        let same_scene = inner.logs.iter().filter(|e| e.scene_id() == scene);
        let last = same_scene.clone().map(|e| e.round_number).max().unwrap_or(0);
        let logged = same_scene.clone().any(|e| e.id == entry.id);
        if !check_round_order(last, logged, &entry)? {
            inner.logs.push(entry.clone());
        }
        Ok(entry)
    }

    async fn list_simulation_logs(&self, scene_id: &str) -> Result<Vec<SimulationLogEntry>> {
        let inner = self.lock()?;
        let mut logs: Vec<SimulationLogEntry> = inner
            .logs
            .iter()
            .filter(|e| e.scene_id() == Some(scene_id))
            .cloned()
            .collect();
        logs.sort_by_key(|e| e.round_number);
        Ok(logs)
    }

    async fn create_act(
        &self,
        root_id: &str,
        seq: u32,
        title: &str,
        purpose: &str,
        tone: &str,
    ) -> Result<ActRecord> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .acts
            .iter()
            .find(|a| a.root_id == root_id && a.sequence == seq)
        {
            return Ok(existing.clone());
        }
        let act = ActRecord {
            id: Uuid::new_v4().to_string(),
            root_id: root_id.to_string(),
            sequence: seq,
            title: title.to_string(),
            purpose: purpose.to_string(),
            tone: tone.to_string(),
        };
        inner.acts.push(act.clone());
        Ok(act)
    }

    async fn list_acts(&self, root_id: &str) -> Result<Vec<ActRecord>> {
        let inner = self.lock()?;
        let mut acts: Vec<ActRecord> =
            inner.acts.iter().filter(|a| a.root_id == root_id).cloned().collect();
        acts.sort_by_key(|a| a.sequence);
        Ok(acts)
    }

    async fn create_chapter(
        &self,
        act_id: &str,
        seq: u32,
        title: &str,
        focus: &str,
    ) -> Result<ChapterRecord> {
        let mut inner = self.lock()?;
        if !inner.acts.iter().any(|a| a.id == act_id) {
            return Err(SagaError::NotFound(format!("act {act_id}")));
        }
        let chapter = ChapterRecord {
            id: Uuid::new_v4().to_string(),
            act_id: act_id.to_string(),
            sequence: seq,
            title: title.to_string(),
            focus: focus.to_string(),
            pov_character_id: None,
        };
        inner.chapters.push(chapter.clone());
        Ok(chapter)
    }

    async fn list_chapters(&self, act_id: &str) -> Result<Vec<ChapterRecord>> {
        let inner = self.lock()?;
        let mut chapters: Vec<ChapterRecord> = inner
            .chapters
            .iter()
            .filter(|c| c.act_id == act_id)
            .cloned()
            .collect();
        chapters.sort_by_key(|c| c.sequence);
        Ok(chapters)
    }

    async fn mark_anchor_achieved(
        &self,
        anchor_id: &str,
        scene_version_id: &str,
    ) -> Result<Anchor> {
        let mut inner = self.lock()?;
        let anchor = inner
            .anchors
            .iter_mut()
            .find(|a| a.id == anchor_id)
            .ok_or_else(|| SagaError::NotFound(format!("anchor {anchor_id}")))?;
        anchor.achieved = true;
        let marked = anchor.clone();
        inner
            .achieved_in
            .insert(anchor_id.to_string(), scene_version_id.to_string());
        Ok(marked)
    }

    async fn next_unachieved_anchor(
        &self,
        root_id: &str,
        branch_id: &str,
    ) -> Result<Option<Anchor>> {
        let inner = self.lock()?;
        Ok(inner
            .anchors
            .iter()
            .filter(|a| {
                !a.achieved
                    && a.root_id.as_deref() == Some(root_id)
                    && a.branch_id.as_deref() == Some(branch_id)
            })
            .min_by_key(|a| a.sequence)
            .cloned())
    }

    async fn scene_entities(&self, root_id: &str, branch_id: &str) -> Result<SceneEntityIndex> {
        let inner = self.lock()?;
        Ok(inner
            .entity_index
            .get(&(root_id.to_string(), branch_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstraintType, DmArbitration, SimulationRoundResult};

    fn entry(scene: &str, n: u32) -> SimulationLogEntry {
        let round_id = format!("{scene}-{n}");
        SimulationLogEntry::new(
            scene,
            "v1",
            n,
            SimulationRoundResult {
                round_id: round_id.clone(),
                agent_actions: vec![],
                dm_arbitration: DmArbitration {
                    round_id,
                    action_results: vec![],
                    conflicts_resolved: vec![],
                    environment_changes: vec![],
                },
                narrative_events: vec![],
                sensory_seeds: vec![],
                convergence_score: 0.0,
                drama_score: 0.0,
                info_gain: 0.0,
                stagnation_count: 0,
            },
        )
    }

    #[tokio::test]
    async fn log_rewrites_are_idempotent() {
        let store = MemoryStore::new();
        store.create_simulation_log(entry("s1", 1)).await.unwrap();
        store.create_simulation_log(entry("s1", 1)).await.unwrap();
        store.create_simulation_log(entry("s1", 2)).await.unwrap();
        assert_eq!(store.log_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn round_numbers_must_increase_per_scene() {
        let store = MemoryStore::new();
        store.create_simulation_log(entry("s1", 2)).await.unwrap();
        assert!(store.create_simulation_log(entry("s1", 1)).await.is_err());
        assert!(store.create_simulation_log(entry("s1", 0)).await.is_err());
        // other scenes keep their own sequence
        store.create_simulation_log(entry("s2", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn next_anchor_skips_achieved() {
        let store = MemoryStore::new();
        for (id, seq) in [("a1", 1), ("a2", 2)] {
            let mut anchor = Anchor::new(id, ConstraintType::Hard, vec!["c".into()]);
            anchor.root_id = Some("root".into());
            anchor.branch_id = Some("main".into());
            anchor.sequence = seq;
            store.add_anchor(anchor).unwrap();
        }
        let first = store.next_unachieved_anchor("root", "main").await.unwrap().unwrap();
        assert_eq!(first.id, "a1");
        store.mark_anchor_achieved("a1", "v1").await.unwrap();
        let next = store.next_unachieved_anchor("root", "main").await.unwrap().unwrap();
        assert_eq!(next.id, "a2");
        assert_eq!(store.achieved_in("a1").unwrap().as_deref(), Some("v1"));
        assert!(store.mark_anchor_achieved("zz", "v1").await.is_err());
    }

    #[tokio::test]
    async fn chapters_require_existing_act() {
        let store = MemoryStore::new();
        assert!(store.create_chapter("missing", 1, "t", "f").await.is_err());
        let act = store.create_act("root", 1, "Act I", "setup", "tense").await.unwrap();
        let again = store.create_act("root", 1, "Act I", "setup", "tense").await.unwrap();
        assert_eq!(act.id, again.id);
        store.create_chapter(&act.id, 2, "b", "x").await.unwrap();
        store.create_chapter(&act.id, 1, "a", "y").await.unwrap();
        let titles: Vec<String> =
            store.list_chapters(&act.id).await.unwrap().into_iter().map(|c| c.title).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }
}
