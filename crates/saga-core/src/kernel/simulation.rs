//! Simulation engine - drives a scene round by round until it converges,
//! stagnates, loses its anchor, or runs out of rounds.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;

use super::arbitrator::WorldMaster;
use super::convergence::ConvergenceMonitor;
use super::injection::{calculate_info_gain, force_conflict_escalation, inject_breaking_incident};
use super::replanner::{AnchorReplanner, ImpactScope};
use crate::adapters::{AgentDecider, CharacterValidation, Renderer};
use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::model::{
    Anchor, ChangeKind, ConvergenceCheck, DmArbitration, NarrativeEvent, PacingKind, ReplanRequest,
    ReplanResult, SceneContext, SimulationLogEntry, SimulationRoundResult, WorldState,
};
use crate::state::{DependencyMatrix, DependencyMatrixCache};
use crate::store::SimulationStore;

/// Why a scene stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    MaxRounds,
    Converged,
    Stagnated,
    AnchorUnreachable,
}

/// Everything a scene simulation produced, in round order.
#[derive(Debug, Clone)]
pub struct SceneRun {
    pub rounds: Vec<SimulationRoundResult>,
    pub replans: Vec<ReplanResult>,
    pub halt: HaltReason,
}

pub struct SimulationEngine {
    config: SagaConfig,
    store: Arc<dyn SimulationStore>,
    world_master: WorldMaster,
    monitor: ConvergenceMonitor,
    replanner: AnchorReplanner,
    renderer: Option<Arc<dyn Renderer>>,
    matrices: Option<Arc<DependencyMatrixCache>>,
    validation: CharacterValidation,
}

impl SimulationEngine {
    /// Create an engine. The configuration is validated here, before any scene runs.
    pub fn new(config: SagaConfig, store: Arc<dyn SimulationStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            monitor: ConvergenceMonitor::from_config(&config.simulation),
            replanner: AnchorReplanner::new(Arc::clone(&store), config.replan.clone()),
            world_master: WorldMaster::new(),
            renderer: None,
            matrices: None,
            validation: CharacterValidation::Disabled,
            store,
            config,
        })
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_world_master(mut self, world_master: WorldMaster) -> Self {
        self.world_master = world_master;
        self
    }

    pub fn with_matrix_cache(mut self, cache: Arc<DependencyMatrixCache>) -> Self {
        self.matrices = Some(cache);
        self
    }

    pub fn with_character_validation(mut self, validation: CharacterValidation) -> Self {
        self.validation = validation;
        self
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn world_master(&self) -> &WorldMaster {
        &self.world_master
    }

    /// Simulate a scene and render it.
    pub async fn run_scene(
        &self,
        scene: &mut SceneContext,
        agents: &[Arc<dyn AgentDecider>],
    ) -> Result<String> {
        let renderer = self
            .renderer
            .clone()
            .ok_or_else(|| SagaError::config("smart renderer is required"))?;

        let run = self.simulate_scene(scene, agents).await?;
        tracing::info!(
            scene_id = scene.scene_id().unwrap_or("-"),
            rounds = run.rounds.len(),
            halt = ?run.halt,
            "Rendering scene"
        );
        renderer.render(&run.rounds, scene).await
    }

    /// Play one round: every agent decides concurrently against the same
    /// scene, the world master judges the full set, and the successful
    /// effects are applied. The scene is only written once everything else
    /// has succeeded.
    pub async fn run_round(
        &self,
        scene: &mut SceneContext,
        agents: &[Arc<dyn AgentDecider>],
        round_id: &str,
    ) -> Result<SimulationRoundResult> {
        tracing::debug!(round_id = %round_id, agents = agents.len(), "Round started");

        let timeout = self.config.generation.timeout();
        let agent_actions = {
            let snapshot: &SceneContext = scene;
            try_join_all(agents.iter().map(|agent| async move {
                let agent_id = agent.agent_id();
                match tokio::time::timeout(timeout, agent.decide(agent_id, snapshot)).await {
                    Ok(decided) => decided,
                    Err(_) => Err(SagaError::Timeout {
                        operation: format!("decide({agent_id})"),
                        seconds: timeout.as_secs(),
                    }),
                }
            }))
            .await?
        };

        let world = scene.world_state()?.unwrap_or_default();
        let dm_arbitration = self.world_master.arbitrate(round_id, &agent_actions, &world);
        let sensory_seeds = self.world_master.inject_sensory_seeds(scene)?;

        let mut next = scene.clone();
        apply_environment_changes(&mut next, &dm_arbitration)?;
        let info_gain = calculate_info_gain(scene, &next);
        let convergence_score = match (next.world_state()?, next.next_anchor()?) {
            (Some(world), Some(anchor)) => 1.0 - ConvergenceMonitor::distance(&world, &anchor),
            _ => 0.0,
        };
        let drama_score = drama_score(next.conflict_escalation(), &dm_arbitration, agent_actions.len());
        *scene = next;

        Ok(SimulationRoundResult {
            round_id: round_id.to_string(),
            agent_actions,
            dm_arbitration,
            narrative_events: Vec::new(),
            sensory_seeds,
            convergence_score,
            drama_score,
            info_gain,
            stagnation_count: 0,
        })
    }

    /// Run rounds until the scene halts, logging each completed round.
    pub async fn simulate_scene(
        &self,
        scene: &mut SceneContext,
        agents: &[Arc<dyn AgentDecider>],
    ) -> Result<SceneRun> {
        let agent_ids: Vec<String> = agents.iter().map(|a| a.agent_id().to_string()).collect();
        self.validation.check(&agent_ids, scene).await?;

        match scene.get("events") {
            None | Some(Value::Null) => scene.insert("events", Value::Array(Vec::new())),
            Some(Value::Array(_)) => {}
            Some(_) => return Err(SagaError::validation("scene_context.events", "must be a list")),
        }

        let round_base = scene.scene_id().unwrap_or("round").to_string();
        let sim = &self.config.simulation;

        let mut anchor = self.resolve_anchor(scene).await?;
        scene.set_next_anchor(anchor.as_ref())?;
        let mut last_distance = current_distance(scene, anchor.as_ref())?;

        let mut rounds: Vec<SimulationRoundResult> = Vec::new();
        let mut replans = Vec::new();
        let mut touched: Vec<String> = Vec::new();
        let mut stagnation = 0u32;
        let mut halt = HaltReason::MaxRounds;

        tracing::info!(
            scene_id = %round_base,
            agents = agents.len(),
            max_rounds = sim.max_rounds,
            anchor_id = anchor.as_ref().map(|a| a.id.as_str()).unwrap_or("-"),
            "Scene simulation started"
        );

        for round_number in 1..=sim.max_rounds {
            let round_id = format!("{round_base}-{round_number}");
            // Built against a copy: neither `scene` nor the anchor store sees
            // the round until its log record is written.
            let mut next = scene.clone();
            let mut round = self.run_round(&mut next, agents, &round_id).await?;

            for change in &round.dm_arbitration.environment_changes {
                if !touched.contains(&change.entity_id) {
                    touched.push(change.entity_id.clone());
                }
            }

            let world = next.world_state()?;
            let check = match (&world, &anchor) {
                (Some(world), Some(current)) => Some(self.monitor.check_convergence(
                    world,
                    current,
                    sim.max_rounds - round_number,
                )?),
                _ => None,
            };

            let mut distance_improved = false;
            let mut achieved = None;
            if let (Some(check), Some(current)) = (&check, &anchor) {
                distance_improved = last_distance.map_or(false, |d| check.distance() < d);
                last_distance = Some(check.distance());
                tracing::debug!(
                    round_id = %round_id,
                    anchor_id = %current.id,
                    distance = check.distance(),
                    needed = check.convergence_needed,
                    "Convergence checked"
                );

                if check.convergence_needed {
                    if let Some(action) = check.suggested_action {
                        round
                            .narrative_events
                            .push(NarrativeEvent::ConvergenceAction { action });
                    }
                }

                if check.distance() == 0.0 {
                    round.narrative_events.push(NarrativeEvent::AnchorAchieved {
                        anchor_id: current.id.clone(),
                    });
                    achieved = Some(current.clone());
                }
            }

            let progress = round.narrative_events.iter().any(NarrativeEvent::is_progress);
            stagnation = if round.info_gain < sim.info_gain_floor && !distance_improved && !progress {
                stagnation + 1
            } else {
                0
            };

            let mut unreachable = false;
            if let (Some(check), Some(current), Some(world)) = (&check, anchor.clone(), &world) {
                if achieved.is_none() && self.should_replan(check, &current, stagnation) {
                    let result = self
                        .replan(&next, &round_base, &current, world, &touched)
                        .await?;
                    if result.success {
                        round.narrative_events.push(NarrativeEvent::ReplanRoute {
                            reason: result.reason().to_string(),
                        });
                        if let Some(modified) = &result.modified_anchor {
                            anchor = Some(modified.clone());
                            next.set_next_anchor(anchor.as_ref())?;
                        }
                        stagnation = 0;
                    } else {
                        round.narrative_events.push(NarrativeEvent::ReplanFailed {
                            reason: result.reason().to_string(),
                        });
                        unreachable = true;
                    }
                    replans.push(result);
                }
            }
            round.stagnation_count = stagnation;

            let ending = unreachable || self.should_end_scene(&round);
            rounds.push(round);
            if !ending {
                self.apply_pacing(&mut next, &mut rounds)?;
            }

            let Some(last) = rounds.last() else {
                break;
            };
            self.write_log(&next, round_number, last).await?;

            if let Some(current) = achieved {
                anchor = self.achieve_anchor(&mut next, &current).await?;
                touched.clear();
                last_distance = current_distance(&next, anchor.as_ref())?;
            }
            *scene = next;

            if unreachable {
                halt = HaltReason::AnchorUnreachable;
            } else if last.convergence_score >= sim.end_scene_score {
                halt = HaltReason::Converged;
            } else if last.stagnation_count >= sim.stagnation_ceiling {
                halt = HaltReason::Stagnated;
            }
            if ending {
                break;
            }
        }

        tracing::info!(
            scene_id = %round_base,
            rounds = rounds.len(),
            halt = ?halt,
            "Scene simulation finished"
        );
        Ok(SceneRun {
            rounds,
            replans,
            halt,
        })
    }

    /// A scene ends once it has nearly converged or has stagnated too long.
    pub fn should_end_scene(&self, round: &SimulationRoundResult) -> bool {
        let sim = &self.config.simulation;
        round.convergence_score >= sim.end_scene_score
            || round.stagnation_count >= sim.stagnation_ceiling
    }

    fn should_replan(&self, check: &ConvergenceCheck, anchor: &Anchor, stagnation: u32) -> bool {
        let sim = &self.config.simulation;
        check.convergence_needed
            && anchor.is_hard()
            && (stagnation >= sim.stagnation_ceiling || check.distance() > sim.replan_distance)
    }

    /// The scene's own anchor, else the branch's next unachieved one.
    async fn resolve_anchor(&self, scene: &SceneContext) -> Result<Option<Anchor>> {
        if let Some(anchor) = scene.next_anchor()? {
            return Ok(Some(anchor));
        }
        if scene.world_state()?.is_none() {
            return Ok(None);
        }
        match (scene.root_id(), scene.branch_id()) {
            (Some(root_id), Some(branch_id)) => {
                self.store.next_unachieved_anchor(root_id, branch_id).await
            }
            _ => Ok(None),
        }
    }

    async fn achieve_anchor(&self, scene: &mut SceneContext, anchor: &Anchor) -> Result<Option<Anchor>> {
        let version = scene.scene_version_id().ok_or_else(|| {
            SagaError::validation(
                "scene_context.scene_version_id",
                "is required to mark an anchor achieved",
            )
        })?;
        self.store.mark_anchor_achieved(&anchor.id, version).await?;
        tracing::info!(anchor_id = %anchor.id, scene_version_id = %version, "Anchor achieved");

        let next = match (scene.root_id(), scene.branch_id()) {
            (Some(root_id), Some(branch_id)) => {
                self.store.next_unachieved_anchor(root_id, branch_id).await?
            }
            _ => None,
        };
        scene.set_next_anchor(next.as_ref())?;
        Ok(next)
    }

    async fn replan(
        &self,
        scene: &SceneContext,
        scene_id: &str,
        anchor: &Anchor,
        world: &WorldState,
        touched: &[String],
    ) -> Result<ReplanResult> {
        let request = ReplanRequest::new(
            scene_id,
            anchor.id.clone(),
            world.clone(),
            anchor.unmet_conditions(world),
        )?
        .with_changed_entities(touched.to_vec());

        let scope = match (&self.matrices, scene.root_id(), scene.branch_id()) {
            (Some(cache), Some(root_id), Some(branch_id)) => {
                let store = Arc::clone(&self.store);
                let matrix = cache
                    .get_or_build(root_id, branch_id, || async move {
                        store
                            .scene_entities(root_id, branch_id)
                            .await
                            .map(|index| DependencyMatrix::from_index(&index))
                    })
                    .await?;
                Some(ImpactScope {
                    matrix,
                    current_seq: scene.scene_seq().unwrap_or(0),
                })
            }
            _ => None,
        };

        let result = self.replanner.replan(&request, anchor, scope.as_ref()).await?;

        if result.success && !result.new_chapters.is_empty() {
            if let (Some(cache), Some(root_id), Some(branch_id)) =
                (&self.matrices, scene.root_id(), scene.branch_id())
            {
                cache.invalidate(root_id, branch_id);
            }
        }
        Ok(result)
    }

    /// Act on the world master's pacing directive for the latest round.
    fn apply_pacing(&self, scene: &mut SceneContext, rounds: &mut [SimulationRoundResult]) -> Result<()> {
        let directive = self.world_master.monitor_pacing(rounds);
        let event = match directive.kind {
            PacingKind::None => return Ok(()),
            PacingKind::InjectIncident => inject_breaking_incident(scene)?,
            PacingKind::ForceEscalation => {
                if scene.get("conflict_escalation").is_none() {
                    scene.insert("conflict_escalation", Value::from(0.0));
                }
                force_conflict_escalation(scene)?
            }
        };
        tracing::info!(
            directive = ?directive.kind,
            reason = directive.reason.as_deref().unwrap_or("-"),
            "Pacing intervention"
        );
        if let Some(last) = rounds.last_mut() {
            last.narrative_events.push(event);
        }
        Ok(())
    }

    async fn write_log(
        &self,
        scene: &SceneContext,
        round_number: u32,
        round: &SimulationRoundResult,
    ) -> Result<()> {
        let (Some(scene_id), Some(version)) = (scene.scene_id(), scene.scene_version_id()) else {
            tracing::debug!(round_id = %round.round_id, "Scene has no id/version, round not logged");
            return Ok(());
        };
        let entry = SimulationLogEntry::new(scene_id, version, round_number, round.clone());
        let written = self.store.create_simulation_log(entry).await?;
        tracing::debug!(log_id = %written.id, "Round logged");
        Ok(())
    }
}

/// Fold successful actions' effects into the scene: effect keys become true
/// in the world state and are recorded as facts.
fn apply_environment_changes(scene: &mut SceneContext, arbitration: &DmArbitration) -> Result<()> {
    if arbitration.environment_changes.is_empty() {
        return Ok(());
    }
    let mut world = scene.world_state()?;
    for change in &arbitration.environment_changes {
        if let Some(world) = world.as_mut() {
            world.set(change.effect.clone(), Value::Bool(true));
            if change.kind == ChangeKind::LocationChange {
                world.set(format!("location:{}", change.agent_id), Value::from(change.entity_id.clone()));
            }
        }
        scene.record_fact(&change.effect);
    }
    if let Some(world) = &world {
        scene.set_world_state(world)?;
    }
    Ok(())
}

/// Half standing escalation, half the share of agents caught in a conflict
/// this round.
fn drama_score(escalation: f64, arbitration: &DmArbitration, actions: usize) -> f64 {
    let contested: HashSet<&str> = arbitration
        .conflicts_resolved
        .iter()
        .flat_map(|c| c.agents.iter().map(String::as_str))
        .collect();
    let share = contested.len() as f64 / actions.max(1) as f64;
    (0.5 * escalation.clamp(0.0, 1.0) + 0.5 * share.min(1.0)).min(1.0)
}

fn current_distance(scene: &SceneContext, anchor: Option<&Anchor>) -> Result<Option<f64>> {
    Ok(match (scene.world_state()?, anchor) {
        (Some(world), Some(anchor)) => Some(ConvergenceMonitor::distance(&world, anchor)),
        _ => None,
    })
}
