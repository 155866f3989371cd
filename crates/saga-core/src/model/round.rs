//! Per-round records: agent actions, arbitration, and the round log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::anchor::ConvergenceAction;

/// Action types that never contend for a target.
pub const PASSIVE_ACTION_TYPES: &[&str] = &["wait", "observe", ""];

/// What one agent chose to do this round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAction {
    pub agent_id: String,
    pub internal_thought: String,
    pub action_type: String,
    pub action_target: String,
    #[serde(default)]
    pub dialogue: Option<String>,
    pub action_description: String,
}

impl AgentAction {
    pub fn new(
        agent_id: impl Into<String>,
        action_type: impl Into<String>,
        action_target: impl Into<String>,
    ) -> Self {
        let agent_id = agent_id.into();
        let action_type = action_type.into();
        let action_target = action_target.into();
        let action_description = format!("{agent_id} {action_type} {action_target}")
            .trim_end()
            .to_string();
        Self {
            agent_id,
            internal_thought: String::new(),
            action_type,
            action_target,
            dialogue: None,
            action_description,
        }
    }

    /// Fallback when an agent has no intention to act on.
    pub fn wait(agent_id: impl Into<String>) -> Self {
        let mut action = Self::new(agent_id, "wait", "");
        action.internal_thought = "wait".into();
        action.action_description = "wait".into();
        action
    }

    pub fn with_dialogue(mut self, line: impl Into<String>) -> Self {
        self.dialogue = Some(line.into());
        self
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.internal_thought = thought.into();
        self
    }

    pub fn is_passive(&self) -> bool {
        PASSIVE_ACTION_TYPES.contains(&self.action_type.as_str())
    }
}

/// An action as submitted to arbitration, with its round-scoped id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedAction {
    pub action_id: String,
    #[serde(flatten)]
    pub action: AgentAction,
}

impl SubmittedAction {
    /// Number actions `<round_id>-<index>` in submission order.
    pub fn number(round_id: &str, actions: &[AgentAction]) -> Vec<Self> {
        actions
            .iter()
            .enumerate()
            .map(|(idx, action)| Self {
                action_id: format!("{round_id}-{idx}"),
                action: action.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Failure,
    Partial,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    pub agent_id: String,
    pub success: ActionOutcome,
    pub reason: String,
    pub actual_outcome: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    MutualAttack,
    SharedTarget,
}

/// A contested pair and how it was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub agents: Vec<String>,
    pub action_ids: Vec<String>,
    #[serde(default)]
    pub target: String,
    /// Agent whose action prevailed; `None` on a stalemate.
    #[serde(default)]
    pub winner: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    StateChange,
    LocationChange,
}

/// A world-state delta caused by a successful action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub action_id: String,
    pub agent_id: String,
    pub entity_id: String,
    /// World-state key set truthy by this change.
    pub effect: String,
}

/// The referee's single authoritative judgment for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmArbitration {
    pub round_id: String,
    pub action_results: Vec<ActionResult>,
    #[serde(default)]
    pub conflicts_resolved: Vec<ConflictResolution>,
    #[serde(default)]
    pub environment_changes: Vec<EnvironmentChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedType {
    Weather,
    AmbientSound,
    CharacterGesture,
    ObjectDetail,
}

/// Environmental detail handed to the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorySeed {
    #[serde(rename = "type")]
    pub seed_type: SeedType,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingKind {
    None,
    InjectIncident,
    ForceEscalation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingDirective {
    #[serde(rename = "type")]
    pub kind: PacingKind,
    #[serde(default)]
    pub reason: Option<String>,
}

impl PacingDirective {
    pub fn none() -> Self {
        Self {
            kind: PacingKind::None,
            reason: None,
        }
    }

    pub fn new(kind: PacingKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: Some(reason.into()),
        }
    }
}

/// Something that happened to the story during a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NarrativeEvent {
    ConvergenceAction { action: ConvergenceAction },
    AnchorAchieved { anchor_id: String },
    ReplanRoute { reason: String },
    ReplanFailed { reason: String },
    BreakingIncident { detail: String },
    ForceEscalation { level: f64 },
}

impl NarrativeEvent {
    /// Whether the event moves the story, as opposed to a hint.
    pub fn is_progress(&self) -> bool {
        !matches!(self, Self::ConvergenceAction { .. })
    }
}

/// The full record of one round, written once to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRoundResult {
    pub round_id: String,
    pub agent_actions: Vec<AgentAction>,
    pub dm_arbitration: DmArbitration,
    pub narrative_events: Vec<NarrativeEvent>,
    pub sensory_seeds: Vec<SensorySeed>,
    pub convergence_score: f64,
    pub drama_score: f64,
    pub info_gain: f64,
    pub stagnation_count: u32,
}

/// One append-only log record, keyed `sim:<scene_id>:round:<n>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationLogEntry {
    pub id: String,
    pub scene_version_id: String,
    pub round_number: u32,
    #[serde(flatten)]
    pub round: SimulationRoundResult,
    pub recorded_at: DateTime<Utc>,
}

impl SimulationLogEntry {
    pub fn log_id(scene_id: &str, round_number: u32) -> String {
        format!("sim:{scene_id}:round:{round_number}")
    }

    pub fn new(
        scene_id: &str,
        scene_version_id: impl Into<String>,
        round_number: u32,
        round: SimulationRoundResult,
    ) -> Self {
        Self {
            id: Self::log_id(scene_id, round_number),
            scene_version_id: scene_version_id.into(),
            round_number,
            round,
            recorded_at: Utc::now(),
        }
    }

    /// Scene id recovered from the deterministic log id.
    pub fn scene_id(&self) -> Option<&str> {
        self.id
            .strip_prefix("sim:")
            .and_then(|rest| rest.rsplit_once(":round:"))
            .map(|(scene, _)| scene)
    }
}
