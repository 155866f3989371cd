//! Belief-desire-intention state carried by each character agent.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesireType {
    ShortTerm,
    LongTerm,
    Reactive,
}

/// A goal an agent is pursuing. Priority is range-checked on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDesire")]
pub struct Desire {
    pub id: String,
    #[serde(rename = "type")]
    pub desire_type: DesireType,
    pub description: String,
    priority: u8,
    pub satisfaction_condition: String,
    pub created_at_scene: u32,
    #[serde(default)]
    pub expires_at_scene: Option<u32>,
}

#[derive(Deserialize)]
struct RawDesire {
    id: String,
    #[serde(rename = "type")]
    desire_type: DesireType,
    description: String,
    priority: i64,
    satisfaction_condition: String,
    created_at_scene: u32,
    #[serde(default)]
    expires_at_scene: Option<u32>,
}

impl TryFrom<RawDesire> for Desire {
    type Error = SagaError;

    fn try_from(raw: RawDesire) -> Result<Self> {
        let priority = u8::try_from(raw.priority)
            .ok()
            .filter(|p| (MIN_PRIORITY..=MAX_PRIORITY).contains(p))
            .ok_or_else(|| {
                SagaError::validation(
                    "desire.priority",
                    format!("must be in [{MIN_PRIORITY}, {MAX_PRIORITY}], got {}", raw.priority),
                )
            })?;
        Ok(Self {
            id: raw.id,
            desire_type: raw.desire_type,
            description: raw.description,
            priority,
            satisfaction_condition: raw.satisfaction_condition,
            created_at_scene: raw.created_at_scene,
            expires_at_scene: raw.expires_at_scene,
        })
    }
}

impl Desire {
    pub fn new(
        id: impl Into<String>,
        desire_type: DesireType,
        description: impl Into<String>,
        priority: u8,
        satisfaction_condition: impl Into<String>,
        created_at_scene: u32,
    ) -> Result<Self> {
        RawDesire {
            id: id.into(),
            desire_type,
            description: description.into(),
            priority: i64::from(priority),
            satisfaction_condition: satisfaction_condition.into(),
            created_at_scene,
            expires_at_scene: None,
        }
        .try_into()
    }

    pub fn expiring_at(mut self, scene: u32) -> Self {
        self.expires_at_scene = Some(scene);
        self
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Still relevant at `scene` (no expiry, or expiry not yet passed).
    pub fn is_active_at(&self, scene: u32) -> bool {
        self.expires_at_scene.map_or(true, |expires| expires >= scene)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentionActionType {
    Attack,
    Flee,
    Negotiate,
    Investigate,
    Wait,
    Other,
}

impl IntentionActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attack => "attack",
            Self::Flee => "flee",
            Self::Negotiate => "negotiate",
            Self::Investigate => "investigate",
            Self::Wait => "wait",
            Self::Other => "other",
        }
    }
}

/// A committed plan serving exactly one desire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawIntention")]
pub struct Intention {
    pub id: String,
    pub desire_id: String,
    pub action_type: IntentionActionType,
    pub target: String,
    pub expected_outcome: String,
    risk_assessment: f64,
}

#[derive(Deserialize)]
struct RawIntention {
    id: String,
    desire_id: String,
    action_type: IntentionActionType,
    target: String,
    expected_outcome: String,
    risk_assessment: f64,
}

impl TryFrom<RawIntention> for Intention {
    type Error = SagaError;

    fn try_from(raw: RawIntention) -> Result<Self> {
        if !(0.0..=1.0).contains(&raw.risk_assessment) {
            return Err(SagaError::validation(
                "intention.risk_assessment",
                format!("must be in [0.0, 1.0], got {}", raw.risk_assessment),
            ));
        }
        Ok(Self {
            id: raw.id,
            desire_id: raw.desire_id,
            action_type: raw.action_type,
            target: raw.target,
            expected_outcome: raw.expected_outcome,
            risk_assessment: raw.risk_assessment,
        })
    }
}

impl Intention {
    pub fn new(
        id: impl Into<String>,
        desire_id: impl Into<String>,
        action_type: IntentionActionType,
        target: impl Into<String>,
        expected_outcome: impl Into<String>,
        risk_assessment: f64,
    ) -> Result<Self> {
        RawIntention {
            id: id.into(),
            desire_id: desire_id.into(),
            action_type,
            target: target.into(),
            expected_outcome: expected_outcome.into(),
            risk_assessment,
        }
        .try_into()
    }

    pub fn risk_assessment(&self) -> f64 {
        self.risk_assessment
    }
}

/// Per-agent BDI snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BdiState {
    pub agent_id: String,
    #[serde(default)]
    pub beliefs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub desires: Vec<Desire>,
    #[serde(default)]
    pub intentions: Vec<Intention>,
    #[serde(default)]
    pub last_updated_scene: u32,
}

impl BdiState {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    /// Highest-priority desires still active at the last updated scene.
    pub fn top_desires(&self, limit: usize) -> Vec<&Desire> {
        let mut active: Vec<&Desire> = self
            .desires
            .iter()
            .filter(|d| d.is_active_at(self.last_updated_scene))
            .collect();
        // stable: equal priorities keep insertion order
        active.sort_by(|a, b| b.priority.cmp(&a.priority));
        active.truncate(limit);
        active
    }

    /// Replace the intention for a desire. A desire owns at most one active intention.
    pub fn commit(&mut self, intention: Intention) -> Result<()> {
        if !self.desires.iter().any(|d| d.id == intention.desire_id) {
            return Err(SagaError::validation(
                "intention.desire_id",
                format!("unknown desire {}", intention.desire_id),
            ));
        }
        self.intentions.retain(|i| i.desire_id != intention.desire_id);
        self.intentions.push(intention);
        Ok(())
    }

    /// Drop desires that expired before `scene`, along with their intentions.
    pub fn expire(&mut self, scene: u32) {
        self.desires.retain(|d| d.is_active_at(scene));
        let live: Vec<String> = self.desires.iter().map(|d| d.id.clone()).collect();
        self.intentions.retain(|i| live.contains(&i.desire_id));
    }

    /// Merge a belief patch produced by the perception step.
    pub fn apply_beliefs(&mut self, patch: serde_json::Map<String, serde_json::Value>) {
        self.beliefs.extend(patch);
    }
}
