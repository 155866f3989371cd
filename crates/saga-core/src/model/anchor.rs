//! Narrative anchors, convergence checks, and replanning requests/results.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SagaError};
use crate::model::scene::WorldState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    /// Must eventually be satisfied.
    #[default]
    Hard,
    /// Advisory; may be relaxed silently.
    Soft,
    /// May be swapped for an equivalent checkpoint.
    Flexible,
}

/// A narrative checkpoint with its satisfaction conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    #[serde(default)]
    pub root_id: Option<String>,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub sequence: u32,
    #[serde(default)]
    pub anchor_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub constraint_type: ConstraintType,
    #[serde(deserialize_with = "conditions_list")]
    pub required_conditions: Vec<String>,
    #[serde(default)]
    pub deadline_scene: Option<u32>,
    #[serde(default)]
    pub achieved: bool,
}

/// Conditions arrive either as a list or as a JSON-encoded list string.
fn conditions_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Conditions {
        List(Vec<String>),
        Encoded(String),
    }

    match Conditions::deserialize(deserializer)? {
        Conditions::List(list) => Ok(list),
        Conditions::Encoded(raw) => serde_json::from_str(&raw).map_err(|_| {
            serde::de::Error::custom("anchor required_conditions must be list")
        }),
    }
}

impl Anchor {
    pub fn new(
        id: impl Into<String>,
        constraint_type: ConstraintType,
        required_conditions: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            root_id: None,
            branch_id: None,
            sequence: 0,
            anchor_type: String::new(),
            description: String::new(),
            constraint_type,
            required_conditions,
            deadline_scene: None,
            achieved: false,
        }
    }

    pub fn is_hard(&self) -> bool {
        self.constraint_type == ConstraintType::Hard
    }

    /// Conditions the world state does not yet satisfy, in anchor order.
    pub fn unmet_conditions(&self, world: &WorldState) -> Vec<String> {
        self.required_conditions
            .iter()
            .filter(|c| !world.is_satisfied(c))
            .cloned()
            .collect()
    }
}

/// Corrective hint ladder, from gentle to drastic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceAction {
    NpcHint,
    EnvironmentPressure,
    DeusExMachina,
    ReplanRoute,
}

impl ConvergenceAction {
    pub fn for_distance(distance: f64) -> Self {
        if distance < 0.5 {
            Self::NpcHint
        } else if distance < 0.7 {
            Self::EnvironmentPressure
        } else if distance < 0.9 {
            Self::DeusExMachina
        } else {
            Self::ReplanRoute
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawConvergenceCheck")]
pub struct ConvergenceCheck {
    pub next_anchor_id: String,
    distance: f64,
    pub convergence_needed: bool,
    #[serde(default)]
    pub suggested_action: Option<ConvergenceAction>,
}

#[derive(Deserialize)]
struct RawConvergenceCheck {
    next_anchor_id: String,
    distance: f64,
    convergence_needed: bool,
    #[serde(default)]
    suggested_action: Option<ConvergenceAction>,
}

impl TryFrom<RawConvergenceCheck> for ConvergenceCheck {
    type Error = SagaError;

    fn try_from(raw: RawConvergenceCheck) -> Result<Self> {
        if !(0.0..=1.0).contains(&raw.distance) {
            return Err(SagaError::validation(
                "convergence_check.distance",
                format!("must be in [0.0, 1.0], got {}", raw.distance),
            ));
        }
        Ok(Self {
            next_anchor_id: raw.next_anchor_id,
            distance: raw.distance,
            convergence_needed: raw.convergence_needed,
            suggested_action: raw.suggested_action,
        })
    }
}

impl ConvergenceCheck {
    pub fn new(
        next_anchor_id: impl Into<String>,
        distance: f64,
        convergence_needed: bool,
        suggested_action: Option<ConvergenceAction>,
    ) -> Result<Self> {
        RawConvergenceCheck {
            next_anchor_id: next_anchor_id.into(),
            distance,
            convergence_needed,
            suggested_action,
        }
        .try_into()
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReplanRequest")]
pub struct ReplanRequest {
    pub current_scene_id: String,
    pub target_anchor_id: String,
    pub world_state_snapshot: WorldState,
    failed_conditions: Vec<String>,
    /// Entities touched since the last anchor; scopes invalidation.
    #[serde(default)]
    pub changed_entities: Vec<String>,
}

#[derive(Deserialize)]
struct RawReplanRequest {
    current_scene_id: String,
    target_anchor_id: String,
    world_state_snapshot: WorldState,
    failed_conditions: Vec<String>,
    #[serde(default)]
    changed_entities: Vec<String>,
}

impl TryFrom<RawReplanRequest> for ReplanRequest {
    type Error = SagaError;

    fn try_from(raw: RawReplanRequest) -> Result<Self> {
        if raw.failed_conditions.is_empty() {
            return Err(SagaError::validation(
                "replan_request.failed_conditions",
                "must not be empty",
            ));
        }
        Ok(Self {
            current_scene_id: raw.current_scene_id,
            target_anchor_id: raw.target_anchor_id,
            world_state_snapshot: raw.world_state_snapshot,
            failed_conditions: raw.failed_conditions,
            changed_entities: raw.changed_entities,
        })
    }
}

impl ReplanRequest {
    pub fn new(
        current_scene_id: impl Into<String>,
        target_anchor_id: impl Into<String>,
        world_state_snapshot: WorldState,
        failed_conditions: Vec<String>,
    ) -> Result<Self> {
        RawReplanRequest {
            current_scene_id: current_scene_id.into(),
            target_anchor_id: target_anchor_id.into(),
            world_state_snapshot,
            failed_conditions,
            changed_entities: Vec::new(),
        }
        .try_into()
    }

    pub fn with_changed_entities(mut self, entities: Vec<String>) -> Self {
        self.changed_entities = entities;
        self
    }

    pub fn failed_conditions(&self) -> &[String] {
        &self.failed_conditions
    }
}

/// Closed set of replanning outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanReason {
    Recoverable,
    SoftAnchor,
    FlexibleAnchor,
    HardAnchorUnreachable,
}

impl ReplanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recoverable => "recoverable",
            Self::SoftAnchor => "soft_anchor",
            Self::FlexibleAnchor => "flexible_anchor",
            Self::HardAnchorUnreachable => "hard_anchor_unreachable",
        }
    }
}

/// A bridging chapter proposed by the replanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeChapter {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub goal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReplanResult")]
pub struct ReplanResult {
    pub success: bool,
    pub new_chapters: Vec<BridgeChapter>,
    #[serde(default)]
    pub modified_anchor: Option<Anchor>,
    reason: String,
    #[serde(default)]
    pub invalidated_scenes: Vec<String>,
}

#[derive(Deserialize)]
struct RawReplanResult {
    success: bool,
    new_chapters: Vec<BridgeChapter>,
    #[serde(default)]
    modified_anchor: Option<Anchor>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    invalidated_scenes: Vec<String>,
}

impl TryFrom<RawReplanResult> for ReplanResult {
    type Error = SagaError;

    fn try_from(raw: RawReplanResult) -> Result<Self> {
        let reason = raw
            .reason
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| SagaError::validation("replan_result.reason", "is required"))?;
        Ok(Self {
            success: raw.success,
            new_chapters: raw.new_chapters,
            modified_anchor: raw.modified_anchor,
            reason,
            invalidated_scenes: raw.invalidated_scenes,
        })
    }
}

impl ReplanResult {
    pub fn new(
        success: bool,
        new_chapters: Vec<BridgeChapter>,
        modified_anchor: Option<Anchor>,
        reason: impl Into<String>,
    ) -> Result<Self> {
        RawReplanResult {
            success,
            new_chapters,
            modified_anchor,
            reason: Some(reason.into()),
            invalidated_scenes: Vec::new(),
        }
        .try_into()
    }

    pub(crate) fn from_reason(
        success: bool,
        new_chapters: Vec<BridgeChapter>,
        modified_anchor: Option<Anchor>,
        reason: ReplanReason,
    ) -> Self {
        Self {
            success,
            new_chapters,
            modified_anchor,
            reason: reason.as_str().to_string(),
            invalidated_scenes: Vec::new(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}
