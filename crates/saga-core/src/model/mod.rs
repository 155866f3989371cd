//! Data model - BDI state, anchors, scene context, and round records.

mod anchor;
mod bdi;
mod round;
mod scene;

pub use anchor::{
    Anchor, BridgeChapter, ConstraintType, ConvergenceAction, ConvergenceCheck, ReplanReason,
    ReplanRequest, ReplanResult,
};
pub use bdi::{BdiState, Desire, DesireType, Intention, IntentionActionType};
pub use round::{
    ActionOutcome, ActionResult, AgentAction, ChangeKind, ConflictKind, ConflictResolution,
    DmArbitration, EnvironmentChange, NarrativeEvent, PacingDirective, PacingKind, SeedType,
    SensorySeed, SimulationLogEntry, SimulationRoundResult, SubmittedAction,
    PASSIVE_ACTION_TYPES,
};
pub use scene::{SceneContext, WorldState};
