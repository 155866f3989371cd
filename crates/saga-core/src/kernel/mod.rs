//! Kernel - arbitration, convergence, replanning, and the round loop.

mod arbitrator;
mod convergence;
mod injection;
mod pacing;
mod replanner;
mod simulation;

pub use arbitrator::{
    ActionRule, ConflictPolicy, DetectedConflict, PowerRankPolicy, Ruling, Settlement, WorldMaster,
};
pub use convergence::ConvergenceMonitor;
pub use injection::{calculate_info_gain, force_conflict_escalation, inject_breaking_incident};
pub use replanner::{AnchorReplanner, GapAnalysis, ImpactScope};
pub use simulation::{HaltReason, SceneRun, SimulationEngine};
