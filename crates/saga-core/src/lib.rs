//! Saga Core - multi-agent story simulation kernel
//!
//! This crate runs scenes as rounds of simultaneous agent turns, arbitrated
//! by a world master, measured against narrative anchors, and replanned
//! when an anchor drifts out of reach. Every completed round is appended
//! to a simulation log through a pluggable store.

pub mod adapters;
pub mod config;
pub mod error;
pub mod kernel;
pub mod model;
pub mod state;
pub mod store;

pub use adapters::{AgentDecider, CharacterValidation, PlainRenderer, Renderer, ScriptedAgent};
pub use config::SagaConfig;
pub use error::{Result, SagaError};
pub use kernel::{
    AnchorReplanner, ConvergenceMonitor, HaltReason, SceneRun, SimulationEngine, WorldMaster,
};
pub use state::{DependencyMatrix, DependencyMatrixCache};
pub use store::{JsonlStore, MemoryStore, SimulationStore};
