//! Adapters - collaborator ports consumed by the kernel.
//!
//! Concrete agents and renderers are opaque to the round loop: LLM-backed,
//! scripted, and test doubles all sit behind these traits.

mod plain;
mod scripted;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AgentAction, SceneContext, SimulationRoundResult};

pub use plain::PlainRenderer;
pub use scripted::{ScriptStep, ScriptedAgent};

/// One character agent's decision capability.
#[async_trait]
pub trait AgentDecider: Send + Sync {
    /// Identifier the agent acts under.
    fn agent_id(&self) -> &str;

    /// Decide this round's action. Errors fail the whole round.
    async fn decide(&self, agent_id: &str, scene: &SceneContext) -> Result<AgentAction>;
}

/// Final narrative rendering of a simulated scene.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, rounds: &[SimulationRoundResult], scene: &SceneContext)
        -> Result<String>;
}

/// Structured generation used by entity resolution.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// Map each mention in `payload` to an entity id.
    async fn generate_structured(
        &self,
        payload: &serde_json::Value,
    ) -> Result<HashMap<String, String>>;
}

/// Checks that the agents cast in a scene are known characters.
#[async_trait]
pub trait CharacterValidator: Send + Sync {
    async fn validate_characters(&self, agent_ids: &[String], scene: &SceneContext) -> Result<()>;
}

/// Whether the engine validates its cast before a scene, fixed at construction.
#[derive(Clone, Default)]
pub enum CharacterValidation {
    #[default]
    Disabled,
    Enabled(Arc<dyn CharacterValidator>),
}

impl std::fmt::Debug for CharacterValidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::Enabled(_) => f.write_str("Enabled(..)"),
        }
    }
}

impl CharacterValidation {
    pub async fn check(&self, agent_ids: &[String], scene: &SceneContext) -> Result<()> {
        match self {
            Self::Disabled => Ok(()),
            Self::Enabled(validator) => validator.validate_characters(agent_ids, scene).await,
        }
    }
}
