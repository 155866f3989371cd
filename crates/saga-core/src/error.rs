//! Error taxonomy for the simulation kernel.

use thiserror::Error;

/// Errors surfaced by the simulation kernel.
///
/// Arbitration conflicts and replanning failures are not errors; they are
/// returned as data (`DmArbitration::conflicts_resolved`, `ReplanResult`).
#[derive(Debug, Error)]
pub enum SagaError {
    /// Misconfiguration. Fatal, raised eagerly, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed input rejected at the boundary before any state mutation.
    #[error("{field} {reason}")]
    Validation { field: String, reason: String },

    /// The persistence collaborator could not be reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// An agent decision call failed; the whole round fails with it.
    #[error("agent {agent_id} failed to decide: {reason}")]
    Agent { agent_id: String, reason: String },

    #[error("render failed: {0}")]
    Render(String),

    /// A collaborator call exceeded its timeout. Retrying is the caller's call.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::StorageUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, SagaError>;
