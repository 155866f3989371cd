//! Persistence port and bundled stores.

mod jsonl;
mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::model::{Anchor, SimulationLogEntry};

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActRecord {
    pub id: String,
    pub root_id: String,
    pub sequence: u32,
    pub title: String,
    pub purpose: String,
    pub tone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub id: String,
    pub act_id: String,
    pub sequence: u32,
    pub title: String,
    pub focus: String,
    #[serde(default)]
    pub pov_character_id: Option<String>,
}

/// Forward index of a story branch: which entities each scene references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneEntityIndex {
    pub scene_entities: HashMap<String, Vec<String>>,
    pub scene_sequences: HashMap<String, u32>,
}

/// Storage collaborator. Failures to reach the backend surface as
/// `SagaError::StorageUnavailable` and are never swallowed.
#[async_trait]
pub trait SimulationStore: Send + Sync {
    /// Append a round record. Re-writing an existing id is a no-op: the
    /// first record stays authoritative and is what later reads return.
    async fn create_simulation_log(&self, entry: SimulationLogEntry) -> Result<SimulationLogEntry>;

    /// Round records of a scene, by round number.
    async fn list_simulation_logs(&self, scene_id: &str) -> Result<Vec<SimulationLogEntry>>;

    async fn create_act(
        &self,
        root_id: &str,
        seq: u32,
        title: &str,
        purpose: &str,
        tone: &str,
    ) -> Result<ActRecord>;

    /// Acts of a story root, by sequence.
    async fn list_acts(&self, root_id: &str) -> Result<Vec<ActRecord>>;

    async fn create_chapter(
        &self,
        act_id: &str,
        seq: u32,
        title: &str,
        focus: &str,
    ) -> Result<ChapterRecord>;

    /// Chapters of an act, by sequence.
    async fn list_chapters(&self, act_id: &str) -> Result<Vec<ChapterRecord>>;

    async fn mark_anchor_achieved(&self, anchor_id: &str, scene_version_id: &str)
        -> Result<Anchor>;

    /// Lowest-sequence anchor of the branch not yet achieved.
    async fn next_unachieved_anchor(&self, root_id: &str, branch_id: &str)
        -> Result<Option<Anchor>>;

    async fn scene_entities(&self, root_id: &str, branch_id: &str) -> Result<SceneEntityIndex>;
}

/// Round numbers must strictly increase per scene; an already logged id is a
/// re-write and returns `true`.
pub(crate) fn check_round_order(
    last_round: u32,
    already_logged: bool,
    entry: &SimulationLogEntry,
) -> Result<bool> {
    if entry.round_number == 0 {
        return Err(SagaError::validation(
            "simulation_log.round_number",
            "must start at 1",
        ));
    }
    if already_logged {
        return Ok(true);
    }
    if entry.round_number <= last_round {
        return Err(SagaError::validation(
            "simulation_log.round_number",
            format!("must be greater than {last_round}, got {}", entry.round_number),
        ));
    }
    Ok(false)
}
