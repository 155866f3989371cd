//! JSONL store - durable, append-only round log.
//!
//! Round records go to `.saga/simulation.jsonl`, one entry per line. Story
//! structure (acts, chapters, anchors) is delegated to an in-memory store.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{
    check_round_order, ActRecord, ChapterRecord, MemoryStore, SceneEntityIndex, SimulationStore,
};
use crate::error::{Result, SagaError};
use crate::model::{Anchor, SimulationLogEntry};

fn unavailable(path: &Path, err: std::io::Error) -> SagaError {
    SagaError::StorageUnavailable(format!("{}: {err}", path.display()))
}

/// Rounds already in the file for one scene.
#[derive(Debug, Default)]
struct SceneRounds {
    last: u32,
    ids: HashSet<String>,
}

pub struct JsonlStore {
    log_path: PathBuf,
    structure: MemoryStore,
    /// Seeded from the file on the first write, then kept in step with
    /// appends. Held across each append so writes are serialized.
    rounds: Mutex<Option<HashMap<String, SceneRounds>>>,
}

impl JsonlStore {
    pub fn new(project_root: &Path) -> Self {
        Self::with_structure(project_root, MemoryStore::new())
    }

    /// Use a pre-populated store for acts, chapters, and anchors.
    pub fn with_structure(project_root: &Path, structure: MemoryStore) -> Self {
        Self {
            log_path: project_root.join(".saga/simulation.jsonl"),
            structure,
            rounds: Mutex::new(None),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn structure(&self) -> &MemoryStore {
        &self.structure
    }

    /// Every recorded entry, in file order. Unparseable lines are skipped.
    pub async fn read_all(&self) -> Result<Vec<SimulationLogEntry>> {
        let content = match tokio::fs::read_to_string(&self.log_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(&self.log_path, e)),
        };
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(error = %err, "Skipping malformed log line");
                    None
                }
            })
            .collect())
    }

    /// Last `limit` entries across all scenes.
    pub async fn read_recent(&self, limit: usize) -> Result<Vec<SimulationLogEntry>> {
        let mut entries = self.read_all().await?;
        if entries.len() > limit {
            entries.drain(0..entries.len() - limit);
        }
        Ok(entries)
    }
}

#[async_trait]
impl SimulationStore for JsonlStore {
    async fn create_simulation_log(&self, entry: SimulationLogEntry) -> Result<SimulationLogEntry> {
        let scene = entry.scene_id().unwrap_or_default().to_string();
        let mut rounds = self.rounds.lock().await;
        if rounds.is_none() {
            let mut seeded: HashMap<String, SceneRounds> = HashMap::new();
            for logged in self.read_all().await? {
                let slot = seeded
                    .entry(logged.scene_id().unwrap_or_default().to_string())
                    .or_default();
                slot.last = slot.last.max(logged.round_number);
                slot.ids.insert(logged.id);
            }
            *rounds = Some(seeded);
        }
        let index = rounds.get_or_insert_with(HashMap::new);
        let known = index.entry(scene).or_default();
        if check_round_order(known.last, known.ids.contains(&entry.id), &entry)? {
            // Append-only: the first record for an id stays authoritative.
            tracing::debug!(log_id = %entry.id, "Round already logged");
            return Ok(entry);
        }

        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable(parent, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(|e| unavailable(&self.log_path, e))?;

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| unavailable(&self.log_path, e))?;
        file.flush().await.map_err(|e| unavailable(&self.log_path, e))?;

        known.last = known.last.max(entry.round_number);
        known.ids.insert(entry.id.clone());
        Ok(entry)
    }

    async fn list_simulation_logs(&self, scene_id: &str) -> Result<Vec<SimulationLogEntry>> {
        let mut entries: Vec<SimulationLogEntry> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.scene_id() == Some(scene_id))
            .collect();
        entries.sort_by_key(|e| e.round_number);
        Ok(entries)
    }

    async fn create_act(
        &self,
        root_id: &str,
        seq: u32,
        title: &str,
        purpose: &str,
        tone: &str,
    ) -> Result<ActRecord> {
        self.structure.create_act(root_id, seq, title, purpose, tone).await
    }

    async fn list_acts(&self, root_id: &str) -> Result<Vec<ActRecord>> {
        self.structure.list_acts(root_id).await
    }

    async fn create_chapter(
        &self,
        act_id: &str,
        seq: u32,
        title: &str,
        focus: &str,
    ) -> Result<ChapterRecord> {
        self.structure.create_chapter(act_id, seq, title, focus).await
    }

    async fn list_chapters(&self, act_id: &str) -> Result<Vec<ChapterRecord>> {
        self.structure.list_chapters(act_id).await
    }

    async fn mark_anchor_achieved(
        &self,
        anchor_id: &str,
        scene_version_id: &str,
    ) -> Result<Anchor> {
        self.structure.mark_anchor_achieved(anchor_id, scene_version_id).await
    }

    async fn next_unachieved_anchor(
        &self,
        root_id: &str,
        branch_id: &str,
    ) -> Result<Option<Anchor>> {
        self.structure.next_unachieved_anchor(root_id, branch_id).await
    }

    async fn scene_entities(&self, root_id: &str, branch_id: &str) -> Result<SceneEntityIndex> {
        self.structure.scene_entities(root_id, branch_id).await
    }
}
