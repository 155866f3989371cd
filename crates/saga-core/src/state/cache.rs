//! Build cache for dependency matrices, keyed by story root and branch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;

use super::matrix::DependencyMatrix;
use crate::error::Result;

type Key = (String, String);
type Slot = Arc<OnceCell<Arc<DependencyMatrix>>>;

/// Memoizes one matrix per `(root_id, branch_id)`.
///
/// At most one build runs per key: concurrent callers wait on the in-flight
/// build. Entries never expire; `invalidate` drops the cached or in-flight
/// entry outright and the next lookup rebuilds from scratch.
#[derive(Debug, Default)]
pub struct DependencyMatrixCache {
    slots: Mutex<HashMap<Key, Slot>>,
}

impl DependencyMatrixCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Key, Slot>> {
        // the map is only touched under short, non-panicking critical sections
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn get_or_build<F, Fut>(
        &self,
        root_id: &str,
        branch_id: &str,
        builder: F,
    ) -> Result<Arc<DependencyMatrix>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DependencyMatrix>>,
    {
        let slot = {
            let mut slots = self.slots();
            Arc::clone(
                slots
                    .entry((root_id.to_string(), branch_id.to_string()))
                    .or_default(),
            )
        };

        let matrix = slot
            .get_or_try_init(|| async {
                tracing::debug!(root_id = %root_id, branch_id = %branch_id, "Building dependency matrix");
                builder().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(matrix))
    }

    /// Drop the entry for a key. Returns whether one existed.
    pub fn invalidate(&self, root_id: &str, branch_id: &str) -> bool {
        let removed = self
            .slots()
            .remove(&(root_id.to_string(), branch_id.to_string()))
            .is_some();
        if removed {
            tracing::debug!(root_id = %root_id, branch_id = %branch_id, "Invalidated dependency matrix");
        }
        removed
    }

    /// Whether a finished build is cached for the key.
    pub fn is_cached(&self, root_id: &str, branch_id: &str) -> bool {
        self.slots()
            .get(&(root_id.to_string(), branch_id.to_string()))
            .map_or(false, |slot| slot.initialized())
    }
}
