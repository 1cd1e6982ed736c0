//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use crate::error::Result;
use crate::traits::store::LabelValueStore;
use crate::types::{LabelId, LabelValue, LabelValueId, RunId};

/// In-memory label value store.
///
/// The default backend for tests and single-process deployments; data is
/// lost on restart. Writes take the lock exclusively, so readers see
/// either the old or the new set of a `(label, run)` pair, never a
/// partial one.
pub struct MemoryStore {
    // BTreeMap keyed (run, label) keeps per-run iteration deterministic:
    // v7 label ids sort by creation time.
    values: RwLock<BTreeMap<(RunId, LabelId), Vec<LabelValue>>>,
    dirty: RwLock<HashSet<(LabelId, RunId)>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
            dirty: RwLock::new(HashSet::new()),
        }
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.values.write().unwrap().clear();
        self.dirty.write().unwrap().clear();
    }

    /// Total number of stored values.
    pub fn value_count(&self) -> usize {
        self.values.read().unwrap().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl LabelValueStore for MemoryStore {
    async fn replace(
        &self,
        label_id: LabelId,
        run_id: RunId,
        rows: Vec<LabelValue>,
    ) -> Result<()> {
        self.values
            .write()
            .unwrap()
            .insert((run_id, label_id), rows);
        self.dirty.write().unwrap().remove(&(label_id, run_id));
        Ok(())
    }

    async fn values_for(&self, label_id: LabelId, run_id: RunId) -> Result<Vec<LabelValue>> {
        Ok(self
            .values
            .read()
            .unwrap()
            .get(&(run_id, label_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn values_for_run(&self, run_id: RunId) -> Result<Vec<LabelValue>> {
        Ok(self
            .values
            .read()
            .unwrap()
            .iter()
            .filter(|((r, _), _)| *r == run_id)
            .flat_map(|(_, rows)| rows.iter().cloned())
            .collect())
    }

    async fn values_referencing(&self, id: LabelValueId) -> Result<Vec<LabelValue>> {
        Ok(self
            .values
            .read()
            .unwrap()
            .values()
            .flatten()
            .filter(|v| v.lineage.contains(&id))
            .cloned()
            .collect())
    }

    async fn mark_dirty(&self, pairs: &[(LabelId, RunId)]) -> Result<()> {
        self.dirty.write().unwrap().extend(pairs.iter().copied());
        Ok(())
    }

    async fn is_dirty(&self, label_id: LabelId, run_id: RunId) -> Result<bool> {
        Ok(self.dirty.read().unwrap().contains(&(label_id, run_id)))
    }
}
