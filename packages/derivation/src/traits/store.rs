//! Storage trait for computed label values.
//!
//! The store is the only stateful component of the engine. Any backend
//! satisfying these access patterns is conformant: values are queryable by
//! (label, run), by run, and by lineage reference.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{LabelId, LabelValue, LabelValueId, RunId};

/// Persistence seam for label values and dirty tracking.
#[async_trait]
pub trait LabelValueStore: Send + Sync {
    /// Atomically discard any previous values for `(label, run)` and
    /// insert the new set.
    ///
    /// Must be isolated: a concurrent reader sees either the old set or
    /// the new set, never a partial one. Clears the dirty mark for the
    /// pair. Later labels in a computation pass read earlier labels'
    /// freshly written rows, so read-after-write consistency is required.
    async fn replace(&self, label_id: LabelId, run_id: RunId, rows: Vec<LabelValue>)
        -> Result<()>;

    /// All values for one `(label, run)` pair, in insertion order.
    async fn values_for(&self, label_id: LabelId, run_id: RunId) -> Result<Vec<LabelValue>>;

    /// All values for a run, across labels, in insertion order per label.
    async fn values_for_run(&self, run_id: RunId) -> Result<Vec<LabelValue>>;

    /// All values whose lineage directly references the given value.
    async fn values_referencing(&self, id: LabelValueId) -> Result<Vec<LabelValue>>;

    /// Mark `(label, run)` pairs as stale after a definition edit.
    async fn mark_dirty(&self, pairs: &[(LabelId, RunId)]) -> Result<()>;

    /// Whether a `(label, run)` pair awaits recomputation.
    ///
    /// This is what distinguishes "computed to nothing" from "not yet
    /// computed" when a pair has zero values.
    async fn is_dirty(&self, label_id: LabelId, run_id: RunId) -> Result<bool>;
}
