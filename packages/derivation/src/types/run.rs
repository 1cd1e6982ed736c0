//! Runs - the immutable input units labels are computed over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{GroupId, RunId};

/// One uploaded test-run document.
///
/// Immutable once ingested; the ingestion collaborator makes a run
/// available before computation is triggered for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    /// Group (test) this run belongs to
    pub group_id: GroupId,
    /// The raw run document
    pub data: Value,
    /// The run's metadata document (environment, host, tags)
    pub metadata: Value,
    pub started_at: DateTime<Utc>,
}

impl Run {
    /// Create a run with a fresh id, starting now.
    pub fn new(group_id: GroupId, data: Value, metadata: Value) -> Self {
        Self {
            id: RunId::new(),
            group_id,
            data,
            metadata,
            started_at: Utc::now(),
        }
    }
}
