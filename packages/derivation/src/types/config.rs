//! Configuration for the computation engine.

use std::time::Duration;

/// Configuration for label computation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock budget for a single reducer invocation.
    ///
    /// Reducer scripts are user-supplied; exceeding the budget is a
    /// per-row failure, not a fatal error for the run. Default: 1s.
    pub reducer_budget: Duration,

    /// Memory cap for the reducer script runtime, in bytes.
    ///
    /// Default: 16 MiB.
    pub reducer_memory_limit: usize,

    /// Maximum rows a single label may produce for one run.
    ///
    /// Guards against runaway NxN products. Rows past the cap are
    /// dropped and the truncation is logged. Default: 10,000.
    pub max_rows_per_label: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reducer_budget: Duration::from_secs(1),
            reducer_memory_limit: 16 * 1024 * 1024,
            max_rows_per_label: 10_000,
        }
    }
}

impl EngineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reducer execution budget.
    pub fn with_reducer_budget(mut self, budget: Duration) -> Self {
        self.reducer_budget = budget;
        self
    }

    /// Set the reducer memory limit.
    pub fn with_reducer_memory_limit(mut self, bytes: usize) -> Self {
        self.reducer_memory_limit = bytes;
        self
    }

    /// Set the per-label row cap.
    pub fn with_max_rows_per_label(mut self, rows: usize) -> Self {
        self.max_rows_per_label = rows;
        self
    }
}
