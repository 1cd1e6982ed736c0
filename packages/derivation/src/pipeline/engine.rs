//! The Engine - main entry point for label computation.
//!
//! Computation for a single run walks the labels in dependency order:
//! resolve extractors, combine, reduce, persist. Later labels read
//! earlier labels' freshly stored rows, so the pass is single-threaded
//! per run. Different runs share nothing but the (read-only) label
//! definitions and may be computed concurrently.

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::{DerivationError, Result};
use crate::graph::DependencyGraph;
use crate::pipeline::combine::combine;
use crate::pipeline::reduce::reduce;
use crate::pipeline::resolve::{resolve_extractors, ComputedValues};
use crate::traits::{LabelValueStore, ReducerEngine};
use crate::types::{EngineConfig, Label, LabelId, LabelValue, Run, RunId};

/// The derived-value computation engine.
///
/// Generic over the storage backend and the reducer script engine - the
/// two injected capabilities the core does not implement itself.
pub struct Engine<S: LabelValueStore, R: ReducerEngine> {
    store: S,
    reducer: R,
    config: EngineConfig,
}

/// Outcome of computing all labels of a group for one run.
#[derive(Debug, Clone, Default)]
pub struct ComputeReport {
    /// Rows written per label, in computation order
    pub rows_written: Vec<(LabelId, usize)>,
    /// Rows dropped by the per-label cap
    pub rows_truncated: usize,
}

impl ComputeReport {
    /// Total rows written across labels.
    pub fn total_rows(&self) -> usize {
        self.rows_written.iter().map(|(_, n)| n).sum()
    }
}

/// Outcome of a bulk recomputation over many runs.
///
/// Runs are processed independently; a failed run never aborts the batch.
#[derive(Debug, Clone, Default)]
pub struct RecomputeReport {
    pub succeeded: Vec<RunId>,
    /// Runs needing retry, with the failure reason
    pub failed: Vec<(RunId, String)>,
}

impl<S: LabelValueStore, R: ReducerEngine> Engine<S, R> {
    /// Create a new engine.
    pub fn new(store: S, reducer: R) -> Self {
        Self {
            store,
            reducer,
            config: EngineConfig::default(),
        }
    }

    /// Create with custom configuration.
    pub fn with_config(store: S, reducer: R, config: EngineConfig) -> Self {
        Self {
            store,
            reducer,
            config,
        }
    }

    /// The storage backend.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute all labels of a group for one run.
    ///
    /// Fails fast on configuration errors before writing anything. A
    /// storage failure rolls back the affected label (replace is atomic)
    /// and reports the run as needing retry.
    pub async fn compute_labels(&self, labels: &[Label], run: &Run) -> Result<ComputeReport> {
        let graph = DependencyGraph::build(labels)?;
        self.compute_with_graph(&graph, run).await
    }

    async fn compute_with_graph(&self, graph: &DependencyGraph, run: &Run) -> Result<ComputeReport> {
        let mut computed = ComputedValues::new();
        let mut report = ComputeReport::default();

        for &label_id in graph.order() {
            let label = graph
                .label(label_id)
                .ok_or(DerivationError::UnknownLabel { label_id })?;

            let resolved = resolve_extractors(label, run, &computed, graph);
            let bundles = combine(label, &resolved);
            let mut rows = reduce(label, &resolved, bundles, &self.reducer, &self.config);

            if rows.len() > self.config.max_rows_per_label {
                warn!(
                    label = %label.name,
                    produced = rows.len(),
                    cap = self.config.max_rows_per_label,
                    "label exceeded the row cap; truncating"
                );
                report.rows_truncated += rows.len() - self.config.max_rows_per_label;
                rows.truncate(self.config.max_rows_per_label);
            }

            let values: Vec<LabelValue> = rows
                .into_iter()
                .map(|row| {
                    let mut value = LabelValue::new(label.id, run.id, row.value)
                        .with_lineage(row.lineage.into_iter().collect());
                    value.is_iterated = row.is_iterated;
                    value
                })
                .collect();

            debug!(label = %label.name, rows = values.len(), "computed label");
            self.store
                .replace(label.id, run.id, values.clone())
                .await
                .map_err(|error| DerivationError::RunNeedsRetry {
                    run_id: run.id,
                    reason: error.to_string(),
                })?;

            report.rows_written.push((label.id, values.len()));
            computed.insert(label.id, values);
        }

        Ok(report)
    }

    /// Mark a label and its descendants stale for the given runs.
    ///
    /// This is the invalidation command issued after a definition edit;
    /// previously computed values stay readable until `recompute`
    /// replaces them. Returns the affected label ids.
    pub async fn invalidate(
        &self,
        label_id: LabelId,
        labels: &[Label],
        runs: &[RunId],
    ) -> Result<Vec<LabelId>> {
        let graph = DependencyGraph::build(labels)?;
        let affected = graph.descendants(label_id);
        let pairs: Vec<(LabelId, RunId)> = affected
            .iter()
            .flat_map(|&l| runs.iter().map(move |&r| (l, r)))
            .collect();
        self.store.mark_dirty(&pairs).await?;
        info!(
            label = %label_id,
            descendants = affected.len(),
            runs = runs.len(),
            "invalidated label values"
        );
        Ok(affected)
    }

    /// Recompute every run, each in its own pass.
    ///
    /// Configuration errors fail the whole batch up front; per-run
    /// failures are collected so the batch is resumable - already
    /// processed runs stay valid.
    pub async fn recompute(&self, labels: &[Label], runs: &[Run]) -> Result<RecomputeReport> {
        let graph = DependencyGraph::build(labels)?;
        let mut report = RecomputeReport::default();
        for run in runs {
            match self.compute_with_graph(&graph, run).await {
                Ok(_) => report.succeeded.push(run.id),
                Err(error) => {
                    warn!(run = %run.id, %error, "run failed; continuing with the rest");
                    report.failed.push((run.id, error.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Recompute runs concurrently with bounded parallelism.
    ///
    /// Safe because runs share no state; each run's pass is still
    /// strictly ordered internally.
    pub async fn recompute_concurrent(
        &self,
        labels: &[Label],
        runs: &[Run],
        parallelism: usize,
    ) -> Result<RecomputeReport> {
        let graph = DependencyGraph::build(labels)?;
        let results: Vec<(RunId, Result<ComputeReport>)> = stream::iter(runs)
            .map(|run| {
                let graph = &graph;
                async move { (run.id, self.compute_with_graph(graph, run).await) }
            })
            .buffer_unordered(parallelism.max(1))
            .collect()
            .await;

        let mut report = RecomputeReport::default();
        for (run_id, result) in results {
            match result {
                Ok(_) => report.succeeded.push(run_id),
                Err(error) => report.failed.push((run_id, error.to_string())),
            }
        }
        Ok(report)
    }
}
