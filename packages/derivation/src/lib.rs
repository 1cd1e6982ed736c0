//! Derived-Value Computation Library
//!
//! A deterministic engine for computing user-defined derived metrics
//! ("labels") over immutable benchmark-run documents. Labels extract
//! values from run JSON via path expressions, combine multiple
//! extractors by zipping or cross-producting their iteration branches,
//! and optionally post-process each row with a sandboxed reducer script.
//!
//! # Design Philosophy
//!
//! - Declarative label definitions, not imperative queries
//! - Determinism: the same runs and labels always yield the same rows
//! - Lineage over joins: every derived row records which upstream rows
//!   produced it, so flattened tables fall out of id chasing
//! - Scripts are untrusted: reducers run sandboxed with a budget, and a
//!   bad script costs one row, never a run
//!
//! # Usage
//!
//! ```rust,ignore
//! use derivation::{Engine, Extractor, Label, MemoryStore};
//! use derivation::reducers::QuickJsReducer;
//!
//! let store = MemoryStore::new();
//! let engine = Engine::new(store, QuickJsReducer::new());
//!
//! let latency = Label::new("p99_latency", group_id)
//!     .with_extractor(Extractor::path("latencies", "$.timings.p99"))
//!     .with_reducer("(input) => input * 1000");
//!
//! let report = engine.compute_labels(&[latency], &run).await?;
//! ```
//!
//! # Modules
//!
//! - [`types`] - Domain types (Group, Label, Run, LabelValue)
//! - [`graph`] - Label dependency resolution and ordering
//! - [`traits`] - Core trait abstractions (LabelValueStore, ReducerEngine)
//! - [`pipeline`] - Extraction, combination, reduction, row assembly
//! - [`stores`] - Storage implementations (MemoryStore, etc.)
//! - [`reducers`] - Script engine implementations (QuickJsReducer)
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod graph;
pub mod pipeline;
pub mod reducers;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{ConfigError, DerivationError, EvalError};
pub use graph::DependencyGraph;
pub use traits::{LabelValueStore, ReducerEngine};
pub use types::{
    CombinationMode, EngineConfig, Extractor, ExtractorSource, Group, GroupId, Label, LabelId,
    LabelValue, LabelValueId, Run, RunId, ScalarMethod, ValueMap,
};

// Re-export pipeline components
pub use pipeline::{
    ComputeReport, ComputedValues, Engine, IterationKey, IterationSource, RecomputeReport,
    ResolvedExtractor, ResolvedPair, RowAssembler,
};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

// Re-export reducers
pub use reducers::QuickJsReducer;

// Re-export testing utilities
pub use testing::MockReducer;
