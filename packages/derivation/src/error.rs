//! Typed errors for the derivation engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

/// Errors that can occur during label computation and row assembly.
#[derive(Debug, Error)]
pub enum DerivationError {
    /// Label configuration is invalid (cycles, unresolved references)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A label referenced during assembly is not part of the graph
    #[error("unknown label: {label_id}")]
    UnknownLabel { label_id: crate::types::LabelId },

    /// Computation for a run failed and should be retried
    #[error("run {run_id} needs retry: {reason}")]
    RunNeedsRetry {
        run_id: crate::types::RunId,
        reason: String,
    },
}

/// Label configuration errors, detected before any computation starts.
///
/// These are surfaced to the label author; no partial state is written.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A label's extractors reference the label itself
    #[error("label '{label}' references itself")]
    SelfReference { label: String },

    /// The label dependency graph contains a cycle
    #[error("cyclic label dependency involving '{label}'")]
    CycleDetected { label: String },

    /// An extractor references a label name no label resolves to
    #[error("label '{label}' references unknown label '{reference}'")]
    UnresolvedReference { label: String, reference: String },

    /// Several labels match a reference and none is preferred
    #[error("label '{label}' reference '{reference}' is ambiguous ({candidates} candidates)")]
    AmbiguousReference {
        label: String,
        reference: String,
        candidates: usize,
    },
}

/// Reducer script evaluation errors.
///
/// These affect a single output row, never the whole label computation.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The script is not a valid function expression
    #[error("reducer failed to compile: {0}")]
    Compile(String),

    /// The script threw
    #[error("reducer threw: {0}")]
    Exception(String),

    /// The execution budget was exhausted
    #[error("reducer exceeded its execution budget")]
    Timeout,

    /// The script returned a value with no JSON representation
    #[error("reducer returned a non-JSON-representable value")]
    Unrepresentable,

    /// The underlying script engine failed
    #[error("script engine error: {0}")]
    Engine(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, DerivationError>;

/// Result type alias for configuration validation.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for reducer evaluation.
pub type EvalResult<T> = std::result::Result<T, EvalError>;
