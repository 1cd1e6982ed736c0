//! Reducer evaluation seam.
//!
//! The engine does not assume any particular scripting engine, only this
//! contract: evaluate a user-supplied expression against a JSON value and
//! return a JSON value or an error, within a bounded execution budget.

use std::time::Duration;

use serde_json::Value;

use crate::error::EvalResult;

/// Injected capability for evaluating reducer scripts.
///
/// Evaluation is synchronous and sandboxed: no network or filesystem
/// access may be observable from a script. A timeout is a per-row
/// failure, never a fatal error for a run.
pub trait ReducerEngine: Send + Sync {
    /// Apply `script` (a function expression) to `input`.
    fn evaluate(&self, script: &str, input: &Value, budget: Duration) -> EvalResult<Value>;
}
