//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the derivation
//! library without embedding a real script engine.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;

use crate::error::{EvalError, EvalResult};
use crate::traits::ReducerEngine;

type Behavior = Box<dyn Fn(&Value) -> EvalResult<Value> + Send + Sync>;

/// A mock reducer engine for testing.
///
/// Responses are keyed by script text. Unknown scripts echo their input
/// back, so a pass-through pipeline needs no setup at all.
#[derive(Clone, Default)]
pub struct MockReducer {
    /// Fixed responses by script text
    responses: Arc<RwLock<HashMap<String, Value>>>,

    /// Computed responses by script text
    behaviors: Arc<RwLock<HashMap<String, Behavior>>>,

    /// Scripts that fail every invocation
    failing: Arc<RwLock<HashSet<String>>>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockReducerCall>>>,
}

/// Record of a call made to the mock reducer.
#[derive(Debug, Clone)]
pub struct MockReducerCall {
    pub script: String,
    pub input: Value,
}

impl MockReducer {
    /// Create a new mock reducer with identity behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fixed response for a script.
    pub fn with_response(self, script: impl Into<String>, response: Value) -> Self {
        self.responses
            .write()
            .unwrap()
            .insert(script.into(), response);
        self
    }

    /// Add a computed response for a script.
    pub fn with_behavior(
        self,
        script: impl Into<String>,
        behavior: impl Fn(&Value) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.behaviors
            .write()
            .unwrap()
            .insert(script.into(), Box::new(behavior));
        self
    }

    /// Make every invocation of a script fail.
    pub fn with_failure(self, script: impl Into<String>) -> Self {
        self.failing.write().unwrap().insert(script.into());
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockReducerCall> {
        self.calls.read().unwrap().clone()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }
}

impl ReducerEngine for MockReducer {
    fn evaluate(&self, script: &str, input: &Value, _budget: Duration) -> EvalResult<Value> {
        self.calls.write().unwrap().push(MockReducerCall {
            script: script.to_string(),
            input: input.clone(),
        });

        if self.failing.read().unwrap().contains(script) {
            return Err(EvalError::Exception("mock failure".to_string()));
        }

        if let Some(behavior) = self.behaviors.read().unwrap().get(script) {
            return behavior(input);
        }

        // Fixed response, or echo the input back
        Ok(self
            .responses
            .read()
            .unwrap()
            .get(script)
            .cloned()
            .unwrap_or_else(|| input.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn budget() -> Duration {
        Duration::from_secs(1)
    }

    #[test]
    fn unknown_script_echoes_input() {
        let reducer = MockReducer::new();
        let result = reducer.evaluate("whatever", &json!({"a": 1}), budget()).unwrap();
        assert_eq!(result, json!({"a": 1}));
    }

    #[test]
    fn fixed_response_wins_over_echo() {
        let reducer = MockReducer::new().with_response("sum", json!(42));
        let result = reducer.evaluate("sum", &json!([1, 2]), budget()).unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn behavior_computes_from_input() {
        let reducer = MockReducer::new().with_behavior("count", |input| {
            Ok(json!(input.as_array().map_or(0, Vec::len)))
        });
        let result = reducer.evaluate("count", &json!([1, 2, 3]), budget()).unwrap();
        assert_eq!(result, json!(3));
    }

    #[test]
    fn failure_and_call_recording() {
        let reducer = MockReducer::new().with_failure("boom");
        let err = reducer.evaluate("boom", &json!(null), budget()).unwrap_err();
        assert!(matches!(err, EvalError::Exception(_)));

        let calls = reducer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].script, "boom");
    }
}
