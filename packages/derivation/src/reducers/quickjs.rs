//! QuickJS-backed reducer evaluation.
//!
//! Each evaluation runs in a fresh runtime with a memory cap and an
//! interrupt-based deadline, so scripts cannot observe each other and a
//! runaway script costs at most one row.

use std::time::{Duration, Instant};

use rquickjs::{Context, Ctx, Function, Runtime, Value};
use serde_json::Value as Json;

use crate::error::{EvalError, EvalResult};
use crate::traits::ReducerEngine;

const DEFAULT_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Network surfaces are replaced with inert stand-ins before any user
/// script runs. `fetch` accepts any arguments and returns undefined.
const SANDBOX_PRELUDE: &str = r#"
globalThis.fetch = function () {};
globalThis.XMLHttpRequest = class XMLHttpRequest {
    open() {}
    setRequestHeader() {}
    send() {}
    abort() {}
};
"#;

/// Evaluates reducer scripts inside an embedded QuickJS interpreter.
///
/// Scripts must be function expressions taking a single JSON argument.
/// Input and output cross the boundary as JSON text, so only
/// JSON-representable values can come back out.
#[derive(Debug, Clone)]
pub struct QuickJsReducer {
    memory_limit: usize,
}

impl QuickJsReducer {
    pub fn new() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    /// Cap the interpreter heap, in bytes.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }
}

impl Default for QuickJsReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReducerEngine for QuickJsReducer {
    fn evaluate(&self, script: &str, input: &Json, budget: Duration) -> EvalResult<Json> {
        let runtime = Runtime::new().map_err(engine_error)?;
        runtime.set_memory_limit(self.memory_limit);

        let deadline = Instant::now() + budget;
        runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));

        let context = Context::full(&runtime).map_err(engine_error)?;
        let payload = serde_json::to_string(input).map_err(|e| EvalError::Engine(e.to_string()))?;

        context.with(|ctx| {
            install_sandbox(&ctx).map_err(engine_error)?;

            // Wrapped in parens so both `input => ...` and
            // `function (input) { ... }` parse as expressions.
            let function: Function = ctx
                .eval(format!("({script})"))
                .map_err(|err| failure(&ctx, err, deadline, Phase::Compile))?;

            let argument = ctx.json_parse(payload).map_err(engine_error)?;
            let result: Value = function
                .call((argument,))
                .map_err(|err| failure(&ctx, err, deadline, Phase::Call))?;

            let serialized = ctx
                .json_stringify(result)
                .map_err(|err| failure(&ctx, err, deadline, Phase::Call))?;
            match serialized {
                Some(text) => {
                    let text = text.to_string().map_err(engine_error)?;
                    serde_json::from_str(&text).map_err(|e| EvalError::Engine(e.to_string()))
                }
                // JSON.stringify yields undefined for functions,
                // symbols and bare undefined.
                None => Err(EvalError::Unrepresentable),
            }
        })
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Compile,
    Call,
}

fn install_sandbox(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    ctx.eval::<(), _>(SANDBOX_PRELUDE)
}

fn engine_error(error: rquickjs::Error) -> EvalError {
    EvalError::Engine(error.to_string())
}

fn failure(ctx: &Ctx<'_>, error: rquickjs::Error, deadline: Instant, phase: Phase) -> EvalError {
    if Instant::now() >= deadline {
        return EvalError::Timeout;
    }
    match error {
        rquickjs::Error::Exception => {
            let message = caught_message(ctx);
            match phase {
                Phase::Compile => EvalError::Compile(message),
                Phase::Call => EvalError::Exception(message),
            }
        }
        other => EvalError::Engine(other.to_string()),
    }
}

fn caught_message(ctx: &Ctx<'_>) -> String {
    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        if let Some(message) = exception.message() {
            return message;
        }
    }
    caught
        .as_string()
        .and_then(|s| s.to_string().ok())
        .unwrap_or_else(|| "unknown error".to_string())
}
