//! Rhai implementation of [`SnippetExecutor`].
//!
//! The engine and its scope live behind `Arc<Mutex<..>>` and every snippet
//! is evaluated on the blocking pool, so a long snippet never stalls the
//! runtime. `print` and `debug` inside snippets go to the `snippet` log
//! target.

use super::{SnippetError, SnippetExecutor};
use async_trait::async_trait;
use rhai::{Engine, EvalAltResult, Scope};
use std::sync::{Arc, Mutex, PoisonError};

/// Rhai-backed snippet executor with a persistent scope.
pub struct RhaiEngine {
    engine: Arc<Mutex<Engine>>,
    scope: Arc<Mutex<Scope<'static>>>,
}

impl RhaiEngine {
    /// Create an engine that aborts a snippet after `max_operations`
    /// operations.
    pub fn new(max_operations: u64) -> Self {
        let mut engine = Engine::new();

        engine.on_progress(move |count| {
            if count > max_operations {
                Some(format!("Safety limit exceeded: maximum {max_operations} operations").into())
            } else {
                None
            }
        });
        engine.on_print(|text| tracing::info!(target: "snippet", "{text}"));
        engine.on_debug(|text, source, pos| {
            tracing::debug!(target: "snippet", source = source.unwrap_or(""), %pos, "{text}");
        });

        Self {
            engine: Arc::new(Mutex::new(engine)),
            scope: Arc::new(Mutex::new(Scope::new())),
        }
    }

    /// Forget every variable set by earlier snippets.
    pub fn clear_scope(&self) {
        self.scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Current value of a snippet variable, rendered as text.
    pub fn variable(&self, name: &str) -> Option<String> {
        let scope = self.scope.lock().unwrap_or_else(PoisonError::into_inner);
        scope.get(name).map(|value| value.to_string())
    }
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

#[async_trait]
impl SnippetExecutor for RhaiEngine {
    async fn execute_snippet(&self, code: &str) -> Result<(), SnippetError> {
        let engine = self.engine.clone();
        let scope = self.scope.clone();
        let code = code.to_string();

        tokio::task::spawn_blocking(move || {
            let engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
            let mut scope = scope.lock().unwrap_or_else(PoisonError::into_inner);
            engine
                .run_with_scope(&mut scope, &code)
                .map_err(convert_rhai_error)
        })
        .await
        .map_err(|e| SnippetError::Task(e.to_string()))?
    }
}

fn convert_rhai_error(error: Box<EvalAltResult>) -> SnippetError {
    match *error {
        EvalAltResult::ErrorParsing(parse_error, pos) => SnippetError::Compilation {
            message: parse_error.to_string(),
            line: pos.line().unwrap_or(0),
            column: pos.position().unwrap_or(0),
        },
        EvalAltResult::ErrorRuntime(message, _) => SnippetError::Runtime {
            message: message.to_string(),
        },
        other => SnippetError::Runtime {
            message: other.to_string(),
        },
    }
}
