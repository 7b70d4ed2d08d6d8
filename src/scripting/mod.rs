//! Embedded snippets.
//!
//! Script lines starting with `|` and included `.rhai` files are handed to a
//! [`SnippetExecutor`]. The production executor is [`RhaiEngine`]; all
//! snippets of one dispatcher share its scope, so variables set in one block
//! are visible in the next.
//!
//! ```rust,ignore
//! let engine = RhaiEngine::new(1_000_000);
//! engine.execute_snippet("let setpoint = 4.2;").await?;
//! engine.execute_snippet("print(`setpoint ${setpoint}`);").await?;
//! ```

pub mod rhai_engine;

pub use rhai_engine::RhaiEngine;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Snippet failures.
#[derive(Debug, Error)]
pub enum SnippetError {
    /// The snippet does not parse
    #[error("Compilation error at line {line}, column {column}: {message}")]
    Compilation {
        /// Parser message
        message: String,
        /// 1-based line inside the snippet
        line: usize,
        /// 1-based column
        column: usize,
    },

    /// The snippet failed while running, or hit the operation limit
    #[error("Runtime error: {message}")]
    Runtime {
        /// Engine message
        message: String,
    },

    /// The snippet file could not be read
    #[error("Cannot read {path}: {source}")]
    Read {
        /// File as given
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The blocking evaluation task did not complete
    #[error("Snippet task failed: {0}")]
    Task(String),
}

/// Runs embedded snippets for the dispatcher.
#[async_trait]
pub trait SnippetExecutor: Send + Sync {
    /// Run one snippet block.
    async fn execute_snippet(&self, code: &str) -> Result<(), SnippetError>;

    /// Run a whole snippet file.
    async fn execute_file(&self, path: &Path) -> Result<(), SnippetError> {
        let code = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SnippetError::Read {
                path: path.display().to_string(),
                source,
            })?;
        self.execute_snippet(&code).await
    }
}
