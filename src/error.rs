//! Error types for the dispatcher.
//!
//! `DispatchError` is the single error type surfaced by the library. Its
//! variants fall into four groups:
//!
//! - **Startup**: `MalformedDescriptor`, `RegistryEmpty`, `AmbiguousName`,
//!   `Config`. These abort before any script line runs.
//! - **Per line**: `UnknownInstrument`, `AliasInUse`, `InvalidAlias`,
//!   `UnknownCommand`, `AmbiguousCommand`, `ArityMismatch`, `DirectiveArity`,
//!   `TypeConversion`, `RangeViolation`, `FileNotFound`, `IncludeCycle`,
//!   `IncludeRead`, `Snippet`, `CommandFailed`. These halt the current pass
//!   and are wrapped in a [`ScriptFailure`] carrying the line.
//! - **Define-instrument**: `InvalidConnection`, `UnsupportedTransport`,
//!   `ConnectionFailed`.
//! - **Wire I/O**: `Transport`, `Io`. Never retried.
//!
//! Handlers and transports work with `anyhow::Result`; [`DispatchError::from_handler`]
//! recovers a typed error when a handler returned one.

use crate::config::ConfigError;
use crate::script::LineNumber;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the dispatcher error type.
pub type AppResult<T> = std::result::Result<T, DispatchError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum DispatchError {
    /// Malformed quoting. The lexer is permissive, so nothing raises this today.
    #[error("Lexer error: {0}")]
    Lex(String),

    #[error("Malformed command definition: {0}")]
    MalformedDescriptor(String),

    #[error("No instrument implementations are registered")]
    RegistryEmpty,

    #[error("Instrument name '{0}' is declared more than once")]
    AmbiguousName(String),

    #[error("Unknown instrument '{0}'")]
    UnknownInstrument(String),

    #[error("The instrument name '{0}' is already in use")]
    AliasInUse(String),

    #[error("'{0}' is not a valid instrument name")]
    InvalidAlias(String),

    #[error("Instrument '{instrument}' does not support the command '{command}'")]
    UnknownCommand { instrument: String, command: String },

    #[error("Command '{command}' of instrument '{instrument}' is defined more than once with {arity} parameter(s)")]
    AmbiguousCommand {
        instrument: String,
        command: String,
        arity: usize,
    },

    #[error("Command '{command}' expects {expected} argument(s) but {found} were given")]
    ArityMismatch {
        command: String,
        expected: String,
        found: usize,
    },

    #[error("{directive} expects {expected} argument(s) but {found} were given")]
    DirectiveArity {
        directive: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Could not convert '{value}' to {expected}")]
    TypeConversion { value: String, expected: String },

    #[error("Parameter '{parameter}' is out of range: {value} is not within [{min}, {max}]")]
    RangeViolation {
        parameter: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid connection string '{0}'")]
    InvalidConnection(String),

    #[error("Instrument '{instrument}' does not support {transport} connections")]
    UnsupportedTransport {
        instrument: String,
        transport: String,
    },

    #[error("Could not open connection to '{alias}': {reason}")]
    ConnectionFailed { alias: String, reason: String },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("'{}' includes itself", .0.display())]
    IncludeCycle(PathBuf),

    #[error("Could not read include file {}: {source}", path.display())]
    IncludeRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snippet execution failed: {0}")]
    Snippet(String),

    #[error("Command '{command}' failed: {source:#}")]
    CommandFailed {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The live worker task ended abnormally.
    #[error("Script worker failed: {0}")]
    Worker(String),
}

impl DispatchError {
    /// Short name of the error kind, used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lex(_) => "LexError",
            Self::MalformedDescriptor(_) => "MalformedDescriptor",
            Self::RegistryEmpty => "RegistryEmpty",
            Self::AmbiguousName(_) => "AmbiguousName",
            Self::UnknownInstrument(_) => "UnknownInstrument",
            Self::AliasInUse(_) => "AliasInUse",
            Self::InvalidAlias(_) => "InvalidAlias",
            Self::UnknownCommand { .. } => "UnknownCommand",
            Self::AmbiguousCommand { .. } => "AmbiguousCommand",
            Self::ArityMismatch { .. } | Self::DirectiveArity { .. } => "ArityMismatch",
            Self::TypeConversion { .. } => "TypeConversionFailure",
            Self::RangeViolation { .. } => "RangeViolation",
            Self::InvalidConnection(_) => "InvalidConnection",
            Self::UnsupportedTransport { .. } => "UnsupportedTransport",
            Self::ConnectionFailed { .. } => "ConnectionFailed",
            Self::FileNotFound(_) => "FileNotFound",
            Self::IncludeCycle(_) => "IncludeCycle",
            Self::IncludeRead { .. } => "IncludeReadFailure",
            Self::Snippet(_) => "SnippetFailure",
            Self::CommandFailed { .. } => "CommandFailed",
            Self::Transport(_) | Self::Io(_) => "TransportFailure",
            Self::Config(_) => "ConfigError",
            Self::Worker(_) => "WorkerFailure",
        }
    }

    /// Wraps an error returned by a handler.
    ///
    /// A handler that rejects its arguments returns a `DispatchError` inside
    /// the `anyhow::Error`; that error is passed through unchanged so it keeps
    /// its kind.
    pub fn from_handler(command: &str, error: anyhow::Error) -> Self {
        match error.downcast::<DispatchError>() {
            Ok(typed) => typed,
            Err(other) => Self::CommandFailed {
                command: command.to_string(),
                source: other,
            },
        }
    }
}

/// A per-line failure: what went wrong, where, and on which text.
#[derive(Debug)]
pub struct ScriptFailure {
    /// The underlying error.
    pub error: DispatchError,
    /// Position of the offending line in the original script.
    pub line: LineNumber,
    /// The offending line as written.
    pub text: String,
}

impl ScriptFailure {
    /// Attach a line position to an error.
    pub fn new(error: DispatchError, line: LineNumber, text: impl Into<String>) -> Self {
        Self {
            error,
            line,
            text: text.into(),
        }
    }
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}\n  near {}: {}",
            self.error.kind(),
            self.error,
            self.line,
            self.text
        )
    }
}

impl std::error::Error for ScriptFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_errors_keep_their_kind() {
        let typed = anyhow::Error::new(DispatchError::RangeViolation {
            parameter: "Loop".into(),
            value: "3".into(),
            min: "1".into(),
            max: "2".into(),
        });
        let err = DispatchError::from_handler("setTemp", typed);
        assert_eq!(err.kind(), "RangeViolation");

        let opaque = anyhow::anyhow!("device did not answer");
        let err = DispatchError::from_handler("getTemp", opaque);
        assert_eq!(err.kind(), "CommandFailed");
        assert!(err.to_string().contains("device did not answer"));
    }

    #[test]
    fn failure_report_names_line_and_text() {
        let failure = ScriptFailure::new(
            DispatchError::UnknownInstrument("ls".into()),
            LineNumber::new(7).included(2),
            "ls getTemp A",
        );
        let report = failure.to_string();
        assert!(report.starts_with("UnknownInstrument: Unknown instrument 'ls'"));
        assert!(report.contains("near line 7 (included line 2): ls getTemp A"));
    }
}
