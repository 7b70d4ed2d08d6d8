//! Script-driven instrument dispatcher.
//!
//! A measurement script is a list of text lines. `MAKE` lines define
//! instruments, `INCLUDE` lines splice in other scripts, lines starting with
//! `|` are embedded Rhai snippets, and every other line calls a command on a
//! defined instrument:
//!
//! ```text
//! MAKE ls; Lakeshore 340; GPIB 12
//! MAKE fg; SRS DS345; COM1, 9600, 8, 1, none
//! INCLUDE warmup
//! ls setTemp 1; 295
//! fg setFrequency 1e3     % 1 kHz
//! ```
//!
//! The [`Dispatcher`] validates the whole script before anything touches
//! the hardware, then runs it live. Instrument types come from the
//! [`HandlerRegistry`]: handlers written in Rust plus instruments described
//! line by line in definition files (see [`instrument::descriptor`]).

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod script;
pub mod scripting;

pub use config::Settings;
pub use dispatcher::{Dispatcher, ExecutionMode, LiveRun, PassOutcome};
pub use error::{AppResult, DispatchError, ScriptFailure};
pub use instrument::HandlerRegistry;
