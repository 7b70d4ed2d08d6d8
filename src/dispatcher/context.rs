//! Execution mode and run control threaded through every pass.

use crate::config::Settings;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Which pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Lex, resolve and range-check everything; invoke only self-validating
    /// commands and never open a connection
    Validating,
    /// Open connections and invoke every command
    Live,
}

/// State of the cooperative pause/stop gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Lines are being processed
    Running,
    /// The worker waits before the next line
    Paused,
    /// The worker leaves the pass before the next line
    Stopped,
}

/// Pause/stop gate shared by the controller, the interpreter and the
/// handlers. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct RunControl {
    state: Arc<watch::Sender<RunState>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    /// A gate in the `Running` state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Running);
        Self {
            state: Arc::new(state),
        }
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// True once a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }

    /// Request a stop. Wakes a paused worker.
    pub fn stop(&self) {
        self.state.send_replace(RunState::Stopped);
    }

    /// Hold the worker before its next line. Ignored once stopped.
    pub fn pause(&self) {
        self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Release a paused worker.
    pub fn resume(&self) {
        self.state.send_if_modified(|state| {
            if *state == RunState::Paused {
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Back to `Running` for a new run.
    pub fn reset(&self) {
        self.state.send_replace(RunState::Running);
    }

    /// Wait while paused. Returns `Running` or `Stopped`.
    pub async fn checkpoint(&self) -> RunState {
        let mut rx = self.state.subscribe();
        rx.wait_for(|state| *state != RunState::Paused)
            .await
            .map(|state| *state)
            .unwrap_or(RunState::Stopped)
    }

    /// Resolves once a stop is requested.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == RunState::Stopped).await;
    }
}

/// Everything a line needs to know about the pass it runs in.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    mode: ExecutionMode,
    control: RunControl,
    settings: Arc<Settings>,
}

impl ExecutionContext {
    /// Bundle a mode with its gate and settings.
    pub fn new(mode: ExecutionMode, control: RunControl, settings: Arc<Settings>) -> Self {
        Self {
            mode,
            control,
            settings,
        }
    }

    /// The pass mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// True during the validating pass.
    pub fn is_validating(&self) -> bool {
        self.mode == ExecutionMode::Validating
    }

    /// True during the live pass.
    pub fn is_live(&self) -> bool {
        self.mode == ExecutionMode::Live
    }

    /// The pause/stop gate.
    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Active settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Path for a `save` command's output with extension `extension`.
    pub fn output_file(&self, extension: &str) -> PathBuf {
        let paths = &self.settings.paths;
        let extension = extension.trim().trim_start_matches('.');
        paths
            .output_dir
            .join(format!("{}.{}", paths.output_stem, extension))
    }

    /// Sleep for `duration` unless a stop arrives first.
    /// Returns false when cut short by a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.control.stopped() => false,
        }
    }
}
