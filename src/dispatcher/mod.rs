//! The script interpreter.
//!
//! A [`Dispatcher`] runs a script in two sequential passes. The validating
//! pass lexes every line, defines instruments without opening them, splices
//! includes, resolves commands and range-checks their arguments. Only if it
//! finishes cleanly does the live pass run, on a spawned worker task, doing
//! the same work against opened connections.
//!
//! Either pass stops at the first failing line. The failure is reported as a
//! [`ScriptFailure`] and a stop is signalled through the shared
//! [`RunControl`], so long-running handler operations wind down as well.
//! Whatever the outcome, a live pass ends by closing every instrument it
//! opened.
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new(registry, transports, snippets, settings);
//! let run = dispatcher.start(&lines).await?;   // validating pass
//! dispatcher.pause();
//! dispatcher.resume();
//! run.wait().await?;                           // live pass
//! ```

pub mod context;

pub use context::{ExecutionContext, ExecutionMode, RunControl, RunState};

use crate::adapters::TransportFactory;
use crate::config::Settings;
use crate::error::{AppResult, DispatchError, ScriptFailure};
use crate::instrument::connection::ConnectionSpec;
use crate::instrument::descriptor::Provenance;
use crate::instrument::generic;
use crate::instrument::registry::HandlerRegistry;
use crate::instrument::table::{InstanceTable, LiveInstance};
use crate::script::{tokenize, Directive, LineNumber, ScriptBuffer, ScriptLine, SNIPPET_MARKER};
use crate::scripting::SnippetExecutor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How a pass ended when no line failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every line was processed
    Completed,
    /// A stop request ended the pass early
    Stopped,
}

/// Handle to a live pass running on its worker task.
pub struct LiveRun {
    worker: JoinHandle<Result<PassOutcome, ScriptFailure>>,
}

impl LiveRun {
    /// True once the live pass and its cleanup are done.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the live pass to end.
    pub async fn wait(self) -> Result<PassOutcome, ScriptFailure> {
        self.worker.await.unwrap_or_else(|e| {
            Err(ScriptFailure::new(
                DispatchError::Worker(e.to_string()),
                LineNumber::new(0),
                "",
            ))
        })
    }
}

struct Inner {
    registry: Arc<HandlerRegistry>,
    transports: Arc<dyn TransportFactory>,
    snippets: Arc<dyn SnippetExecutor>,
    settings: Arc<Settings>,
    instances: Mutex<InstanceTable>,
    control: RunControl,
}

/// Script interpreter and run controller.
///
/// Clones share the instance table and the pause/stop gate, so one clone
/// can run a script while another pauses or stops it.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
    mode: ExecutionMode,
}

impl Dispatcher {
    /// Create a dispatcher. The initial mode is `Validating`.
    pub fn new(
        registry: HandlerRegistry,
        transports: Arc<dyn TransportFactory>,
        snippets: Arc<dyn SnippetExecutor>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Arc::new(registry),
                transports,
                snippets,
                settings,
                instances: Mutex::new(InstanceTable::new()),
                control: RunControl::new(),
            }),
            mode: ExecutionMode::Validating,
        }
    }

    /// Mode used by [`Dispatcher::run`].
    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    /// Current mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run one pass over `lines` in the current mode, on the caller's task.
    pub async fn run(&self, lines: &[String]) -> Result<PassOutcome, ScriptFailure> {
        self.inner.control.reset();
        self.inner.run_pass(lines, self.mode).await
    }

    /// Validate `lines`, then start the live pass on a worker task.
    ///
    /// Returns the validating pass's failure without starting the worker.
    /// If a stop arrived during validation the returned run is already
    /// finished with [`PassOutcome::Stopped`].
    pub async fn start(&self, lines: &[String]) -> Result<LiveRun, ScriptFailure> {
        self.inner.control.reset();
        let validation = self
            .inner
            .run_pass(lines, ExecutionMode::Validating)
            .await?;

        let worker = if validation == PassOutcome::Stopped || self.inner.control.is_stopped() {
            tracing::info!("stopped during validation; live pass skipped");
            tokio::spawn(async { Ok(PassOutcome::Stopped) })
        } else {
            let inner = self.inner.clone();
            let lines = lines.to_vec();
            tokio::spawn(async move { inner.run_pass(&lines, ExecutionMode::Live).await })
        };
        Ok(LiveRun { worker })
    }

    /// Validate, then run live, and wait for the live pass to finish.
    pub async fn execute(&self, lines: &[String]) -> Result<PassOutcome, ScriptFailure> {
        self.start(lines).await?.wait().await
    }

    /// Signal a stop and give running handlers the configured grace period.
    pub async fn stop(&self) {
        tracing::info!("stop requested");
        self.inner.control.stop();
        tokio::time::sleep(self.inner.settings.stop_grace()).await;
    }

    /// Hold the running pass before its next line.
    pub fn pause(&self) {
        self.inner.control.pause();
    }

    /// Release a paused pass.
    pub fn resume(&self) {
        self.inner.control.resume();
    }

    /// The shared pause/stop gate.
    pub fn control(&self) -> &RunControl {
        &self.inner.control
    }

    /// Display name → implementation identifier of every known instrument.
    pub fn registered_instruments(&self) -> BTreeMap<String, String> {
        self.inner.registry.registered()
    }

    /// The registry behind this dispatcher.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Alias → display name of the instruments defined so far. Waits for the
    /// line in flight, if any.
    pub async fn live_instances(&self) -> BTreeMap<String, String> {
        self.inner.instances.lock().await.summary()
    }
}

impl Inner {
    async fn run_pass(&self, lines: &[String], mode: ExecutionMode) -> Result<PassOutcome, ScriptFailure> {
        let ctx = ExecutionContext::new(mode, self.control.clone(), self.settings.clone());
        let mut buffer = ScriptBuffer::from_lines(lines.iter().map(String::as_str));
        tracing::info!(?mode, lines = buffer.len(), "pass started");

        let result = self.process(&mut buffer, &ctx).await;
        if result.is_err() {
            self.control.stop();
        }
        self.finish(mode).await;

        match &result {
            Ok(outcome) => tracing::info!(?mode, ?outcome, "pass finished"),
            Err(failure) => tracing::warn!(?mode, "pass failed: {failure}"),
        }
        result
    }

    async fn process(
        &self,
        buffer: &mut ScriptBuffer,
        ctx: &ExecutionContext,
    ) -> Result<PassOutcome, ScriptFailure> {
        let mut snippet: Option<(ScriptLine, String)> = None;
        let mut index = 0;

        while let Some(line) = buffer.get(index).cloned() {
            if self.control.checkpoint().await == RunState::Stopped {
                return Ok(PassOutcome::Stopped);
            }

            if let Some(code) = line.text.trim_start().strip_prefix(SNIPPET_MARKER) {
                let (_, block) = snippet.get_or_insert_with(|| (line.clone(), String::new()));
                block.push_str(code);
                block.push('\n');

                let continues = buffer
                    .get(index + 1)
                    .is_some_and(|next| next.text.trim_start().starts_with(SNIPPET_MARKER));
                if !continues {
                    if let Some((first, block)) = snippet.take() {
                        self.snippets
                            .execute_snippet(&block)
                            .await
                            .map_err(|e| {
                                ScriptFailure::new(
                                    DispatchError::Snippet(e.to_string()),
                                    first.number,
                                    first.text,
                                )
                            })?;
                    }
                }
                index += 1;
                continue;
            }

            tracing::debug!(line = %line.number, text = %line.text.trim(), "line");
            self.execute_line(buffer, index, &line.text, ctx)
                .await
                .map_err(|error| ScriptFailure::new(error, line.number, line.text))?;
            index += 1;
        }
        Ok(PassOutcome::Completed)
    }

    async fn execute_line(
        &self,
        buffer: &mut ScriptBuffer,
        index: usize,
        text: &str,
        ctx: &ExecutionContext,
    ) -> AppResult<()> {
        let tokens = tokenize(text);
        let Some((head, args)) = tokens.split_first() else {
            return Ok(());
        };
        match Directive::from_head(head) {
            Some(Directive::DefineInstrument) => self.define_instrument(args, ctx).await,
            Some(Directive::Include) => self.include(buffer, index, args).await,
            None => self.dispatch(head, args, ctx).await,
        }
    }

    async fn define_instrument(&self, args: &[String], ctx: &ExecutionContext) -> AppResult<()> {
        let [alias, display_name, connection] = args else {
            return Err(DispatchError::DirectiveArity {
                directive: Directive::DefineInstrument.keyword(),
                expected: 3,
                found: args.len(),
            });
        };
        if !is_valid_alias(alias) {
            return Err(DispatchError::InvalidAlias(alias.clone()));
        }

        let mut table = self.instances.lock().await;
        if table.contains(alias) {
            return Err(DispatchError::AliasInUse(alias.clone()));
        }
        let info = self
            .registry
            .get(display_name)
            .ok_or_else(|| DispatchError::UnknownInstrument(display_name.clone()))?;
        let connection = ConnectionSpec::parse(connection)?;
        let kind = connection.kind();
        if !info.supports(kind) {
            return Err(DispatchError::UnsupportedTransport {
                instrument: info.display_name().to_string(),
                transport: kind.to_string(),
            });
        }

        let mut handler = info.instantiate();
        let opened = if ctx.is_live() {
            let failed = |e: anyhow::Error| DispatchError::ConnectionFailed {
                alias: alias.clone(),
                reason: format!("{e:#}"),
            };
            let link = self.transports.open(&connection).await.map_err(failed)?;
            if let Err(e) = handler.open(alias, &connection, link).await {
                if let Err(close_err) = handler.close().await {
                    tracing::warn!(%alias, "close after failed open: {close_err:#}");
                }
                return Err(failed(e));
            }
            true
        } else {
            false
        };

        table.insert(LiveInstance::new(
            alias.as_str(),
            info.display_name(),
            connection,
            handler,
            info.generic_commands(),
            opened,
        ))?;
        tracing::info!(%alias, instrument = %info.display_name(), mode = ?ctx.mode(), "instrument defined");
        Ok(())
    }

    async fn include(&self, buffer: &mut ScriptBuffer, index: usize, args: &[String]) -> AppResult<()> {
        let [reference] = args else {
            return Err(DispatchError::DirectiveArity {
                directive: Directive::Include.keyword(),
                expected: 1,
                found: args.len(),
            });
        };
        let path = self.resolve_include(reference)?;

        if self.is_snippet_file(&path) {
            tracing::debug!(path = %path.display(), "running snippet file");
            return self
                .snippets
                .execute_file(&path)
                .await
                .map_err(|e| DispatchError::Snippet(e.to_string()));
        }

        let source = tokio::fs::canonicalize(&path).await.unwrap_or_else(|_| path.clone());
        if buffer.get(index).is_some_and(|line| line.comes_from(&source)) {
            return Err(DispatchError::IncludeCycle(source));
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DispatchError::IncludeRead {
                path: path.clone(),
                source: e,
            })?;
        let spliced = buffer.splice_after(index, &source, text.lines());
        tracing::debug!(path = %path.display(), lines = spliced, "included");
        Ok(())
    }

    /// Try the reference as given, then relative to the project directory,
    /// then relative to the default directory.
    fn resolve_include(&self, reference: &str) -> AppResult<PathBuf> {
        let paths = &self.settings.paths;
        let mut file = PathBuf::from(reference.trim().trim_matches('"'));
        if file.extension().is_none() {
            file.set_extension(&paths.default_extension);
        }

        let mut candidates = vec![file.clone()];
        if file.is_relative() {
            candidates.extend(paths.project_dir.as_ref().map(|dir| dir.join(&file)));
            candidates.push(paths.default_dir.join(&file));
        }
        candidates
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or(DispatchError::FileNotFound(file))
    }

    fn is_snippet_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.settings.dispatcher.snippet_extension))
    }

    async fn dispatch(&self, alias: &str, tokens: &[String], ctx: &ExecutionContext) -> AppResult<()> {
        let mut table = self.instances.lock().await;
        let instance = table
            .get_mut(alias)
            .ok_or_else(|| DispatchError::UnknownInstrument(alias.to_string()))?;
        let Some((name, tokens)) = tokens.split_first() else {
            return Err(DispatchError::UnknownCommand {
                instrument: alias.to_string(),
                command: String::new(),
            });
        };

        let command = instance.resolve(name, tokens.len())?;
        let args = command.convert_args(tokens)?;
        command.check_ranges(&args)?;

        if ctx.is_validating() && !command.self_validating {
            return Ok(());
        }

        let handler = instance.handler_mut();
        let result = match command.provenance {
            Provenance::Generic { .. } => generic::execute(handler, &command, &args, ctx).await?,
            Provenance::Reflected => handler
                .invoke(&command, &args, ctx)
                .await
                .map_err(|e| DispatchError::from_handler(&command.name, e))?,
        };
        if let Some(result) = result {
            tracing::info!(%alias, command = %command.name, %result, "command result");
        }
        Ok(())
    }

    async fn finish(&self, mode: ExecutionMode) {
        let mut table = self.instances.lock().await;
        match mode {
            ExecutionMode::Live => {
                let count = table.len();
                let failures = table.close_all().await;
                tracing::info!(count, failures, "instruments closed");
            }
            ExecutionMode::Validating => table.clear(),
        }
    }
}

fn is_valid_alias(alias: &str) -> bool {
    !alias.is_empty()
        && !alias.starts_with(SNIPPET_MARKER)
        && !alias.chars().any(|c| c.is_whitespace() || c == '"' || c == ';')
        && Directive::from_head(alias).is_none()
}
