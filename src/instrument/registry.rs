//! Instrument Registry
//!
//! Maps the display names used in MAKE lines to instrument implementations.
//! Built-in handlers are registered explicitly with a factory closure;
//! generic instruments come from definition files named
//! `<Display Name>.gpibinstrument` or `<Display Name>.rs232instrument`.
//!
//! ```rust,ignore
//! let mut registry = HandlerRegistry::new();
//! registry.register("Lakeshore 340", "lakeshore_340", &[TransportKind::Gpib], || {
//!     Box::new(Lakeshore340::new())
//! })?;
//! let names = registry.scan(Some(Path::new("instruments")))?;
//! ```

use super::connection::TransportKind;
use super::descriptor::{parse_descriptor, CommandDescriptor};
use super::generic::GenericInstrument;
use super::Instrument;
use crate::error::{AppResult, DispatchError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Creates a fresh handler.
pub type InstrumentFactory = Arc<dyn Fn() -> Box<dyn Instrument> + Send + Sync>;

const GPIB_DEFINITION: &str = ".gpibinstrument";
const SERIAL_DEFINITION: &str = ".rs232instrument";
const GPIB_ONLY: &[TransportKind] = &[TransportKind::Gpib];
const SERIAL_ONLY: &[TransportKind] = &[TransportKind::Serial];

#[derive(Clone)]
enum Implementation {
    Builtin {
        type_name: &'static str,
        factory: InstrumentFactory,
    },
    Generic {
        source: PathBuf,
    },
}

/// One registered instrument type.
#[derive(Clone)]
pub struct InstrumentInfo {
    display_name: String,
    transports: BTreeSet<TransportKind>,
    implementation: Implementation,
    generic_commands: Arc<Vec<CommandDescriptor>>,
}

impl InstrumentInfo {
    /// Name used in MAKE lines.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Connection kinds the instrument accepts.
    pub fn transports(&self) -> &BTreeSet<TransportKind> {
        &self.transports
    }

    /// True when `kind` connections are accepted.
    pub fn supports(&self, kind: TransportKind) -> bool {
        self.transports.contains(&kind)
    }

    /// `builtin:<type>` or `generic:<definition file>`.
    pub fn implementation_id(&self) -> String {
        match &self.implementation {
            Implementation::Builtin { type_name, .. } => format!("builtin:{type_name}"),
            Implementation::Generic { source } => format!("generic:{}", source.display()),
        }
    }

    /// Commands loaded from definition files.
    pub fn generic_commands(&self) -> Arc<Vec<CommandDescriptor>> {
        self.generic_commands.clone()
    }

    /// Create an unopened handler.
    pub fn instantiate(&self) -> Box<dyn Instrument> {
        match &self.implementation {
            Implementation::Builtin { factory, .. } => factory(),
            Implementation::Generic { .. } => Box::new(GenericInstrument::new()),
        }
    }
}

impl fmt::Debug for InstrumentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentInfo")
            .field("display_name", &self.display_name)
            .field("implementation", &self.implementation_id())
            .field("transports", &self.transports)
            .field("generic_commands", &self.generic_commands.len())
            .finish()
    }
}

/// Display name → instrument type.
#[derive(Default, Clone, Debug)]
pub struct HandlerRegistry {
    entries: BTreeMap<String, InstrumentInfo>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in handler.
    pub fn with_builtins() -> AppResult<Self> {
        let mut registry = Self::new();
        super::builtin::register_all(&mut registry)?;
        Ok(registry)
    }

    /// Register a handler implemented in code.
    ///
    /// An empty display name registers nothing. A name that is already taken
    /// fails with `AmbiguousName`.
    pub fn register<F>(
        &mut self,
        display_name: &str,
        type_name: &'static str,
        transports: &[TransportKind],
        factory: F,
    ) -> AppResult<()>
    where
        F: Fn() -> Box<dyn Instrument> + Send + Sync + 'static,
    {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Ok(());
        }
        if self.entries.contains_key(display_name) {
            return Err(DispatchError::AmbiguousName(display_name.to_string()));
        }
        self.entries.insert(
            display_name.to_string(),
            InstrumentInfo {
                display_name: display_name.to_string(),
                transports: transports.iter().copied().collect(),
                implementation: Implementation::Builtin {
                    type_name,
                    factory: Arc::new(factory),
                },
                generic_commands: Arc::new(Vec::new()),
            },
        );
        tracing::debug!(display_name, type_name, "registered built-in instrument");
        Ok(())
    }

    /// Load every definition file in `dir`. A missing directory loads nothing.
    /// Returns the number of files loaded.
    pub fn load_definitions(&mut self, dir: &Path) -> AppResult<usize> {
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "no instrument definition directory");
            return Ok(0);
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut loaded = 0;
        for path in files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with("instrument") {
                continue;
            }
            let Some(transports) = definition_transports(file_name) else {
                tracing::debug!(path = %path.display(), "skipping file of unknown instrument kind");
                continue;
            };
            let display_name = file_name
                .split('.')
                .next()
                .unwrap_or(file_name)
                .trim()
                .to_string();
            let text = std::fs::read_to_string(&path)?;
            let commands = parse_definition_file(&path, &text)?;
            self.add_generic(display_name, transports, path, commands)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    fn add_generic(
        &mut self,
        display_name: String,
        transports: &[TransportKind],
        source: PathBuf,
        commands: Vec<CommandDescriptor>,
    ) -> AppResult<()> {
        match self.entries.get_mut(&display_name) {
            Some(existing) => match existing.implementation {
                Implementation::Builtin { .. } => {
                    tracing::info!(
                        display_name = %display_name,
                        count = commands.len(),
                        "merging generic commands into built-in instrument"
                    );
                    Arc::make_mut(&mut existing.generic_commands).extend(commands);
                    Ok(())
                }
                Implementation::Generic { .. } => Err(DispatchError::AmbiguousName(display_name)),
            },
            None => {
                tracing::info!(
                    display_name = %display_name,
                    source = %source.display(),
                    count = commands.len(),
                    "registered generic instrument"
                );
                self.entries.insert(
                    display_name.clone(),
                    InstrumentInfo {
                        display_name,
                        transports: transports.iter().copied().collect(),
                        implementation: Implementation::Generic { source },
                        generic_commands: Arc::new(commands),
                    },
                );
                Ok(())
            }
        }
    }

    /// Load definitions from `dir` (if given) and return the resulting map
    /// of display name → implementation identifier.
    pub fn scan(&mut self, dir: Option<&Path>) -> AppResult<BTreeMap<String, String>> {
        if let Some(dir) = dir {
            self.load_definitions(dir)?;
        }
        if self.entries.is_empty() {
            return Err(DispatchError::RegistryEmpty);
        }
        Ok(self.registered())
    }

    /// Display name → implementation identifier.
    pub fn registered(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(name, info)| (name.clone(), info.implementation_id()))
            .collect()
    }

    /// Look up a display name.
    pub fn get(&self, display_name: &str) -> Option<&InstrumentInfo> {
        self.entries.get(display_name.trim())
    }

    /// All registered instruments, sorted by display name.
    pub fn iter(&self) -> impl Iterator<Item = &InstrumentInfo> {
        self.entries.values()
    }

    /// Number of registered instruments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn definition_transports(file_name: &str) -> Option<&'static [TransportKind]> {
    if file_name.contains(GPIB_DEFINITION) {
        Some(GPIB_ONLY)
    } else if file_name.contains(SERIAL_DEFINITION) {
        Some(SERIAL_ONLY)
    } else {
        None
    }
}

/// Parse a definition file, skipping blank lines and whole-line comments.
pub fn parse_definition_file(path: &Path, text: &str) -> AppResult<Vec<CommandDescriptor>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim_start();
            !(trimmed.is_empty() || trimmed.starts_with('%') || trimmed.starts_with("//"))
        })
        .map(|(index, line)| {
            parse_descriptor(line).map_err(|e| match e {
                DispatchError::MalformedDescriptor(reason) => DispatchError::MalformedDescriptor(
                    format!("{} line {}: {}", path.display(), index + 1, reason),
                ),
                other => other,
            })
        })
        .collect()
}
