//! Configuration using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (optional; missing files fall back to defaults)
//! 2. environment variables prefixed with `DAQSCRIPT_`
//!
//! Nested keys are separated by a double underscore so that field names may
//! keep their own underscores:
//!
//! ```text
//! DAQSCRIPT_APPLICATION__LOG_LEVEL=debug
//! DAQSCRIPT_DISPATCHER__STOP_GRACE_MS=500
//! DAQSCRIPT_PATHS__DEFINITIONS_DIR=/opt/lab/instruments
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or an environment override could not be parsed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// The values parsed but are not acceptable.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Search paths and output locations
    #[serde(default)]
    pub paths: PathSettings,
    /// Interpreter behaviour
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
    /// Wire-level transport settings
    #[serde(default)]
    pub transport: TransportSettings,
}

/// Application-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json_logs: bool,
}

/// Where scripts, definition files and output live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Last-resort directory searched by INCLUDE
    #[serde(default = "default_dir")]
    pub default_dir: PathBuf,
    /// Directory of the current project, searched by INCLUDE before `default_dir`
    #[serde(default)]
    pub project_dir: Option<PathBuf>,
    /// Directory holding `*.gpibinstrument` / `*.rs232instrument` files
    #[serde(default)]
    pub definitions_dir: Option<PathBuf>,
    /// Directory that `save` commands write into
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File stem used by `save` commands
    #[serde(default = "default_output_stem")]
    pub output_stem: String,
    /// Extension appended to INCLUDE references that have none
    #[serde(default = "default_extension")]
    pub default_extension: String,
}

/// Interpreter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Time the controller waits after signalling stop
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Extension that marks an INCLUDE target as an embedded snippet file
    #[serde(default = "default_snippet_extension")]
    pub snippet_extension: String,
    /// Operation budget for one snippet evaluation
    #[serde(default = "default_snippet_max_operations")]
    pub snippet_max_operations: u64,
}

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Appended to every outgoing message
    #[serde(default = "default_termination")]
    pub termination: String,
    /// Read timeout for queries
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Port used for `URL=` addresses without an explicit port
    #[serde(default = "default_network_port")]
    pub network_port: u16,
    /// Maps script port names (`COM3`) to OS device paths (`/dev/ttyUSB0`)
    #[serde(default)]
    pub serial_ports: BTreeMap<String, String>,
    /// GPIB controller backend; GPIB connections fail when absent
    #[serde(default)]
    pub gpib: Option<GpibControllerSettings>,
}

/// A GPIB controller reached through a serial port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpibControllerSettings {
    /// Controller type; only `prologix` is known
    pub controller: String,
    /// Serial device of the controller
    pub port: String,
    /// Baud rate of the controller link
    #[serde(default = "default_gpib_baud")]
    pub baud: u32,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "daq_script".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("daq_script")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_stem() -> String {
    "measurement".to_string()
}

fn default_extension() -> String {
    "dsc".to_string()
}

fn default_stop_grace_ms() -> u64 {
    250
}

fn default_snippet_extension() -> String {
    "rhai".to_string()
}

fn default_snippet_max_operations() -> u64 {
    1_000_000
}

fn default_termination() -> String {
    "\n".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_network_port() -> u16 {
    5025
}

fn default_gpib_baud() -> u32 {
    115_200
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            default_dir: default_dir(),
            project_dir: None,
            definitions_dir: None,
            output_dir: default_output_dir(),
            output_stem: default_output_stem(),
            default_extension: default_extension(),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            stop_grace_ms: default_stop_grace_ms(),
            snippet_extension: default_snippet_extension(),
            snippet_max_operations: default_snippet_max_operations(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            termination: default_termination(),
            timeout_ms: default_timeout_ms(),
            network_port: default_network_port(),
            serial_ports: BTreeMap::new(),
            gpib: None,
        }
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Settings {
    /// Load settings from `path` (if it exists) and the environment.
    ///
    /// Precedence, highest first: `DAQSCRIPT_` environment variables, the
    /// file, built-in defaults. The result is validated.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQSCRIPT_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.paths.default_extension.is_empty() || self.paths.default_extension.contains('.')
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid default_extension '{}'. Give the extension without a dot",
                self.paths.default_extension
            )));
        }

        if self.paths.output_stem.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "output_stem cannot be empty".to_string(),
            ));
        }

        if self.transport.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "transport.timeout_ms must be greater than zero".to_string(),
            ));
        }

        if let Some(gpib) = &self.transport.gpib {
            if !gpib.controller.eq_ignore_ascii_case("prologix") {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown GPIB controller '{}'. Must be: prologix",
                    gpib.controller
                )));
            }
            if gpib.port.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "transport.gpib.port cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Directory scanned for generic instrument definitions.
    pub fn definitions_dir(&self) -> PathBuf {
        self.paths
            .definitions_dir
            .clone()
            .unwrap_or_else(|| self.paths.default_dir.join("instruments"))
    }

    /// Grace period after a stop request.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.dispatcher.stop_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.paths.default_extension, "dsc");
        assert_eq!(settings.dispatcher.snippet_extension, "rhai");
        assert!(settings.definitions_dir().ends_with("instruments"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("/nonexistent/daq_script.toml").unwrap();
        assert_eq!(settings.transport.network_port, 5025);
        assert_eq!(settings.dispatcher.stop_grace_ms, 250);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[paths]
output_stem = "cooldown"

[transport]
serial_ports = {{ COM3 = "/dev/ttyUSB0" }}

[transport.gpib]
controller = "prologix"
port = "/dev/ttyACM0"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.paths.output_stem, "cooldown");
        assert_eq!(settings.transport.serial_ports["COM3"], "/dev/ttyUSB0");
        let gpib = settings.transport.gpib.unwrap();
        assert_eq!(gpib.baud, 115_200);
    }

    #[test]
    fn rejects_bad_values() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".into();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut settings = Settings::default();
        settings.paths.default_extension = ".dsc".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.transport.gpib = Some(GpibControllerSettings {
            controller: "ni488".into(),
            port: "/dev/ttyACM0".into(),
            baud: 9600,
        });
        assert!(settings.validate().is_err());
    }
}
