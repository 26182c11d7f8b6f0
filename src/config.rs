//! Global configuration parsing and validation.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 4005
//! port_file = "/tmp/euslime-port"
//!
//! [interpreter]
//! program = "irteusgl"
//! args = []
//! init_file = "~/.euslime/init.l"
//!
//! [session]
//! interrupt_prompt_timeout_ms = 2000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::session::{SessionSettings, DEFAULT_DELIMITER};
use crate::interpreter::process::ProcessConfig;
use crate::{AppError, Result};

/// Listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind; 0 picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// File the bound port is written to.
    #[serde(default)]
    pub port_file: Option<PathBuf>,
    /// Keep accepting connections after the first editor disconnects.
    #[serde(default)]
    pub dont_close: bool,
    /// Time in-flight requests get to finish once a connection ends.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            port_file: None,
            dont_close: false,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Interpreter process settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InterpreterConfig {
    /// Executable to launch.
    #[serde(default = "default_program")]
    pub program: String,
    /// Extra command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// File loaded at startup that installs the backend toplevel.
    #[serde(default)]
    pub init_file: Option<PathBuf>,
    /// Working directory for the process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Marker prefixing structured reply lines on stdout.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Time allowed for the process to report ready.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            init_file: None,
            working_dir: None,
            delimiter: default_delimiter(),
            startup_timeout_seconds: default_startup_timeout_seconds(),
        }
    }
}

/// Per-connection session settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// How long an interrupt's prompt refresh waits for the gate.
    #[serde(default = "default_interrupt_prompt_timeout_ms")]
    pub interrupt_prompt_timeout_ms: u64,
    /// Package reported before the interpreter names one.
    #[serde(default = "default_package")]
    pub default_package: String,
    /// Protocol version reported to the editor.
    #[serde(default = "default_swank_version")]
    pub swank_version: String,
    /// Frames fetched by `backtrace` when the editor gives no end index.
    #[serde(default = "default_backtrace_depth")]
    pub backtrace_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interrupt_prompt_timeout_ms: default_interrupt_prompt_timeout_ms(),
            default_package: default_package(),
            swank_version: default_swank_version(),
            backtrace_depth: default_backtrace_depth(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4005
}

fn default_shutdown_grace_ms() -> u64 {
    1000
}

fn default_program() -> String {
    "irteusgl".into()
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.into()
}

fn default_startup_timeout_seconds() -> u64 {
    30
}

fn default_interrupt_prompt_timeout_ms() -> u64 {
    2000
}

fn default_package() -> String {
    "USER".into()
}

fn default_swank_version() -> String {
    "2.20".into()
}

fn default_backtrace_depth() -> usize {
    100
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `[server]` table.
    #[serde(default)]
    pub server: ServerConfig,
    /// `[interpreter]` table.
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    /// `[session]` table.
    #[serde(default)]
    pub session: SessionConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints. Run again after CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(AppError::Config("server.host must not be empty".into()));
        }
        if self.interpreter.program.trim().is_empty() {
            return Err(AppError::Config(
                "interpreter.program must not be empty".into(),
            ));
        }
        if self.interpreter.delimiter.is_empty() {
            return Err(AppError::Config(
                "interpreter.delimiter must not be empty".into(),
            ));
        }
        if self.interpreter.startup_timeout_seconds == 0 {
            return Err(AppError::Config(
                "interpreter.startup_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.session.default_package.trim().is_empty() {
            return Err(AppError::Config(
                "session.default_package must not be empty".into(),
            ));
        }
        if self.session.backtrace_depth == 0 {
            return Err(AppError::Config(
                "session.backtrace_depth must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Settings for the interpreter process adapter.
    #[must_use]
    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig {
            program: self.interpreter.program.clone(),
            args: self.interpreter.args.clone(),
            init_file: self.interpreter.init_file.clone(),
            working_dir: self.interpreter.working_dir.clone(),
            delimiter: self.interpreter.delimiter.clone(),
            startup_timeout: Duration::from_secs(self.interpreter.startup_timeout_seconds),
        }
    }

    /// Settings applied to every session.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            delimiter: self.interpreter.delimiter.clone(),
            prompt_timeout: Duration::from_millis(self.session.interrupt_prompt_timeout_ms),
            swank_version: self.session.swank_version.clone(),
            default_package: self.session.default_package.clone(),
            backtrace_depth: self.session.backtrace_depth,
        }
    }

    /// Grace period for in-flight requests at connection end.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_grace_ms)
    }
}
