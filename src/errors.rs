//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all protocol and session failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Length header could not be parsed, or the stream ended mid-frame.
    Framing(String),
    /// Payload does not have the shape of a known message.
    MalformedMessage(String),
    /// Request named a command tag with no registered handler.
    UnknownCommand(String),
    /// Evaluation was cancelled by the user or the interpreter.
    Abort(Option<String>),
    /// Evaluation raised an error inside the interpreter.
    Interpreter(InterpreterError),
    /// Interpreter process could not be spawned, died, or stopped answering.
    Process(String),
    /// File-system or socket I/O failure.
    Io(String),
}

/// Error raised by the interpreter while evaluating a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterError {
    /// Human-readable condition text as printed by the interpreter.
    pub message: String,
    /// Stack frame descriptions, innermost first.
    pub stack: Vec<String>,
    /// Whether the interpreter can no longer safely continue or quit to top level.
    pub fatal: bool,
}

impl InterpreterError {
    /// Build a non-fatal interpreter error.
    #[must_use]
    pub fn new(message: impl Into<String>, stack: Vec<String>) -> Self {
        Self {
            message: message.into(),
            stack,
            fatal: false,
        }
    }

    /// Build a fatal interpreter error.
    #[must_use]
    pub fn fatal(message: impl Into<String>, stack: Vec<String>) -> Self {
        Self {
            message: message.into(),
            stack,
            fatal: true,
        }
    }
}

impl AppError {
    /// Whether the connection can keep serving requests after this error.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Framing(_) | Self::Io(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Framing(msg) => write!(f, "framing: {msg}"),
            Self::MalformedMessage(msg) => write!(f, "malformed message: {msg}"),
            Self::UnknownCommand(tag) => write!(f, "unknown command: {tag}"),
            Self::Abort(Some(msg)) => write!(f, "abort: {msg}"),
            Self::Abort(None) => write!(f, "abort"),
            Self::Interpreter(err) if err.fatal => write!(f, "fatal interpreter error: {}", err.message),
            Self::Interpreter(err) => write!(f, "interpreter error: {}", err.message),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<InterpreterError> for AppError {
    fn from(err: InterpreterError) -> Self {
        Self::Interpreter(err)
    }
}
