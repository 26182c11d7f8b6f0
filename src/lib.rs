#![forbid(unsafe_code)]

//! SWANK backend exposing an EusLisp interpreter to SLIME.
//!
//! - [`swank`]: framing, S-expressions, message model, writer task.
//! - [`interpreter`]: the adapter interface and the subprocess adapter.
//! - [`engine`]: execution gate, debugger levels, output relay, session.
//! - [`dispatch`]: command registry and handlers.
//! - [`server`]: listener and per-connection loop.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod interpreter;
pub mod server;
pub mod swank;

pub use config::GlobalConfig;
pub use errors::{AppError, InterpreterError, Result};
