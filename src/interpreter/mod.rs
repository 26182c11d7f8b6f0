//! Interpreter adapter abstraction.
//!
//! The [`Interpreter`] trait decouples the protocol engine from the process
//! that actually evaluates code. The engine only ever talks to an
//! `Arc<dyn Interpreter>`; restarting the interpreter is a state transition
//! inside the adapter, so holders of the handle never need to rebind it.
//!
//! Incidental output (prints, REPL result text) is not returned from calls.
//! Adapters push it as [`OutputChunk`]s into the [`OutputSender`] they were
//! constructed with, and the session's output relay forwards it.

pub mod process;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::swank::sexp::Sexp;
use crate::Result;

/// Boxed future returned by [`Interpreter`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sender half of the incidental output channel.
pub type OutputSender = mpsc::UnboundedSender<OutputChunk>;

/// Receiver half of the incidental output channel.
pub type OutputReceiver = mpsc::UnboundedReceiver<OutputChunk>;

/// Create a connected output channel pair.
#[must_use]
pub fn output_channel() -> (OutputSender, OutputReceiver) {
    mpsc::unbounded_channel()
}

/// A piece of interpreter output destined for the REPL buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Text as printed.
    pub text: String,
    /// Whether the text is the printed value of an evaluation.
    pub repl_result: bool,
}

impl OutputChunk {
    /// Plain output text.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            repl_result: false,
        }
    }

    /// Printed evaluation result text.
    #[must_use]
    pub fn repl_result(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            repl_result: true,
        }
    }
}

/// Which interpreter channel a command is sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Side channel for introspection queries.
    Internal,
    /// The REPL channel, used when the command must observe REPL state
    /// (current package, REPL variables, loaded files).
    Repl,
}

/// Interface the protocol engine consumes to drive an interpreter.
///
/// Every fallible call distinguishes three failure kinds:
///
/// - [`AppError::Abort`](crate::AppError::Abort): evaluation was cancelled.
/// - [`AppError::Interpreter`](crate::AppError::Interpreter): evaluation
///   raised; the error's `fatal` flag says whether the interpreter can
///   continue.
/// - [`AppError::Process`](crate::AppError::Process): the process itself
///   failed (spawn failure, unexpected exit, broken pipe).
pub trait Interpreter: Send + Sync {
    /// Launch the interpreter. Idempotent when already running.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`](crate::AppError::Process) if the process
    /// cannot be spawned or does not become ready.
    fn start(&self) -> BoxFuture<'_, Result<()>>;

    /// Terminate the interpreter. Idempotent when already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`](crate::AppError::Process) if the process
    /// cannot be terminated.
    fn stop(&self) -> BoxFuture<'_, Result<()>>;

    /// Tear down and relaunch the interpreter process.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Interpreter::stop`] and [`Interpreter::start`].
    fn restart(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stop().await?;
            self.start().await
        })
    }

    /// Return the running interpreter to a fresh top-level state.
    ///
    /// # Errors
    ///
    /// Returns the interpreter's failure if the reset command fails.
    fn reset(&self) -> BoxFuture<'_, Result<()>>;

    /// Run an introspection command and return its value.
    ///
    /// # Errors
    ///
    /// Returns an abort, interpreter, or process error as described on the trait.
    fn exec_internal(&self, command: String, channel: Channel) -> BoxFuture<'_, Result<Sexp>>;

    /// Evaluate user code on the REPL channel.
    ///
    /// Returns the output chunks produced as the evaluation's own result
    /// stream; incidental output goes to the output sender instead.
    ///
    /// # Errors
    ///
    /// Returns an abort, interpreter, or process error as described on the trait.
    fn eval(&self, command: String) -> BoxFuture<'_, Result<Vec<OutputChunk>>>;

    /// Fetch up to `depth` stack frame descriptions, innermost first.
    ///
    /// # Errors
    ///
    /// Returns an abort, interpreter, or process error as described on the trait.
    fn call_stack(&self, depth: usize) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Deliver user-typed text to a pending read.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`](crate::AppError::Process) if the text
    /// cannot be written.
    fn send_input(&self, text: String) -> BoxFuture<'_, Result<()>>;

    /// Ask the interpreter to abandon the current evaluation.
    ///
    /// Must not block on any in-flight call.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`](crate::AppError::Process) if the signal
    /// cannot be delivered.
    fn interrupt(&self) -> Result<()>;
}
