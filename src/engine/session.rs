//! Per-connection session state.
//!
//! A [`Session`] is owned by exactly one connection. It holds the shared
//! interpreter handle, the execution gate, the output relay, the debugger
//! stack and the current package. Request ids are always passed in
//! explicitly; nothing here tracks "the current request".

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::debugger::{trim_message, DebuggerFrame, DebuggerStack, RestartKind};
use crate::engine::gate::ExecutionGate;
use crate::engine::relay::OutputRelay;
use crate::interpreter::{Channel, Interpreter, OutputReceiver};
use crate::swank::message::{Event, Response, ReturnValue};
use crate::swank::sexp::Sexp;
use crate::swank::writer::Outbox;
use crate::{AppError, Result};

/// Interpreter command answering `("PACKAGE" "prompt")`.
const PROMPT_COMMAND: &str = "(slime::slime-prompt)";

/// Default structural delimiter separating interpreter replies from output.
pub const DEFAULT_DELIMITER: &str = ";;euslime;; ";

/// Tunables for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Interpreter delimiter, used to trim debugger messages.
    pub delimiter: String,
    /// How long an interrupt-triggered prompt refresh waits for the gate.
    pub prompt_timeout: Duration,
    /// Protocol version reported by `connection-info`.
    pub swank_version: String,
    /// Package assumed before the interpreter reports one.
    pub default_package: String,
    /// Frames fetched by `backtrace` when the editor gives no end index.
    pub backtrace_depth: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_owned(),
            prompt_timeout: Duration::from_secs(2),
            swank_version: "2.20".to_owned(),
            default_package: "USER".to_owned(),
            backtrace_depth: 100,
        }
    }
}

/// Current package name and REPL prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageState {
    /// Package name, e.g. `USER`.
    pub name: String,
    /// Prompt text, e.g. `irteusgl`.
    pub prompt: String,
}

impl PackageState {
    /// Read `("NAME" "PROMPT")` as returned by the interpreter.
    #[must_use]
    pub fn from_sexp(value: &Sexp) -> Option<Self> {
        match value.as_list()? {
            [Sexp::Str(name), Sexp::Str(prompt), ..] => Some(Self {
                name: name.clone(),
                prompt: prompt.clone(),
            }),
            _ => None,
        }
    }

    fn event(&self) -> Event {
        Event::NewPackage {
            name: self.name.clone(),
            prompt: self.prompt.clone(),
        }
    }
}

/// State shared by every request on one connection.
pub struct Session {
    interpreter: Arc<dyn Interpreter>,
    gate: ExecutionGate,
    relay: OutputRelay,
    debugger: Mutex<DebuggerStack>,
    package: Mutex<PackageState>,
    settings: SessionSettings,
    closed: CancellationToken,
}

impl Session {
    /// Build a session around a started (or startable) interpreter.
    ///
    /// `output` must be the receiver paired with the sender the
    /// interpreter was constructed with.
    #[must_use]
    pub fn new(interpreter: Arc<dyn Interpreter>, output: OutputReceiver, settings: SessionSettings) -> Self {
        let package = PackageState {
            name: settings.default_package.clone(),
            prompt: settings.default_package.clone(),
        };
        Self {
            interpreter,
            gate: ExecutionGate::new(),
            relay: OutputRelay::new(output),
            debugger: Mutex::new(DebuggerStack::new()),
            package: Mutex::new(package),
            settings,
            closed: CancellationToken::new(),
        }
    }

    /// The interpreter handle. Stays valid across restarts.
    #[must_use]
    pub fn interpreter(&self) -> &dyn Interpreter {
        self.interpreter.as_ref()
    }

    /// The execution gate.
    #[must_use]
    pub fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    /// The output relay.
    #[must_use]
    pub fn relay(&self) -> &OutputRelay {
        &self.relay
    }

    /// Session tunables.
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Snapshot of the current package.
    pub async fn package(&self) -> PackageState {
        self.package.lock().await.clone()
    }

    /// Record a package change reported by the interpreter.
    pub async fn set_package(&self, state: PackageState) {
        *self.package.lock().await = state;
    }

    /// Number of active debugger levels.
    pub async fn debugger_depth(&self) -> usize {
        self.debugger.lock().await.depth()
    }

    /// Ask the interpreter for its prompt and remember it.
    ///
    /// Returns `None` when the interpreter answered with something other
    /// than a package/prompt pair.
    ///
    /// # Errors
    ///
    /// Propagates the interpreter's failure.
    pub async fn fetch_prompt(&self) -> Result<Option<PackageState>> {
        let value = self
            .interpreter
            .exec_internal(PROMPT_COMMAND.to_owned(), Channel::Repl)
            .await?;
        let Some(state) = PackageState::from_sexp(&value) else {
            debug!(%value, "session: prompt query returned no package");
            return Ok(None);
        };
        self.set_package(state.clone()).await;
        Ok(Some(state))
    }

    /// Query the prompt and queue `(:new-package NAME PROMPT)`.
    ///
    /// # Errors
    ///
    /// Propagates the interpreter's failure.
    pub async fn refresh_prompt(&self, outbox: &Outbox) -> Result<()> {
        if let Some(state) = self.fetch_prompt().await? {
            outbox.event(state.event());
        }
        Ok(())
    }

    /// Push a debugger level and announce it.
    pub async fn enter_debugger(&self, frame: DebuggerFrame, outbox: &Outbox) -> usize {
        let mut stack = self.debugger.lock().await;
        let level = stack.depth() + 1;
        warn!(
            level,
            id = frame.id,
            fatal = frame.fatal,
            message = %frame.message,
            "debugger: entering level"
        );
        outbox.event(frame.debug_event(level));
        outbox.event(Event::DebugActivate { level });
        stack.push(frame)
    }

    /// Resolve debugger `level` with the restart at `index`.
    ///
    /// Events that precede the invoking request's final result are queued
    /// directly; the returned responses must be queued after it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MalformedMessage`] when `level` is not active.
    pub async fn invoke_restart(&self, level: usize, index: usize, outbox: &Outbox) -> Result<Vec<Response>> {
        let resolution = self.debugger.lock().await.resolve(level, index).ok_or_else(|| {
            AppError::MalformedMessage(format!("no debugger level {level} is active"))
        })?;

        for (unwound, frame) in &resolution.above {
            outbox.event(Event::DebugReturn { level: *unwound });
            outbox.finish(frame.id, self.abort_value(frame));
        }

        match resolution.action {
            Some(RestartKind::Quit) => {
                info!(level, "debugger: quit to top level");
                if let Err(err) = self.interpreter.reset().await {
                    warn!(%err, "debugger: interpreter reset failed");
                }
            }
            Some(RestartKind::Continue) => debug!(level, "debugger: continue"),
            Some(RestartKind::Restart) => {
                info!(level, "debugger: restarting interpreter");
                if let Err(err) = self.interpreter.restart().await {
                    error!(%err, "debugger: interpreter restart failed");
                }
                self.relay.discard().await;
            }
            None => error!(level, index, "debugger: no restart at this index"),
        }

        outbox.event(Event::DebugReturn { level });

        let mut trailing = Vec::new();
        match self.fetch_prompt().await {
            Ok(Some(state)) => trailing.push(state.event().into()),
            Ok(None) => {}
            Err(err) => warn!(%err, "debugger: prompt refresh failed"),
        }
        trailing.push(Response::Return {
            value: self.abort_value(&resolution.frame),
            id: resolution.frame.id,
        });
        for (unwound, frame) in &resolution.below {
            trailing.push(Event::DebugReturn { level: *unwound }.into());
            trailing.push(Response::Return {
                value: self.abort_value(frame),
                id: frame.id,
            });
        }
        Ok(trailing)
    }

    /// Invoke restart 0 at the innermost level.
    ///
    /// Returns `None` when the debugger is not active.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::invoke_restart`] failures.
    pub async fn throw_to_toplevel(&self, outbox: &Outbox) -> Result<Option<Vec<Response>>> {
        let depth = self.debugger_depth().await;
        if depth == 0 {
            return Ok(None);
        }
        self.invoke_restart(depth, 0, outbox).await.map(Some)
    }

    /// Signal the interpreter to abandon its current evaluation.
    ///
    /// Does not touch the gate.
    ///
    /// # Errors
    ///
    /// Propagates the adapter's failure to deliver the signal.
    pub fn interrupt(&self) -> Result<()> {
        info!(busy = self.gate.is_held(), "session: interrupting interpreter");
        self.interpreter.interrupt()
    }

    /// Request that the connection be closed.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Token cancelled once [`Session::close`] has been called.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn abort_value(&self, frame: &DebuggerFrame) -> ReturnValue {
        ReturnValue::Abort(Some(
            trim_message(&frame.message, &self.settings.delimiter).to_owned(),
        ))
    }
}
