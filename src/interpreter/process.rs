//! Subprocess-backed [`Interpreter`] adapter.
//!
//! Spawns the configured interpreter program with piped stdio and
//! `kill_on_drop(true)`, then speaks a line protocol with the toplevel
//! loaded from the init file:
//!
//! - Requests are written as one form each:
//!   `(slime::euslime-eval "CODE")`, `(slime::euslime-exec "CODE" :internal)`,
//!   `(slime::euslime-exec "CODE" :repl)`, `(slime::euslime-reset)`.
//! - Reply lines start with the configured delimiter followed by one form:
//!
//! | Reply                         | Meaning                                |
//! |-------------------------------|----------------------------------------|
//! | `(:ready)`                    | Startup finished                       |
//! | `(:ok VALUE)`                 | Request completed                      |
//! | `(:abort MSG-OR-NIL)`         | Request cancelled                      |
//! | `(:error MSG (FRAME…) FATAL)` | Request raised                         |
//! | `(:repl-result TEXT)`         | Printed evaluation result (streamed)   |
//!
//! - Every other stdout or stderr line is incidental output.
//!
//! Requests are serialised by holding the stdout reader for the duration of
//! a request. Stdin is locked separately so user input can reach a blocked
//! read, and the child's pid is kept outside any lock so interrupts never
//! wait.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::InterpreterError;
use crate::interpreter::{BoxFuture, Channel, Interpreter, OutputChunk, OutputSender};
use crate::swank::sexp::{self, escape_str, Sexp};
use crate::{AppError, Result};

/// Configuration for spawning the interpreter process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Interpreter binary (e.g. `irteusgl`).
    pub program: String,
    /// Arguments passed before the init file.
    pub args: Vec<String>,
    /// Toplevel file implementing the reply protocol, passed as last argument.
    pub init_file: Option<PathBuf>,
    /// Working directory for the child; inherits the server's when `None`.
    pub working_dir: Option<PathBuf>,
    /// Prefix marking protocol reply lines.
    pub delimiter: String,
    /// How long to wait for the `(:ready)` reply after spawning.
    pub startup_timeout: Duration,
}

/// One classified line of interpreter stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyLine {
    /// Incidental output.
    Output(String),
    /// Startup finished.
    Ready,
    /// Printed evaluation result text.
    ReplResult(String),
    /// Request completed with a value.
    Ok(Sexp),
    /// Request cancelled.
    Abort(Option<String>),
    /// Request raised.
    Error(InterpreterError),
}

/// Classify a single stdout line.
///
/// # Errors
///
/// Returns [`AppError::Process`] when a delimited line does not carry a
/// recognised reply form.
pub fn parse_reply_line(line: &str, delimiter: &str) -> Result<ReplyLine> {
    let Some(rest) = line.strip_prefix(delimiter) else {
        return Ok(ReplyLine::Output(line.to_owned()));
    };
    let reply = sexp::parse(rest)
        .map_err(|e| AppError::Process(format!("unreadable reply {rest:?}: {e}")))?;
    let items = reply.as_list().unwrap_or(&[]);

    match items {
        [tag] if tag.is_symbol(":ready") => Ok(ReplyLine::Ready),
        [tag, value] if tag.is_symbol(":ok") => Ok(ReplyLine::Ok(value.clone())),
        [tag, Sexp::Str(text)] if tag.is_symbol(":repl-result") => {
            Ok(ReplyLine::ReplResult(text.clone()))
        }
        [tag, message] if tag.is_symbol(":abort") => {
            Ok(ReplyLine::Abort(message.as_str().map(str::to_owned)))
        }
        [tag, message, stack, fatal] if tag.is_symbol(":error") => {
            let message = message
                .as_str()
                .map_or_else(|| message.to_string(), str::to_owned);
            let stack = stack
                .as_list()
                .unwrap_or(&[])
                .iter()
                .map(|frame| frame.as_str().map_or_else(|| frame.to_string(), str::to_owned))
                .collect();
            Ok(ReplyLine::Error(InterpreterError {
                message,
                stack,
                fatal: fatal.is_truthy(),
            }))
        }
        _ => Err(AppError::Process(format!("unrecognised reply {reply}"))),
    }
}

/// Interpreter running as a child process.
#[derive(Debug)]
pub struct ProcessInterpreter {
    config: ProcessConfig,
    output: OutputSender,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<Lines<BufReader<ChildStdout>>>>,
    pid: AtomicU32,
}

impl ProcessInterpreter {
    /// Create an adapter; the process is launched by [`Interpreter::start`].
    #[must_use]
    pub fn new(config: ProcessConfig, output: OutputSender) -> Self {
        Self {
            config,
            output,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
            pid: AtomicU32::new(0),
        }
    }

    fn emit(&self, chunk: OutputChunk) {
        if self.output.send(chunk).is_err() {
            debug!("interpreter: output receiver dropped");
        }
    }

    async fn launch(&self) -> Result<()> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);
        if let Some(ref init_file) = self.config.init_file {
            cmd.arg(init_file);
        }
        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Process(format!(
                "failed to spawn interpreter {}: {err}",
                self.config.program
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Process("failed to capture interpreter stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Process("failed to capture interpreter stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            let output = self.output.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if output.send(OutputChunk::plain(format!("{line}\n"))).is_err() {
                        break;
                    }
                }
            });
        }

        let mut lines = BufReader::new(stdout).lines();
        let ready = tokio::time::timeout(self.config.startup_timeout, async {
            loop {
                let line = lines
                    .next_line()
                    .await
                    .map_err(|e| AppError::Process(format!("failed to read ready signal: {e}")))?
                    .ok_or_else(|| {
                        AppError::Process("interpreter exited before ready signal".into())
                    })?;
                match parse_reply_line(&line, &self.config.delimiter)? {
                    ReplyLine::Ready => return Ok::<(), AppError>(()),
                    ReplyLine::Output(text) => self.emit(OutputChunk::plain(format!("{text}\n"))),
                    other => debug!(?other, "interpreter: ignoring reply before ready"),
                }
            }
        })
        .await;

        match ready {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) => {
                child.kill().await.ok();
                return Err(AppError::Process(format!(
                    "startup timeout: interpreter not ready within {:?}",
                    self.config.startup_timeout
                )));
            }
        }

        let pid = child.id().unwrap_or(0);
        info!(pid, program = %self.config.program, "interpreter ready");
        self.pid.store(pid, Ordering::SeqCst);
        *self.stdin.lock().await = Some(stdin);
        *self.stdout.lock().await = Some(lines);
        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| AppError::Process("interpreter is not running".into()))?;
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        stdin
            .write_all(&bytes)
            .await
            .map_err(|e| AppError::Process(format!("write to interpreter failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| AppError::Process(format!("write to interpreter failed: {e}")))
    }

    /// Send one request and read until its terminal reply.
    async fn request(&self, form: String) -> Result<Sexp> {
        let mut reader = self.stdout.lock().await;
        self.write_line(&form).await?;
        let lines = reader
            .as_mut()
            .ok_or_else(|| AppError::Process("interpreter is not running".into()))?;

        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| AppError::Process(format!("read from interpreter failed: {e}")))?
                .ok_or_else(|| AppError::Process("interpreter exited".into()))?;
            match parse_reply_line(&line, &self.config.delimiter)? {
                ReplyLine::Output(text) => self.emit(OutputChunk::plain(format!("{text}\n"))),
                ReplyLine::ReplResult(text) => self.emit(OutputChunk::repl_result(text)),
                ReplyLine::Ready => debug!("interpreter: stray ready signal"),
                ReplyLine::Ok(value) => return Ok(value),
                ReplyLine::Abort(message) => return Err(AppError::Abort(message)),
                ReplyLine::Error(err) => return Err(AppError::Interpreter(err)),
            }
        }
    }
}

impl Interpreter for ProcessInterpreter {
    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.child.lock().await.is_some() {
                debug!("interpreter: start requested while running");
                return Ok(());
            }
            self.launch().await
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let child = self.child.lock().await.take();
            self.pid.store(0, Ordering::SeqCst);
            if let Some(mut child) = child {
                child.kill().await.ok();
                match child.wait().await {
                    Ok(status) => info!(%status, "interpreter stopped"),
                    Err(err) => warn!(%err, "error waiting for interpreter exit"),
                }
            }
            self.stdin.lock().await.take();
            self.stdout.lock().await.take();
            Ok(())
        })
    }

    fn reset(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.request("(slime::euslime-reset)".to_owned()).await?;
            Ok(())
        })
    }

    fn exec_internal(&self, command: String, channel: Channel) -> BoxFuture<'_, Result<Sexp>> {
        Box::pin(async move {
            let target = match channel {
                Channel::Internal => ":internal",
                Channel::Repl => ":repl",
            };
            self.request(format!(
                "(slime::euslime-exec \"{}\" {target})",
                escape_str(&command)
            ))
            .await
        })
    }

    fn eval(&self, command: String) -> BoxFuture<'_, Result<Vec<OutputChunk>>> {
        Box::pin(async move {
            self.request(format!("(slime::euslime-eval \"{}\")", escape_str(&command)))
                .await?;
            Ok(Vec::new())
        })
    }

    fn call_stack(&self, depth: usize) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let frames = self
                .request(format!("(slime::euslime-callstack {depth})"))
                .await?;
            Ok(frames
                .as_list()
                .unwrap_or(&[])
                .iter()
                .map(|frame| frame.as_str().map_or_else(|| frame.to_string(), str::to_owned))
                .collect())
        })
    }

    fn send_input(&self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.write_line(text.trim_end_matches('\n')).await })
    }

    fn interrupt(&self) -> Result<()> {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 {
            debug!("interpreter: interrupt with no running process");
            return Ok(());
        }
        send_sigint(pid)
    }
}

#[cfg(unix)]
fn send_sigint(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| AppError::Process(format!("pid {pid} out of range")))?;
    kill(Pid::from_raw(raw), Signal::SIGINT)
        .map_err(|err| AppError::Process(format!("failed to interrupt pid {pid}: {err}")))
}

#[cfg(not(unix))]
fn send_sigint(pid: u32) -> Result<()> {
    Err(AppError::Process(format!(
        "interrupting pid {pid} is not supported on this platform"
    )))
}
