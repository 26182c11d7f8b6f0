//! Shared test helpers for connection-level integration tests.
//!
//! Provides a scripted in-memory [`Interpreter`] that records every call,
//! and a [`Harness`] that serves a session over an in-memory duplex pipe so
//! tests can speak the wire protocol directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use euslime::engine::session::{Session, SessionSettings};
use euslime::interpreter::{
    output_channel, BoxFuture, Channel, Interpreter, OutputChunk, OutputSender,
};
use euslime::server::serve_connection;
use euslime::swank::codec::{encode_frame, read_frame};
use euslime::swank::sexp::Sexp;
use euslime::{AppError, InterpreterError, Result};

/// How long a test waits for any single frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Scripted outcome of one `eval` call.
#[derive(Debug, Clone)]
pub enum EvalReply {
    /// Print each string as REPL result output, then succeed.
    Print(Vec<&'static str>),
    /// Succeed, returning these chunks as the evaluation's own result.
    Chunks(Vec<OutputChunk>),
    /// Fail with an interpreter error.
    Error(InterpreterError),
    /// Cancelled with the given message.
    Abort(Option<&'static str>),
    /// Process failure.
    Process(&'static str),
    /// Wait until `interrupt` is called, then abort without a message.
    Block,
}

/// In-memory interpreter double.
pub struct ScriptedInterpreter {
    output: OutputSender,
    replies: Mutex<VecDeque<EvalReply>>,
    interrupted: Notify,
    /// Code passed to `eval`, in call order.
    pub evals: Mutex<Vec<String>>,
    /// Commands passed to `exec_internal`, in call order.
    pub execs: Mutex<Vec<(String, Channel)>>,
    /// Text passed to `send_input`.
    pub inputs: Mutex<Vec<String>>,
    /// Lifecycle counters.
    pub starts: AtomicUsize,
    /// Lifecycle counters.
    pub stops: AtomicUsize,
    /// Lifecycle counters.
    pub resets: AtomicUsize,
    /// Number of interrupts received.
    pub interrupts: AtomicUsize,
}

impl ScriptedInterpreter {
    pub fn new(output: OutputSender) -> Self {
        Self {
            output,
            replies: Mutex::new(VecDeque::new()),
            interrupted: Notify::new(),
            evals: Mutex::new(Vec::new()),
            execs: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
        }
    }

    /// Queue the outcome of the next `eval`. Unscripted evals succeed
    /// silently.
    pub fn script(&self, reply: EvalReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Emit incidental output as if the interpreter printed it on its own.
    pub fn print(&self, text: &str) {
        self.output.send(OutputChunk::plain(text)).unwrap();
    }

    pub fn exec_commands(&self) -> Vec<String> {
        self.execs
            .lock()
            .unwrap()
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn answer(command: &str) -> Sexp {
        if command == "(slime::slime-prompt)" {
            return Sexp::List(vec![Sexp::string("USER"), Sexp::string("irteusgl")]);
        }
        if command == "(slime::implementation-version)" {
            return Sexp::string("9.27");
        }
        if command.starts_with("(lisp:pathname-name") {
            return Sexp::string("irteusgl");
        }
        if command.starts_with("(slime::autodoc \"defun\"") {
            return Sexp::string("(defun name args &rest body)");
        }
        if command.starts_with("(slime::slime-find-symbol") {
            return Sexp::List(vec![
                Sexp::List(vec![Sexp::string("list"), Sexp::string("list*")]),
                Sexp::string("list"),
            ]);
        }
        if command.starts_with("(lisp:load") {
            return Sexp::T;
        }
        if command.starts_with("(lisp:progn (lisp:cd") {
            return Sexp::string("/tmp/");
        }
        if command.starts_with("(slime::set-package") {
            return Sexp::List(vec![Sexp::string("KEYWORD"), Sexp::string("keyword")]);
        }
        if command == "(lisp:pwd)" {
            return Sexp::string("/home/user/");
        }
        Sexp::Nil
    }
}

impl Interpreter for ScriptedInterpreter {
    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn reset(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn exec_internal(&self, command: String, channel: Channel) -> BoxFuture<'_, Result<Sexp>> {
        Box::pin(async move {
            let answer = Self::answer(&command);
            self.execs.lock().unwrap().push((command, channel));
            Ok(answer)
        })
    }

    fn eval(&self, command: String) -> BoxFuture<'_, Result<Vec<OutputChunk>>> {
        Box::pin(async move {
            self.evals.lock().unwrap().push(command);
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                None => Ok(Vec::new()),
                Some(EvalReply::Print(texts)) => {
                    for text in texts {
                        self.output.send(OutputChunk::repl_result(text)).unwrap();
                    }
                    Ok(Vec::new())
                }
                Some(EvalReply::Chunks(chunks)) => Ok(chunks),
                Some(EvalReply::Error(err)) => Err(AppError::Interpreter(err)),
                Some(EvalReply::Abort(message)) => Err(AppError::Abort(message.map(str::to_owned))),
                Some(EvalReply::Process(message)) => Err(AppError::Process(message.to_owned())),
                Some(EvalReply::Block) => {
                    self.interrupted.notified().await;
                    Err(AppError::Abort(None))
                }
            }
        })
    }

    fn call_stack(&self, depth: usize) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { Ok((0..depth.min(5)).map(|i| format!("frame-{i}")).collect()) })
    }

    fn send_input(&self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inputs.lock().unwrap().push(text);
            Ok(())
        })
    }

    fn interrupt(&self) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.interrupted.notify_one();
        Ok(())
    }
}

/// A session served over an in-memory pipe.
pub struct Harness {
    client: DuplexStream,
    pub interpreter: Arc<ScriptedInterpreter>,
    pub session: Arc<Session>,
    pub cancel: CancellationToken,
    server: JoinHandle<Result<()>>,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(SessionSettings {
            prompt_timeout: Duration::from_secs(2),
            ..SessionSettings::default()
        })
    }

    pub fn start_with(settings: SessionSettings) -> Self {
        let (output_tx, output_rx) = output_channel();
        let interpreter = Arc::new(ScriptedInterpreter::new(output_tx));
        let session = Arc::new(Session::new(
            Arc::clone(&interpreter) as Arc<dyn Interpreter>,
            output_rx,
            settings,
        ));
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_connection(
            server_side,
            Arc::clone(&session),
            cancel.clone(),
            Duration::from_secs(1),
        ));
        Self {
            client,
            interpreter,
            session,
            cancel,
            server,
        }
    }

    /// Send one payload as a frame.
    pub async fn send(&mut self, payload: &str) {
        let frame = encode_frame(payload).expect("payload fits in a frame");
        self.client.write_all(&frame).await.expect("write frame");
        self.client.flush().await.expect("flush frame");
    }

    /// Send raw bytes without framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.client.write_all(bytes).await.expect("write raw bytes");
        self.client.flush().await.expect("flush raw bytes");
    }

    /// Receive the next frame's payload.
    pub async fn recv(&mut self) -> String {
        tokio::time::timeout(FRAME_TIMEOUT, read_frame(&mut self.client))
            .await
            .expect("frame arrives in time")
            .expect("frame decodes")
    }

    /// Receive the next frame if one arrives within `limit`.
    pub async fn recv_within(&mut self, limit: Duration) -> Option<String> {
        tokio::time::timeout(limit, read_frame(&mut self.client))
            .await
            .ok()
            .map(|frame| frame.expect("frame decodes"))
    }

    /// Receive frames up to and including the final result for `id`.
    pub async fn recv_until_return(&mut self, id: i64) -> Vec<String> {
        let suffix = format!(" {id})");
        let mut frames = Vec::new();
        loop {
            let frame = self.recv().await;
            let done = frame.starts_with("(:return ") && frame.ends_with(&suffix);
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    /// Wait until no evaluation holds the gate.
    pub async fn wait_gate_idle(&self) {
        tokio::time::timeout(FRAME_TIMEOUT, async {
            while self.session.gate().is_held() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("gate becomes idle");
    }

    /// Close the client side and wait for the connection to wind down.
    pub async fn finish(self) -> Result<()> {
        drop(self.client);
        tokio::time::timeout(FRAME_TIMEOUT, self.server)
            .await
            .expect("connection ends in time")
            .expect("connection task does not panic")
    }

    /// Wait for the connection to end while keeping the client open.
    pub async fn join(self) -> Result<()> {
        let Self { client, server, .. } = self;
        let result = tokio::time::timeout(FRAME_TIMEOUT, server)
            .await
            .expect("connection ends in time")
            .expect("connection task does not panic");
        drop(client);
        result
    }
}
