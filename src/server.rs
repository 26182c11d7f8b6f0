//! TCP front end for editor connections.
//!
//! The listener serves one editor at a time. Each accepted connection gets
//! a freshly built interpreter and [`Session`]; the connection then runs
//! three kinds of task:
//!
//! - the reader (this module's loop), decoding frames and dispatching them
//!   in arrival order;
//! - one task per request, spawned by the dispatcher;
//! - a single writer draining the [`Outbox`](crate::swank::writer::Outbox).

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::engine::session::{Session, SessionSettings};
use crate::interpreter::{output_channel, Interpreter, OutputSender};
use crate::swank::codec::FrameCodec;
use crate::swank::writer::{run_writer, Outbox};
use crate::{AppError, Result};

/// Builds the interpreter for a new connection around its output sender.
pub type InterpreterFactory = Arc<dyn Fn(OutputSender) -> Arc<dyn Interpreter> + Send + Sync>;

/// Everything the accept loop needs besides the listener.
#[derive(Clone)]
pub struct ServerContext {
    /// Session tunables applied to each connection.
    pub settings: SessionSettings,
    /// Interpreter constructor.
    pub factory: InterpreterFactory,
    /// How long in-flight requests may run after the connection ends.
    pub shutdown_grace: Duration,
    /// Keep accepting after the first editor disconnects.
    pub dont_close: bool,
}

/// Bind the listener and publish its port.
///
/// # Errors
///
/// Returns [`AppError::Io`] if the address cannot be bound or the port
/// file cannot be written.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|err| AppError::Io(format!("failed to bind {addr}: {err}")))?;
    let local = listener.local_addr()?;
    info!(%local, "listening for editor connections");

    if let Some(ref path) = config.port_file {
        write_port_file(path, local.port()).await?;
    }
    Ok(listener)
}

/// Write `port` to `path` so the editor can find the server.
///
/// # Errors
///
/// Returns [`AppError::Io`] if the file cannot be written.
pub async fn write_port_file(path: &Path, port: u16) -> Result<()> {
    tokio::fs::write(path, port.to_string())
        .await
        .map_err(|err| AppError::Io(format!("failed to write port file {}: {err}", path.display())))?;
    info!(path = %path.display(), port, "port file written");
    Ok(())
}

/// Spawn the accept loop.
///
/// The task ends when `ct` is cancelled, when the editor sends
/// `quit-lisp`, or after the first connection unless `dont_close` is set.
pub fn spawn_server(listener: TcpListener, ctx: ServerContext, ct: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("server shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let quit = run_connection(stream, peer, &ctx, &ct).await;
                                if quit || !ctx.dont_close {
                                    info!(quit, "server finished serving");
                                    break;
                                }
                            }
                            Err(err) => warn!(%err, "accept failed"),
                        }
                    }
                }
            }
        }
        .instrument(info_span!("server")),
    )
}

/// Serve one editor with a fresh interpreter. Returns whether the editor
/// asked the backend to quit.
async fn run_connection(stream: TcpStream, peer: SocketAddr, ctx: &ServerContext, ct: &CancellationToken) -> bool {
    let span = info_span!("connection", %peer);
    async move {
        info!("editor connected");
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "could not disable nagle");
        }

        let (output_tx, output_rx) = output_channel();
        let interpreter = (ctx.factory)(output_tx);
        if let Err(err) = interpreter.start().await {
            error!(%err, "interpreter failed to start");
        }

        let session = Arc::new(Session::new(
            Arc::clone(&interpreter),
            output_rx,
            ctx.settings.clone(),
        ));
        let closed = session.closed();

        if let Err(err) = serve_connection(stream, session, ct.child_token(), ctx.shutdown_grace).await {
            warn!(%err, "connection ended with error");
        }
        if let Err(err) = interpreter.stop().await {
            warn!(%err, "interpreter did not stop cleanly");
        }
        info!("editor session finished");
        closed.is_cancelled()
    }
    .instrument(span)
    .await
}

/// Drive one connection until EOF, a framing error, `quit-lisp`, or
/// `cancel`. A writer that stops on its own also ends the connection.
///
/// In-flight requests get `grace` to finish before they are aborted; the
/// writer then flushes whatever they queued.
///
/// # Errors
///
/// Returns [`AppError::Framing`] when the inbound stream is corrupt.
pub async fn serve_connection<S>(
    stream: S,
    session: Arc<Session>,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbox, rx) = Outbox::channel();
    let writer_cancel = CancellationToken::new();
    let mut writer = tokio::spawn(
        run_writer(write_half, rx, writer_cancel.clone()).instrument(info_span!("writer")),
    );

    let dispatcher = Dispatcher::new(Arc::clone(&session));
    let mut frames = FramedRead::new(read_half, FrameCodec::new());
    let closed = session.closed();
    let mut tasks = JoinSet::new();
    let mut writer_exit = None;

    let outcome = loop {
        tokio::select! {
            joined = &mut writer => {
                warn!("writer stopped, closing connection");
                writer_exit = Some(joined);
                break Ok(());
            }
            () = cancel.cancelled() => {
                info!("connection cancelled");
                break Ok(());
            }
            () = closed.cancelled() => {
                info!("session closed by editor");
                break Ok(());
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(err) = joined {
                    error!(%err, "request task failed");
                }
            }
            frame = frames.next() => match frame {
                Some(Ok(payload)) => {
                    trace!(%payload, "received frame");
                    dispatcher.dispatch(&payload, &outbox, &mut tasks);
                }
                Some(Err(err)) => {
                    warn!(%err, "closing connection");
                    break Err(err);
                }
                None => {
                    info!("editor disconnected");
                    break Ok(());
                }
            },
        }
    };

    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(pending = tasks.len(), "aborting unfinished requests");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }

    drop(dispatcher);
    drop(outbox);
    let joined = match writer_exit {
        Some(joined) => joined,
        None => match tokio::time::timeout(grace, &mut writer).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("writer did not drain in time");
                writer_cancel.cancel();
                writer.await
            }
        },
    };
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(%err, "writer stopped early"),
        Err(err) => error!(%err, "writer task failed"),
    }

    outcome
}
