//! Connection writer task and the outbound response sink.
//!
//! Handlers never touch the socket. They push [`Response`]s into an
//! [`Outbox`]; a single writer task drains the channel, encodes each
//! response as one frame, and writes it whole. Responses therefore reach
//! the editor in exactly the order they were pushed.
//!
//! A response that does not fit in one frame never stops the writer.
//! Oversized `:write-string` text is split across several events, an
//! oversized final result is replaced by `(:abort "response too large")`
//! for the same id, and any other oversized event is dropped.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::swank::codec::{encode_frame, MAX_PAYLOAD_BYTES};
use crate::swank::message::{Event, RequestId, Response, ReturnValue};
use crate::{AppError, Result};

/// Largest slice of `:write-string` text sent in one event. Escaping at
/// most doubles the text, so the framed payload stays under the limit.
const WRITE_CHUNK_BYTES: usize = (MAX_PAYLOAD_BYTES - 64) / 2;

/// Cloneable handle for queueing responses to the editor.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Response>,
}

impl Outbox {
    /// Create an outbox and the receiver the writer task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an intermediate event.
    pub fn event(&self, event: Event) {
        self.send(Response::Event(event));
    }

    /// Queue the final result of request `id`.
    pub fn finish(&self, id: RequestId, value: ReturnValue) {
        self.send(Response::Return { value, id });
    }

    /// Queue any response.
    pub fn send(&self, response: Response) {
        if self.tx.send(response).is_err() {
            debug!("outbox: writer gone, dropping response");
        }
    }
}

/// Writer task: encodes queued responses and writes them to `sink`.
///
/// Exits cleanly when `cancel` fires or every [`Outbox`] has been dropped
/// and the queue is empty.
///
/// # Errors
///
/// Returns [`AppError::Io`] if the write fails (e.g. the editor disconnected).
pub async fn run_writer<W>(
    sink: W,
    mut rx: mpsc::UnboundedReceiver<Response>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut sink = sink;

    loop {
        tokio::select! {
            biased;

            response = rx.recv() => {
                let Some(response) = response else {
                    debug!("writer: outbox closed, stopping");
                    break;
                };
                for frame in encode_response(response) {
                    sink.write_all(&frame).await.map_err(|e| {
                        warn!(error = %e, "writer: write failed");
                        AppError::Io(format!("write failed: {e}"))
                    })?;
                }
                sink.flush().await?;
            }

            () = cancel.cancelled() => {
                debug!("writer: cancellation received, stopping");
                break;
            }
        }
    }

    Ok(())
}

/// Encode `response` as one or more frames that each fit the length header.
fn encode_response(response: Response) -> Vec<Vec<u8>> {
    match response {
        Response::Event(Event::WriteString { text, repl_result }) if text.len() > WRITE_CHUNK_BYTES => {
            let pieces = split_text(&text, WRITE_CHUNK_BYTES);
            debug!(bytes = text.len(), pieces = pieces.len(), "writer: splitting oversized output");
            pieces
                .into_iter()
                .filter_map(|piece| {
                    encode(&Response::Event(Event::WriteString {
                        text: piece.to_owned(),
                        repl_result,
                    }))
                })
                .collect()
        }
        Response::Return { value, id } => {
            let frame = encode(&Response::Return { value, id }).or_else(|| {
                warn!(id, "writer: final result too large, answering with an abort");
                encode(&Response::Return {
                    value: ReturnValue::Abort(Some("response too large".to_owned())),
                    id,
                })
            });
            frame.into_iter().collect()
        }
        event => encode(&event).into_iter().collect(),
    }
}

fn encode(response: &Response) -> Option<Vec<u8>> {
    let payload = response.to_sexp().to_string();
    trace!(%payload, "writer: sending");
    match encode_frame(&payload) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(%err, "writer: dropping response");
            None
        }
    }
}

/// Split `text` into pieces of at most `max` bytes on character boundaries.
fn split_text(text: &str, max: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}
