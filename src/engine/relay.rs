//! Forwarding of incidental interpreter output to the editor.
//!
//! While an evaluation runs, the relay races it against the adapter's
//! output channel and turns every chunk into a `:write-string` event as it
//! arrives. Once the evaluation completes, whatever is still queued is
//! flushed before control returns, so all output produced by an evaluation
//! precedes the events its handler emits afterwards.

use std::future::Future;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::interpreter::{OutputChunk, OutputReceiver};
use crate::swank::message::Event;
use crate::swank::writer::Outbox;

/// Owner of the adapter's output receiver.
#[derive(Debug)]
pub struct OutputRelay {
    rx: Mutex<OutputReceiver>,
}

impl OutputRelay {
    /// Wrap the receiver the adapter's output sender feeds.
    #[must_use]
    pub fn new(rx: OutputReceiver) -> Self {
        Self { rx: Mutex::new(rx) }
    }

    /// Run `work` to completion, forwarding output to `outbox` meanwhile.
    ///
    /// Output queued before `work` starts is forwarded first.
    pub async fn drive<F, T>(&self, work: F, outbox: &Outbox) -> T
    where
        F: Future<Output = T>,
    {
        let mut rx = self.rx.lock().await;
        flush_pending(&mut rx, outbox);

        tokio::pin!(work);
        let output = loop {
            tokio::select! {
                biased;

                output = &mut work => break output,

                Some(chunk) = rx.recv() => forward(chunk, outbox),
            }
        };

        let flushed = flush_pending(&mut rx, outbox);
        if flushed > 0 {
            trace!(flushed, "relay: flushed trailing output");
        }
        output
    }

    /// Forward everything currently queued.
    pub async fn flush(&self, outbox: &Outbox) -> usize {
        let mut rx = self.rx.lock().await;
        flush_pending(&mut rx, outbox)
    }

    /// Drop everything currently queued.
    pub async fn discard(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "relay: discarded buffered output");
        }
        dropped
    }
}

fn forward(chunk: OutputChunk, outbox: &Outbox) {
    outbox.event(Event::WriteString {
        text: chunk.text,
        repl_result: chunk.repl_result,
    });
}

fn flush_pending(rx: &mut OutputReceiver, outbox: &Outbox) -> usize {
    let mut count = 0;
    while let Ok(chunk) = rx.try_recv() {
        forward(chunk, outbox);
        count += 1;
    }
    count
}
