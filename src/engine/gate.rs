//! Execution gate serialising evaluations against the interpreter.
//!
//! Callers queue by taking a [`Ticket`]; tickets are admitted strictly in
//! the order they were issued, one at a time. Admission yields a
//! [`GateGuard`] whose drop releases the gate, so release happens exactly
//! once per acquire on every exit path, including early returns, errors,
//! panics and task cancellation. A ticket dropped before admission simply
//! leaves the queue.
//!
//! Tickets are taken synchronously, which lets the connection reader fix
//! the admission order at dispatch time even though each request then runs
//! on its own task.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

/// Snapshot of gate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateStats {
    /// Total successful acquisitions.
    pub acquired: u64,
    /// Total releases.
    pub released: u64,
    /// Whether a guard is currently outstanding.
    pub held: bool,
    /// Tickets waiting for admission.
    pub waiting: usize,
}

#[derive(Debug, Default)]
struct GateState {
    next_ticket: u64,
    queue: VecDeque<u64>,
    holder: Option<u64>,
    acquired: u64,
    released: u64,
}

#[derive(Debug, Default)]
struct GateInner {
    state: Mutex<GateState>,
    turn: Notify,
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_admit(&self, id: u64) -> bool {
        let mut state = self.lock();
        if state.holder.is_none() && state.queue.front() == Some(&id) {
            state.queue.pop_front();
            state.holder = Some(id);
            state.acquired += 1;
            true
        } else {
            false
        }
    }
}

/// FIFO mutual-exclusion gate for interpreter evaluations.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGate {
    inner: Arc<GateInner>,
}

impl ExecutionGate {
    /// Create an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the queue now; admission happens in [`Ticket::acquire`].
    #[must_use]
    pub fn ticket(&self) -> Ticket {
        let mut state = self.inner.lock();
        let id = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(id);
        trace!(ticket = id, waiting = state.queue.len(), "gate: ticket issued");
        Ticket {
            gate: Arc::clone(&self.inner),
            id,
            admitted: false,
        }
    }

    /// Queue and wait for admission.
    pub async fn acquire(&self) -> GateGuard {
        self.ticket().acquire().await
    }

    /// Queue and wait for admission for at most `limit`.
    ///
    /// Returns `None` on timeout; the abandoned ticket leaves the queue.
    pub async fn acquire_timeout(&self, limit: Duration) -> Option<GateGuard> {
        tokio::time::timeout(limit, self.acquire()).await.ok()
    }

    /// Whether an evaluation currently holds the gate.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.inner.lock().holder.is_some()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> GateStats {
        let state = self.inner.lock();
        GateStats {
            acquired: state.acquired,
            released: state.released,
            held: state.holder.is_some(),
            waiting: state.queue.len(),
        }
    }
}

/// A place in the gate's queue.
#[derive(Debug)]
pub struct Ticket {
    gate: Arc<GateInner>,
    id: u64,
    admitted: bool,
}

impl Ticket {
    /// Wait until this ticket is at the front of the queue and the gate is free.
    pub async fn acquire(mut self) -> GateGuard {
        loop {
            let notified = self.gate.turn.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.gate.try_admit(self.id) {
                self.admitted = true;
                trace!(ticket = self.id, "gate: acquired");
                return GateGuard {
                    gate: Arc::clone(&self.gate),
                    id: self.id,
                };
            }
            notified.await;
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.admitted {
            return;
        }
        let id = self.id;
        self.gate.lock().queue.retain(|queued| *queued != id);
        trace!(ticket = id, "gate: ticket abandoned");
        self.gate.turn.notify_waiters();
    }
}

/// Proof of holding the gate; dropping it releases the gate.
#[derive(Debug)]
pub struct GateGuard {
    gate: Arc<GateInner>,
    id: u64,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        {
            let mut state = self.gate.lock();
            if state.holder == Some(self.id) {
                state.holder = None;
                state.released += 1;
            }
        }
        trace!(ticket = self.id, "gate: released");
        self.gate.turn.notify_waiters();
    }
}
