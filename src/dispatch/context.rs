//! Per-request handler context and handler results.

use std::sync::Arc;

use crate::engine::gate::{GateGuard, Ticket};
use crate::engine::session::Session;
use crate::swank::message::{Request, Response, ReturnValue};
use crate::swank::sexp::Sexp;
use crate::swank::writer::Outbox;
use crate::{AppError, Result};

/// What a handler produced once its events have been queued.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Final result of the request being handled.
    pub value: ReturnValue,
    /// Responses for other requests that must follow the final result.
    pub trailing: Vec<Response>,
}

impl Outcome {
    /// `(:ok VALUE)`.
    #[must_use]
    pub fn ok(value: impl Into<Sexp>) -> Self {
        ReturnValue::Ok(value.into()).into()
    }

    /// `(:ok nil)`.
    #[must_use]
    pub fn nil() -> Self {
        Self::ok(Sexp::Nil)
    }

    /// Attach responses to queue after the final result.
    #[must_use]
    pub fn then(mut self, trailing: Vec<Response>) -> Self {
        self.trailing.extend(trailing);
        self
    }
}

impl From<ReturnValue> for Outcome {
    fn from(value: ReturnValue) -> Self {
        Self {
            value,
            trailing: Vec::new(),
        }
    }
}

/// Everything a handler needs to serve one `:emacs-rex`.
pub struct RequestContext {
    /// Connection session.
    pub session: Arc<Session>,
    /// Sink for events.
    pub outbox: Outbox,
    /// The request being served.
    pub request: Request,
    ticket: Option<Ticket>,
    gate: Option<GateGuard>,
}

impl RequestContext {
    /// Bundle a request with its session, sink, and gate ticket (if any).
    #[must_use]
    pub fn new(session: Arc<Session>, outbox: Outbox, request: Request, ticket: Option<Ticket>) -> Self {
        Self {
            session,
            outbox,
            request,
            ticket,
            gate: None,
        }
    }

    /// Wait for the execution gate, honouring the ticket taken at dispatch.
    /// The gate stays held until [`RequestContext::release_gate`].
    pub async fn lock_gate(&mut self) {
        if self.gate.is_some() {
            return;
        }
        let guard = match self.ticket.take() {
            Some(ticket) => ticket.acquire().await,
            None => self.session.gate().acquire().await,
        };
        self.gate = Some(guard);
    }

    /// Release the gate, or give up the queued ticket if it was never used.
    pub fn release_gate(&mut self) {
        self.ticket = None;
        self.gate = None;
    }

    /// Positional argument `index`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MalformedMessage`] when the argument is missing.
    pub fn arg(&self, index: usize) -> Result<&Sexp> {
        self.request.args.get(index).ok_or_else(|| {
            AppError::MalformedMessage(format!("{}: missing argument {index}", self.request.tag))
        })
    }

    /// Positional argument `index`, `None` when absent or `nil`.
    #[must_use]
    pub fn opt_arg(&self, index: usize) -> Option<&Sexp> {
        self.request.args.get(index).filter(|value| value.is_truthy())
    }

    /// String argument `index`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MalformedMessage`] when missing or not a string.
    pub fn str_arg(&self, index: usize) -> Result<&str> {
        let value = self.arg(index)?;
        value.as_str().ok_or_else(|| {
            AppError::MalformedMessage(format!(
                "{}: argument {index} must be a string, got {value}",
                self.request.tag
            ))
        })
    }

    /// Non-negative integer argument `index`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MalformedMessage`] when missing, not an integer,
    /// or negative.
    pub fn usize_arg(&self, index: usize) -> Result<usize> {
        let value = self.arg(index)?;
        value
            .as_int()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                AppError::MalformedMessage(format!(
                    "{}: argument {index} must be a non-negative integer, got {value}",
                    self.request.tag
                ))
            })
    }
}
