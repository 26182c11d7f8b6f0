//! Request dispatch.
//!
//! The connection reader hands every decoded payload to
//! [`Dispatcher::dispatch`], which runs on the reader task and therefore
//! sees messages in arrival order:
//!
//! | Message                 | Served                                          |
//! |-------------------------|-------------------------------------------------|
//! | `:emacs-rex`            | own task; gate ticket taken before spawning     |
//! | `:emacs-interrupt`      | inline; prompt refresh spawned for the REPL     |
//! | `:emacs-return-string`  | own task                                        |
//! | unparseable             | error result when an id can be recovered        |
//!
//! The dispatcher is the only place that queues a request's own final
//! result. Interpreter errors instead open a debugger level, which takes
//! over responsibility for that result until it is resolved.

pub mod command;
pub mod context;
mod handlers;

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::dispatch::command::Command;
use crate::dispatch::context::{Outcome, RequestContext};
use crate::engine::debugger::DebuggerFrame;
use crate::engine::session::Session;
use crate::swank::message::{salvage_request_id, Event, Message, Request, RequestId, ReturnValue, REPL_THREAD};
use crate::swank::sexp::Sexp;
use crate::swank::writer::Outbox;
use crate::{AppError, Result};

/// Routes decoded payloads to handlers for one connection.
#[derive(Clone)]
pub struct Dispatcher {
    session: Arc<Session>,
}

impl Dispatcher {
    /// Dispatcher for `session`.
    #[must_use]
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// The session requests run against.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Decode `payload` and start serving it. Work that outlives this call
    /// is spawned onto `tasks`.
    pub fn dispatch(&self, payload: &str, outbox: &Outbox, tasks: &mut JoinSet<()>) {
        match Message::parse(payload) {
            Ok(Message::Rex(request)) => self.spawn_request(request, outbox, tasks),
            Ok(Message::Interrupt { thread }) => self.interrupt(&thread, outbox, tasks),
            Ok(Message::ReturnString { text, .. }) => self.return_string(text, outbox, tasks),
            Err(err) => {
                warn!(%err, "dispatch: rejecting message");
                if let Some(id) = salvage_request_id(payload) {
                    outbox.finish(id, ReturnValue::Error(err.to_string()));
                }
            }
        }
    }

    fn spawn_request(&self, request: Request, outbox: &Outbox, tasks: &mut JoinSet<()>) {
        let command = match Command::from_tag(&request.tag) {
            Ok(command) => command,
            Err(err) => {
                warn!(id = request.id, %err, "dispatch: no handler");
                outbox.finish(request.id, ReturnValue::Error(err.to_string()));
                return;
            }
        };

        let ticket = command.needs_gate().then(|| self.session.gate().ticket());
        let span = info_span!("request", id = request.id, command = command.tag());
        let ctx = RequestContext::new(Arc::clone(&self.session), outbox.clone(), request, ticket);
        tasks.spawn(run_request(command, ctx).instrument(span));
    }

    fn interrupt(&self, thread: &Sexp, outbox: &Outbox, tasks: &mut JoinSet<()>) {
        if let Err(err) = self.session.interrupt() {
            warn!(%err, "dispatch: interrupt not delivered");
        }
        if !thread.is_symbol(REPL_THREAD) {
            return;
        }

        let session = Arc::clone(&self.session);
        let outbox = outbox.clone();
        tasks.spawn(
            async move {
                let limit = session.settings().prompt_timeout;
                let Some(_gate) = session.gate().acquire_timeout(limit).await else {
                    debug!(?limit, "interrupt: gate still busy, skipping prompt refresh");
                    return;
                };
                if let Err(err) = session.refresh_prompt(&outbox).await {
                    debug!(%err, "interrupt: prompt refresh failed");
                }
            }
            .instrument(info_span!("interrupt_prompt")),
        );
    }

    fn return_string(&self, text: String, outbox: &Outbox, tasks: &mut JoinSet<()>) {
        let session = Arc::clone(&self.session);
        let outbox = outbox.clone();
        tasks.spawn(
            async move {
                match session.interpreter().send_input(text).await {
                    Ok(()) => outbox.event(Event::ReadString),
                    Err(err) => warn!(%err, "return-string: input not delivered"),
                }
            }
            .instrument(info_span!("return_string")),
        );
    }
}

async fn run_request(command: Command, mut ctx: RequestContext) {
    let id = ctx.request.id;
    debug!("handling request");
    let result = handlers::handle(command, &mut ctx).await;
    complete(&ctx.session, &ctx.outbox, id, result).await;
    ctx.release_gate();
}

/// Queue the final result for request `id`, or hand it to the debugger.
async fn complete(session: &Session, outbox: &Outbox, id: RequestId, result: Result<Outcome>) {
    match result {
        Ok(outcome) => {
            outbox.finish(id, outcome.value);
            for response in outcome.trailing {
                outbox.send(response);
            }
        }
        Err(AppError::Abort(message)) => outbox.finish(id, ReturnValue::Abort(message)),
        Err(AppError::Interpreter(err)) => {
            session.enter_debugger(DebuggerFrame::from_error(id, err), outbox).await;
        }
        Err(AppError::Process(message)) => {
            error!(id, %message, "interpreter process failure");
            let frame = DebuggerFrame::process_failure(id, format!("process: {message}"));
            session.enter_debugger(frame, outbox).await;
        }
        Err(err) => {
            warn!(id, %err, "request failed");
            outbox.finish(id, ReturnValue::Error(err.to_string()));
        }
    }
}
