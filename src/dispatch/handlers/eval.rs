//! Evaluation of user code on the REPL.

use tracing::info;

use crate::dispatch::context::{Outcome, RequestContext};
use crate::dispatch::handlers::control;
use crate::swank::message::{Event, ReturnValue};
use crate::{AppError, Result};

/// How a gated evaluation ended, once its read markers are out.
pub(super) enum Evaluated {
    /// Ran to completion.
    Done,
    /// Cancelled, with the interpreter's message if it gave one.
    Aborted(Option<String>),
}

/// Evaluate `command` between `:read-string` and `:read-aborted`.
///
/// The caller must hold the gate. Output is relayed while the evaluation
/// runs; chunks returned by the evaluation follow `:read-aborted`.
/// Errors other than aborts are returned after `:read-aborted` is queued.
pub(super) async fn eval_with_markers(ctx: &RequestContext, command: String) -> Result<Evaluated> {
    let session = &ctx.session;
    let outbox = &ctx.outbox;

    outbox.event(Event::ReadString);
    let result = session
        .relay()
        .drive(session.interpreter().eval(command), outbox)
        .await;
    outbox.event(Event::ReadAborted);

    match result {
        Ok(chunks) => {
            for chunk in chunks {
                outbox.event(Event::WriteString {
                    text: chunk.text,
                    repl_result: chunk.repl_result,
                });
            }
            Ok(Evaluated::Done)
        }
        Err(AppError::Abort(message)) => Ok(Evaluated::Aborted(message)),
        Err(err) => Err(err),
    }
}

/// `interactive-eval`, `interactive-eval-region`, `pprint-eval`.
pub(super) async fn evaluate(ctx: &mut RequestContext) -> Result<Outcome> {
    let code = ctx.str_arg(0)?.to_owned();
    ctx.lock_gate().await;

    match eval_with_markers(ctx, code).await? {
        Evaluated::Done => {
            ctx.session.refresh_prompt(&ctx.outbox).await?;
            Ok(Outcome::nil())
        }
        Evaluated::Aborted(message) => {
            info!(message = ?message, "evaluation aborted");
            ctx.session.refresh_prompt(&ctx.outbox).await?;
            Ok(match message {
                Some(message) => ReturnValue::Abort(Some(message)).into(),
                None => Outcome::nil(),
            })
        }
    }
}

/// `swank-repl:listener-eval`. Leaves the debugger instead of evaluating
/// when a debugger level is active.
pub(super) async fn listener_eval(ctx: &mut RequestContext) -> Result<Outcome> {
    if ctx.session.debugger_depth().await > 0 {
        ctx.release_gate();
        if let Some(trailing) = ctx.session.throw_to_toplevel(&ctx.outbox).await? {
            return Ok(control::unwound(trailing));
        }
    }
    evaluate(ctx).await
}
