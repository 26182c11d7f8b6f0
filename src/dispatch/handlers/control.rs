//! Debugger restarts and session shutdown.

use tracing::{info, warn};

use crate::dispatch::context::{Outcome, RequestContext};
use crate::swank::message::{Response, ReturnValue};
use crate::Result;

/// Final result of a request that resolved a debugger level.
const RESTART_REPLY: &str = "NIL";

/// Outcome for a request that unwound the debugger; `trailing` carries the
/// prompt refresh and the resolved levels' own results.
pub(super) fn unwound(trailing: Vec<Response>) -> Outcome {
    Outcome::from(ReturnValue::Abort(Some(RESTART_REPLY.to_owned()))).then(trailing)
}

/// `invoke-nth-restart-for-emacs LEVEL INDEX`.
pub(super) async fn invoke_nth_restart(ctx: &RequestContext) -> Result<Outcome> {
    let level = ctx.usize_arg(0)?;
    let index = ctx.usize_arg(1)?;
    let trailing = ctx.session.invoke_restart(level, index, &ctx.outbox).await?;
    Ok(unwound(trailing))
}

/// `throw-to-toplevel`: restart 0 at the innermost level.
pub(super) async fn throw_to_toplevel(ctx: &RequestContext) -> Result<Outcome> {
    match ctx.session.throw_to_toplevel(&ctx.outbox).await? {
        Some(trailing) => Ok(unwound(trailing)),
        None => {
            info!("throw-to-toplevel outside the debugger");
            Ok(Outcome::nil())
        }
    }
}

/// `quit-lisp`: stop the interpreter and close the connection.
pub(super) async fn quit_lisp(ctx: &RequestContext) -> Result<Outcome> {
    info!("editor requested shutdown");
    if let Err(err) = ctx.session.interpreter().stop().await {
        warn!(%err, "interpreter did not stop cleanly");
    }
    ctx.session.close();
    Ok(Outcome::nil())
}
