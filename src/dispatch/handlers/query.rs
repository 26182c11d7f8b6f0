//! Read-only queries answered with one interpreter command at most.

use tracing::debug;

use crate::dispatch::context::{Outcome, RequestContext};
use crate::engine::session::PackageState;
use crate::interpreter::Channel;
use crate::swank::message::frames_sexp;
use crate::swank::sexp::{current_scope, escape_str, Sexp};
use crate::Result;

const ENCODINGS: [&str; 2] = ["utf-8-unix", "iso-latin-1-unix"];

async fn internal(ctx: &RequestContext, command: String) -> Result<Sexp> {
    ctx.session
        .interpreter()
        .exec_internal(command, Channel::Internal)
        .await
}

async fn on_repl(ctx: &RequestContext, command: String) -> Result<Sexp> {
    ctx.session
        .interpreter()
        .exec_internal(command, Channel::Repl)
        .await
}

fn plist(entries: Vec<(&str, Sexp)>) -> Sexp {
    Sexp::List(
        entries
            .into_iter()
            .flat_map(|(key, value)| [Sexp::keyword(key), value])
            .collect(),
    )
}

/// `connection-info`.
pub(super) async fn connection_info(ctx: &RequestContext) -> Result<Outcome> {
    let version = internal(ctx, "(slime::implementation-version)".to_owned()).await?;
    let name = internal(ctx, "(lisp:pathname-name lisp:*program-name*)".to_owned()).await?;
    let machine = Sexp::string(std::env::consts::ARCH.to_ascii_uppercase());
    let settings = ctx.session.settings();

    Ok(Outcome::ok(plist(vec![
        ("pid", Sexp::Int(i64::from(std::process::id()))),
        ("style", Sexp::Nil),
        (
            "encoding",
            plist(vec![(
                "coding-systems",
                Sexp::List(ENCODINGS.iter().map(|e| Sexp::string(*e)).collect()),
            )]),
        ),
        (
            "lisp-implementation",
            plist(vec![
                ("type", name.clone()),
                ("name", name.clone()),
                ("version", version),
                ("program", Sexp::Nil),
            ]),
        ),
        (
            "machine",
            plist(vec![("type", machine.clone()), ("version", machine)]),
        ),
        (
            "package",
            plist(vec![
                ("name", Sexp::string(settings.default_package.clone())),
                ("prompt", name),
            ]),
        ),
        ("version", Sexp::string(settings.swank_version.clone())),
    ])))
}

/// `create-repl`: reports the prompt and drops output buffered so far.
pub(super) async fn create_repl(ctx: &RequestContext) -> Result<Outcome> {
    let state = ctx.session.fetch_prompt().await?;
    ctx.session.relay().discard().await;
    Ok(Outcome::ok(state.map_or(Sexp::Nil, |state| {
        Sexp::List(vec![Sexp::Str(state.name), Sexp::Str(state.prompt)])
    })))
}

// ── Argument lists ────────────────────────────────────────────────────────────

/// Ask the interpreter for `func`'s argument list.
///
/// Yields `("text" nil)` for plain text, `("printed" t)` for a structured
/// answer, and `None` when nothing is known or the query failed.
async fn arglist(ctx: &RequestContext, func: &str, cursor: Option<usize>, form: Option<&Sexp>) -> Option<Sexp> {
    let cursor = cursor.map_or_else(|| "lisp:nil".to_owned(), |c: usize| c.to_string());
    let form = form.map_or_else(|| "lisp:nil".to_owned(), Sexp::to_lisp);
    let command = format!(
        "(slime::autodoc \"{}\" {cursor} (lisp:quote {form}))",
        escape_str(func)
    );

    match internal(ctx, command).await {
        Ok(Sexp::Str(text)) => Some(Sexp::List(vec![Sexp::Str(text), Sexp::Nil])),
        Ok(value) if value.is_truthy() => Some(Sexp::List(vec![Sexp::string(value.to_string()), Sexp::T])),
        Ok(_) => None,
        Err(err) => {
            debug!(%err, func, "arglist lookup failed");
            None
        }
    }
}

/// Elements of the scope around the cursor, without the marker itself.
fn scope_without_marker(scope: &[Sexp], cursor: usize) -> Vec<Sexp> {
    scope
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != cursor)
        .map(|(_, item)| item.clone())
        .collect()
}

/// `autodoc`. Never fails; unknown operators yield `(:not-available t)`.
pub(super) async fn autodoc(ctx: &RequestContext) -> Outcome {
    let not_available = || Outcome::ok(Sexp::List(vec![Sexp::keyword("not-available"), Sexp::T]));

    let Ok(form) = ctx.arg(0) else {
        return not_available();
    };
    let Some((scope, cursor)) = current_scope(form.unquote()) else {
        return not_available();
    };
    if cursor == 0 {
        return not_available();
    }
    let Some(func) = scope[0].as_str() else {
        return not_available();
    };
    let scope = Sexp::list(scope_without_marker(scope, cursor));

    match arglist(ctx, func, Some(cursor), Some(&scope)).await {
        Some(doc) => Outcome::ok(doc),
        None => not_available(),
    }
}

/// `operator-arglist`.
pub(super) async fn operator_arglist(ctx: &RequestContext) -> Result<Outcome> {
    let func = ctx.str_arg(0)?;
    let doc = arglist(ctx, func, None, None).await;
    let text = doc
        .as_ref()
        .and_then(Sexp::as_list)
        .and_then(|items| items.first().cloned())
        .unwrap_or(Sexp::Nil);
    Ok(Outcome::ok(text))
}

// ── Completion ────────────────────────────────────────────────────────────────

async fn symbol_completions(ctx: &RequestContext, prefix: &str) -> Result<Outcome> {
    let command = format!("(slime::slime-find-symbol \"{}\")", escape_str(prefix));
    internal(ctx, command).await.map(Outcome::ok)
}

async fn keyword_completions_for(ctx: &RequestContext, prefix: &str, form: Option<&Sexp>) -> Result<Outcome> {
    let scope = form
        .and_then(|form| current_scope(form.unquote()))
        .map(|(scope, cursor)| {
            let mut items = scope_without_marker(scope, cursor);
            if items.last().is_some_and(|last| last.as_str() == Some("")) {
                items.pop();
            }
            Sexp::list(items)
        })
        .unwrap_or(Sexp::Nil);
    let command = format!(
        "(slime::slime-find-keyword \"{}\" (lisp:quote {}))",
        escape_str(prefix),
        scope.to_lisp()
    );
    internal(ctx, command).await.map(Outcome::ok)
}

/// `completions`: keyword completion for `:`-prefixed input, symbols otherwise.
pub(super) async fn completions(ctx: &RequestContext) -> Result<Outcome> {
    let prefix = ctx.str_arg(0)?;
    if prefix.starts_with(':') {
        keyword_completions_for(ctx, prefix, None).await
    } else {
        symbol_completions(ctx, prefix).await
    }
}

/// `simple-completions`.
pub(super) async fn simple_completions(ctx: &RequestContext) -> Result<Outcome> {
    symbol_completions(ctx, ctx.str_arg(0)?).await
}

/// `completions-for-keyword`.
pub(super) async fn keyword_completions(ctx: &RequestContext) -> Result<Outcome> {
    keyword_completions_for(ctx, ctx.str_arg(0)?, ctx.opt_arg(1)).await
}

/// `completions-for-character`.
pub(super) async fn character_completions(ctx: &RequestContext) -> Result<Outcome> {
    let command = format!(
        "(slime::slime-find-character \"{}\")",
        escape_str(ctx.str_arg(0)?)
    );
    internal(ctx, command).await.map(Outcome::ok)
}

// ── Documentation ─────────────────────────────────────────────────────────────

/// `describe-symbol`, `describe-function`, `describe-definition-for-emacs`.
pub(super) async fn describe(ctx: &RequestContext) -> Result<Outcome> {
    let symbol = ctx.str_arg(0)?.trim();
    let command = format!("(slime::slime-describe-symbol \"{}\")", escape_str(symbol));
    internal(ctx, command).await.map(Outcome::ok)
}

/// `swank-expand-1`.
pub(super) async fn expand_1(ctx: &RequestContext) -> Result<Outcome> {
    let form = ctx.str_arg(0)?;
    internal(ctx, format!("(slime::slime-macroexpand (lisp:quote {form}))"))
        .await
        .map(Outcome::ok)
}

/// `list-all-package-names`.
pub(super) async fn list_all_package_names(ctx: &RequestContext) -> Result<Outcome> {
    let nicknames = Sexp::boolean(ctx.opt_arg(0).is_some());
    internal(ctx, format!("(slime::slime-all-packages {})", nicknames.to_lisp()))
        .await
        .map(Outcome::ok)
}

/// `apropos-list-for-emacs`. The package argument arrives quoted.
pub(super) async fn apropos_list(ctx: &RequestContext) -> Result<Outcome> {
    let key = ctx.str_arg(0)?;
    let package = ctx.opt_arg(3).map_or(Sexp::Nil, |p| p.unquote().clone());
    let command = format!(
        "(slime::slime-apropos-list \"{}\" {})",
        escape_str(key),
        package.to_lisp()
    );
    internal(ctx, command).await.map(Outcome::ok)
}

// ── REPL state ────────────────────────────────────────────────────────────────

/// `set-package`.
pub(super) async fn set_package(ctx: &RequestContext) -> Result<Outcome> {
    let name = ctx.str_arg(0)?;
    let value = on_repl(ctx, format!("(slime::set-package \"{}\")", escape_str(name))).await?;
    if let Some(state) = PackageState::from_sexp(&value) {
        ctx.session.set_package(state).await;
    }
    Ok(Outcome::ok(value))
}

/// `default-directory`.
pub(super) async fn default_directory(ctx: &RequestContext) -> Result<Outcome> {
    internal(ctx, "(lisp:pwd)".to_owned()).await.map(Outcome::ok)
}

/// `set-default-directory`.
pub(super) async fn set_default_directory(ctx: &RequestContext) -> Result<Outcome> {
    let dir = ctx.str_arg(0)?;
    let command = format!("(lisp:progn (lisp:cd \"{}\") (lisp:pwd))", escape_str(dir));
    internal(ctx, command).await.map(Outcome::ok)
}

/// `clear-repl-variables`.
pub(super) async fn clear_repl_variables(ctx: &RequestContext) -> Result<Outcome> {
    on_repl(ctx, "(slime::clear-repl-variables)".to_owned())
        .await
        .map(Outcome::ok)
}

/// `backtrace START END`: frames `[START, END)` numbered from `START`.
pub(super) async fn backtrace(ctx: &RequestContext) -> Result<Outcome> {
    let start = ctx.usize_arg(0)?;
    let end = match ctx.opt_arg(1) {
        Some(_) => ctx.usize_arg(1)?,
        None => ctx.session.settings().backtrace_depth,
    };
    let frames = ctx.session.interpreter().call_stack(end).await?;
    let start = start.min(frames.len());
    Ok(Outcome::ok(frames_sexp(&frames[start..], start)))
}
