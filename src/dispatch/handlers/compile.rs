//! Compilation and file loading.

use std::time::Instant;

use tracing::info;

use crate::dispatch::context::{Outcome, RequestContext};
use crate::dispatch::handlers::eval::{eval_with_markers, Evaluated};
use crate::interpreter::Channel;
use crate::swank::message::{Event, ReturnValue};
use crate::swank::sexp::{self, escape_str, Sexp};
use crate::{AppError, Result};

/// Elapsed time reported for compilations that do no work.
const NOMINAL_SECONDS: f64 = 0.01;

/// `(:compilation-result nil t SECONDS LOADP FILENAME)`.
fn compilation_result(seconds: f64, loadp: Sexp, filename: Sexp) -> Sexp {
    Sexp::List(vec![
        Sexp::keyword("compilation-result"),
        Sexp::Nil,
        Sexp::T,
        Sexp::Float(seconds),
        loadp,
        filename,
    ])
}

/// Short form of a top-level form for the "Loaded" notice: anything with
/// more than two elements is printed as `(head name ...)`.
fn abbreviate(form: &Sexp) -> Sexp {
    match form {
        Sexp::List(items) if items.len() > 2 => Sexp::List(vec![
            items[0].clone(),
            items[1].clone(),
            Sexp::sym("..."),
        ]),
        other => other.clone(),
    }
}

/// `compile-string-for-emacs` and `compile-notes-for-emacs`.
pub(super) async fn compile_string(ctx: &mut RequestContext) -> Result<Outcome> {
    let source = ctx.str_arg(0)?.to_owned();
    let forms = sexp::parse_all(&source)?;
    let command = format!("(lisp:progn {source})");

    ctx.lock_gate().await;
    let started = Instant::now();

    match eval_with_markers(ctx, command).await? {
        Evaluated::Done => {
            for form in &forms {
                ctx.outbox.event(Event::WriteString {
                    text: format!("; Loaded {}\n", abbreviate(form)),
                    repl_result: false,
                });
            }
            let seconds = started.elapsed().as_secs_f64();
            Ok(Outcome::ok(compilation_result(seconds, Sexp::Nil, Sexp::Nil)))
        }
        Evaluated::Aborted(message) => {
            info!(message = ?message, "compilation aborted");
            Ok(match message {
                Some(message) => ReturnValue::Abort(Some(message)).into(),
                None => Outcome::nil(),
            })
        }
    }
}

/// `compile-file-for-emacs` and `compile-file-if-needed`.
///
/// Answers with a successful compilation result without touching the
/// interpreter; loading happens through `load-file`.
pub(super) fn compile_file(ctx: &RequestContext) -> Result<Outcome> {
    let filename = ctx.str_arg(0)?.to_owned();
    let loadp = Sexp::boolean(ctx.opt_arg(1).is_some());
    Ok(Outcome::ok(compilation_result(
        NOMINAL_SECONDS,
        loadp,
        Sexp::Str(filename),
    )))
}

/// `load-file`.
pub(super) async fn load_file(ctx: &mut RequestContext) -> Result<Outcome> {
    let filename = ctx.str_arg(0)?.to_owned();
    let command = format!("(lisp:load \"{}\")", escape_str(&filename));

    ctx.lock_gate().await;
    let session = &ctx.session;
    let outbox = &ctx.outbox;

    outbox.event(Event::WriteString {
        text: format!("Loading file: {filename} ...\n"),
        repl_result: false,
    });
    let result = session
        .relay()
        .drive(session.interpreter().exec_internal(command, Channel::Repl), outbox)
        .await;

    match result {
        Ok(value) => {
            outbox.event(Event::WriteString {
                text: "Loaded.\n".to_owned(),
                repl_result: false,
            });
            Ok(Outcome::ok(value))
        }
        Err(AppError::Abort(message)) => {
            info!(file = %filename, message = ?message, "load aborted");
            if let Some(message) = message {
                outbox.event(Event::WriteString {
                    text: format!("; Evaluation aborted on {message}\n"),
                    repl_result: true,
                });
            }
            Ok(Outcome::nil())
        }
        Err(err) => Err(err),
    }
}
