//! Command handlers.
//!
//! Each handler queues its events on the context's outbox and returns the
//! request's [`Outcome`]. Interpreter errors are returned as `Err` and
//! turned into debugger levels by the dispatcher.

mod compile;
mod control;
mod eval;
mod query;

use crate::dispatch::command::Command;
use crate::dispatch::context::{Outcome, RequestContext};
use crate::swank::sexp::Sexp;
use crate::Result;

/// Run the handler registered for `command`.
pub(crate) async fn handle(command: Command, ctx: &mut RequestContext) -> Result<Outcome> {
    match command {
        Command::ListenerEval => eval::listener_eval(ctx).await,
        Command::InteractiveEval
        | Command::InteractiveEvalRegion
        | Command::PprintEval => eval::evaluate(ctx).await,
        Command::CompileString | Command::CompileNotes => compile::compile_string(ctx).await,
        Command::CompileFile | Command::CompileFileIfNeeded => compile::compile_file(ctx),
        Command::LoadFile => compile::load_file(ctx).await,

        Command::ConnectionInfo => query::connection_info(ctx).await,
        Command::CreateRepl => query::create_repl(ctx).await,
        Command::Autodoc => Ok(query::autodoc(ctx).await),
        Command::OperatorArglist => query::operator_arglist(ctx).await,
        Command::Completions => query::completions(ctx).await,
        Command::SimpleCompletions => query::simple_completions(ctx).await,
        Command::FuzzyCompletions => Ok(Outcome::ok(Sexp::List(vec![Sexp::Nil, Sexp::Nil]))),
        Command::KeywordCompletions => query::keyword_completions(ctx).await,
        Command::CharacterCompletions => query::character_completions(ctx).await,
        Command::DescribeSymbol | Command::DescribeFunction | Command::DescribeDefinition => {
            query::describe(ctx).await
        }
        Command::Expand1 => query::expand_1(ctx).await,
        Command::ListAllPackageNames => query::list_all_package_names(ctx).await,
        Command::AproposList => query::apropos_list(ctx).await,
        Command::SetPackage => query::set_package(ctx).await,
        Command::DefaultDirectory => query::default_directory(ctx).await,
        Command::SetDefaultDirectory => query::set_default_directory(ctx).await,
        Command::ClearReplVariables => query::clear_repl_variables(ctx).await,
        Command::Backtrace => query::backtrace(ctx).await,

        Command::BufferFirstChange
        | Command::SwankRequire
        | Command::InitPresentations
        | Command::CompleteForm
        | Command::InspectCurrentCondition
        | Command::SldbAbort
        | Command::SldbOut
        | Command::FrameLocalsAndCatchTags
        | Command::FindDefinitions
        | Command::ClearReplResults => Ok(Outcome::nil()),

        Command::InvokeNthRestart => control::invoke_nth_restart(ctx).await,
        Command::ThrowToToplevel => control::throw_to_toplevel(ctx).await,
        Command::QuitLisp => control::quit_lisp(ctx).await,
    }
}
