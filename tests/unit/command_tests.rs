//! Unit tests for the command registry.

use euslime::dispatch::command::Command;
use euslime::AppError;

#[test]
fn resolves_canonical_tags() {
    assert_eq!(
        Command::from_tag("swank-repl:listener-eval").unwrap(),
        Command::ListenerEval
    );
    assert_eq!(
        Command::from_tag("swank:invoke-nth-restart-for-emacs").unwrap(),
        Command::InvokeNthRestart
    );
    assert_eq!(
        Command::from_tag("swank:fuzzy-completions").unwrap(),
        Command::FuzzyCompletions
    );
}

#[test]
fn resolution_ignores_case() {
    assert_eq!(
        Command::from_tag("SWANK:CONNECTION-INFO").unwrap(),
        Command::ConnectionInfo
    );
}

/// Older and alternate package prefixes map onto the same handler.
#[test]
fn aliases_resolve_to_the_same_command() {
    assert_eq!(Command::from_tag("swank:listener-eval").unwrap(), Command::ListenerEval);
    assert_eq!(Command::from_tag("swank:create-repl").unwrap(), Command::CreateRepl);
    assert_eq!(Command::from_tag("swank-repl:set-package").unwrap(), Command::SetPackage);
    assert_eq!(
        Command::from_tag("swank:swank-macroexpand-1").unwrap(),
        Command::Expand1
    );
}

#[test]
fn canonical_tag_is_first_registration() {
    assert_eq!(Command::ListenerEval.tag(), "swank-repl:listener-eval");
    assert_eq!(Command::CreateRepl.tag(), "swank-repl:create-repl");
    assert_eq!(Command::QuitLisp.tag(), "swank:quit-lisp");
}

#[test]
fn unknown_tag_is_unknown_command() {
    let err = Command::from_tag("swank:frobnicate").expect_err("unknown");
    assert_eq!(err, AppError::UnknownCommand("swank:frobnicate".into()));
    assert_eq!(err.to_string(), "unknown command: swank:frobnicate");
}

#[test]
fn every_registered_tag_resolves_back() {
    let mut count = 0;
    for tag in Command::tags() {
        let command = Command::from_tag(tag).unwrap_or_else(|e| panic!("{tag}: {e}"));
        assert!(!command.tag().is_empty(), "{tag} has no canonical tag");
        count += 1;
    }
    assert!(count >= 40, "expected the full registry, got {count} tags");
}

/// Only commands that run user code queue on the execution gate.
#[test]
fn gated_commands() {
    for command in [
        Command::InteractiveEval,
        Command::InteractiveEvalRegion,
        Command::ListenerEval,
        Command::PprintEval,
        Command::CompileString,
        Command::CompileNotes,
        Command::LoadFile,
    ] {
        assert!(command.needs_gate(), "{command:?} must be gated");
    }
    for command in [
        Command::ConnectionInfo,
        Command::Autodoc,
        Command::Backtrace,
        Command::InvokeNthRestart,
        Command::ThrowToToplevel,
        Command::CompileFile,
        Command::QuitLisp,
    ] {
        assert!(!command.needs_gate(), "{command:?} must not be gated");
    }
}
