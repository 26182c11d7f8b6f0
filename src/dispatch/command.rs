//! Static registry of supported request tags.
//!
//! Every `:emacs-rex` form names its handler by full tag, e.g.
//! `swank-repl:listener-eval`. [`Command::from_tag`] is the single place
//! tags are resolved; anything not listed here is an unknown command.

use crate::{AppError, Result};

/// A recognised request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // ── Evaluation ────────────────────────────────────────────────────
    /// `swank:interactive-eval`.
    InteractiveEval,
    /// `swank:interactive-eval-region`.
    InteractiveEvalRegion,
    /// `swank-repl:listener-eval`.
    ListenerEval,
    /// `swank:pprint-eval`.
    PprintEval,
    /// `swank:compile-string-for-emacs`.
    CompileString,
    /// `swank:compile-notes-for-emacs`.
    CompileNotes,
    /// `swank:compile-file-for-emacs`.
    CompileFile,
    /// `swank:compile-file-if-needed`.
    CompileFileIfNeeded,
    /// `swank:load-file`.
    LoadFile,

    // ── Queries ───────────────────────────────────────────────────────
    /// `swank:connection-info`.
    ConnectionInfo,
    /// `swank-repl:create-repl`.
    CreateRepl,
    /// `swank:autodoc`.
    Autodoc,
    /// `swank:operator-arglist`.
    OperatorArglist,
    /// `swank:completions`.
    Completions,
    /// `swank:simple-completions`.
    SimpleCompletions,
    /// `swank:fuzzy-completions`.
    FuzzyCompletions,
    /// `swank:completions-for-keyword`.
    KeywordCompletions,
    /// `swank:completions-for-character`.
    CharacterCompletions,
    /// `swank:describe-symbol`.
    DescribeSymbol,
    /// `swank:describe-function`.
    DescribeFunction,
    /// `swank:describe-definition-for-emacs`.
    DescribeDefinition,
    /// `swank:swank-expand-1`.
    Expand1,
    /// `swank:list-all-package-names`.
    ListAllPackageNames,
    /// `swank:apropos-list-for-emacs`.
    AproposList,
    /// `swank:set-package`.
    SetPackage,
    /// `swank:default-directory`.
    DefaultDirectory,
    /// `swank:set-default-directory`.
    SetDefaultDirectory,
    /// `swank-repl:clear-repl-variables`.
    ClearReplVariables,
    /// `swank:backtrace`.
    Backtrace,
    /// `swank:buffer-first-change`.
    BufferFirstChange,

    // ── Acknowledged without action ──────────────────────────────────
    /// `swank:swank-require`.
    SwankRequire,
    /// `swank:init-presentations`.
    InitPresentations,
    /// `swank:complete-form`.
    CompleteForm,
    /// `swank:inspect-current-condition`.
    InspectCurrentCondition,
    /// `swank:sldb-abort`.
    SldbAbort,
    /// `swank:sldb-out`.
    SldbOut,
    /// `swank:frame-locals-and-catch-tags`.
    FrameLocalsAndCatchTags,
    /// `swank:find-definitions-for-emacs`.
    FindDefinitions,
    /// `swank-repl:clear-repl-results`.
    ClearReplResults,

    // ── Session control ──────────────────────────────────────────────
    /// `swank:invoke-nth-restart-for-emacs`.
    InvokeNthRestart,
    /// `swank:throw-to-toplevel`.
    ThrowToToplevel,
    /// `swank:quit-lisp`.
    QuitLisp,
}

/// Tag table. The first entry for a command is its canonical tag.
const TAGS: &[(&str, Command)] = &[
    ("swank:interactive-eval", Command::InteractiveEval),
    ("swank:interactive-eval-region", Command::InteractiveEvalRegion),
    ("swank-repl:listener-eval", Command::ListenerEval),
    ("swank:listener-eval", Command::ListenerEval),
    ("swank:pprint-eval", Command::PprintEval),
    ("swank:compile-string-for-emacs", Command::CompileString),
    ("swank:compile-notes-for-emacs", Command::CompileNotes),
    ("swank:compile-file-for-emacs", Command::CompileFile),
    ("swank:compile-file-if-needed", Command::CompileFileIfNeeded),
    ("swank:load-file", Command::LoadFile),
    ("swank:connection-info", Command::ConnectionInfo),
    ("swank-repl:create-repl", Command::CreateRepl),
    ("swank:create-repl", Command::CreateRepl),
    ("swank:autodoc", Command::Autodoc),
    ("swank:operator-arglist", Command::OperatorArglist),
    ("swank:completions", Command::Completions),
    ("swank:simple-completions", Command::SimpleCompletions),
    ("swank:fuzzy-completions", Command::FuzzyCompletions),
    ("swank:completions-for-keyword", Command::KeywordCompletions),
    ("swank:completions-for-character", Command::CharacterCompletions),
    ("swank:describe-symbol", Command::DescribeSymbol),
    ("swank:describe-function", Command::DescribeFunction),
    ("swank:describe-definition-for-emacs", Command::DescribeDefinition),
    ("swank:swank-expand-1", Command::Expand1),
    ("swank:swank-macroexpand-1", Command::Expand1),
    ("swank:list-all-package-names", Command::ListAllPackageNames),
    ("swank:apropos-list-for-emacs", Command::AproposList),
    ("swank:set-package", Command::SetPackage),
    ("swank-repl:set-package", Command::SetPackage),
    ("swank:default-directory", Command::DefaultDirectory),
    ("swank:set-default-directory", Command::SetDefaultDirectory),
    ("swank-repl:clear-repl-variables", Command::ClearReplVariables),
    ("swank:backtrace", Command::Backtrace),
    ("swank:buffer-first-change", Command::BufferFirstChange),
    ("swank:swank-require", Command::SwankRequire),
    ("swank:init-presentations", Command::InitPresentations),
    ("swank:complete-form", Command::CompleteForm),
    ("swank:inspect-current-condition", Command::InspectCurrentCondition),
    ("swank:sldb-abort", Command::SldbAbort),
    ("swank:sldb-out", Command::SldbOut),
    ("swank:frame-locals-and-catch-tags", Command::FrameLocalsAndCatchTags),
    ("swank:find-definitions-for-emacs", Command::FindDefinitions),
    ("swank-repl:clear-repl-results", Command::ClearReplResults),
    ("swank:clear-repl-results", Command::ClearReplResults),
    ("swank:invoke-nth-restart-for-emacs", Command::InvokeNthRestart),
    ("swank:throw-to-toplevel", Command::ThrowToToplevel),
    ("swank:quit-lisp", Command::QuitLisp),
];

impl Command {
    /// Resolve a full request tag (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::UnknownCommand`] when no handler is registered.
    pub fn from_tag(tag: &str) -> Result<Self> {
        TAGS.iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(tag))
            .map(|(_, command)| *command)
            .ok_or_else(|| AppError::UnknownCommand(tag.to_owned()))
    }

    /// Canonical tag for this command.
    #[must_use]
    pub fn tag(self) -> &'static str {
        TAGS.iter()
            .find(|(_, command)| *command == self)
            .map_or("", |(tag, _)| tag)
    }

    /// Every registered tag, aliases included.
    pub fn tags() -> impl Iterator<Item = &'static str> {
        TAGS.iter().map(|(tag, _)| *tag)
    }

    /// Whether the command runs user code and must hold the execution gate.
    #[must_use]
    pub fn needs_gate(self) -> bool {
        matches!(
            self,
            Self::InteractiveEval
                | Self::InteractiveEvalRegion
                | Self::ListenerEval
                | Self::PprintEval
                | Self::CompileString
                | Self::CompileNotes
                | Self::LoadFile
        )
    }
}
