//! Nested debugger levels and their restart options.
//!
//! Each interpreter error that escapes an evaluation pushes a
//! [`DebuggerFrame`]. The frame owns the id of the request whose final
//! result is still outstanding; resolving the frame moves it out of the
//! stack, so that result can only ever be answered once.
//!
//! | Restart    | Index (non-fatal) | Effect                                   |
//! |------------|-------------------|------------------------------------------|
//! | `QUIT`     | 0                 | reset interpreter, clear every level     |
//! | `CONTINUE` | 1                 | drop levels `L..=N`                      |
//! | `RESTART`  | 2 (0 when fatal)  | relaunch interpreter, clear every level  |

use crate::errors::InterpreterError;
use crate::swank::message::{Event, RequestId};

/// Action offered by a debugger level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartKind {
    /// Return to the top level.
    Quit,
    /// Leave this level, keeping the ones below.
    Continue,
    /// Relaunch the interpreter process.
    Restart,
}

impl RestartKind {
    /// Name shown in the debugger buffer.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Quit => "QUIT",
            Self::Continue => "CONTINUE",
            Self::Restart => "RESTART",
        }
    }

    /// One-line description shown next to the name.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Quit => "Quit to the SLIME top level",
            Self::Continue => "Ignore the error and continue in the same stack level",
            Self::Restart => "Restart euslisp process",
        }
    }

    /// Restart list for a frame, in index order.
    #[must_use]
    pub fn offered(fatal: bool) -> &'static [RestartKind] {
        if fatal {
            &[Self::Restart]
        } else {
            &[Self::Quit, Self::Continue, Self::Restart]
        }
    }

    /// Whether choosing this restart empties the whole stack.
    #[must_use]
    pub fn clears_stack(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// One debugger level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerFrame {
    /// Request awaiting its final result.
    pub id: RequestId,
    /// Condition text as reported by the interpreter.
    pub message: String,
    /// Stack frame descriptions, innermost first.
    pub stack: Vec<String>,
    /// Whether only `RESTART` is offered.
    pub fatal: bool,
}

impl DebuggerFrame {
    /// Frame for an error raised by evaluation.
    #[must_use]
    pub fn from_error(id: RequestId, err: InterpreterError) -> Self {
        Self {
            id,
            message: err.message,
            stack: err.stack,
            fatal: err.fatal,
        }
    }

    /// Fatal frame for a failure of the interpreter process itself.
    #[must_use]
    pub fn process_failure(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
            stack: Vec::new(),
            fatal: true,
        }
    }

    /// Restarts offered by this frame, in index order.
    #[must_use]
    pub fn restarts(&self) -> &'static [RestartKind] {
        RestartKind::offered(self.fatal)
    }

    /// Restart at `index`, if offered.
    #[must_use]
    pub fn restart_at(&self, index: usize) -> Option<RestartKind> {
        self.restarts().get(index).copied()
    }

    /// Index at which `kind` is offered.
    #[must_use]
    pub fn index_of(&self, kind: RestartKind) -> Option<usize> {
        self.restarts().iter().position(|offered| *offered == kind)
    }

    /// `:debug` event announcing this frame at `level`.
    #[must_use]
    pub fn debug_event(&self, level: usize) -> Event {
        Event::Debug {
            level,
            message: self.message.clone(),
            restarts: self
                .restarts()
                .iter()
                .map(|kind| (kind.name().to_owned(), kind.description().to_owned()))
                .collect(),
            frames: self.stack.clone(),
            continuation: self.id,
        }
    }
}

/// Outcome of resolving a debugger level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Level that was resolved.
    pub level: usize,
    /// The resolved frame.
    pub frame: DebuggerFrame,
    /// Restart chosen, or `None` when the index matched nothing offered.
    pub action: Option<RestartKind>,
    /// Levels deeper than `level`, innermost first.
    pub above: Vec<(usize, DebuggerFrame)>,
    /// Levels shallower than `level` removed because the action cleared the
    /// stack, innermost first.
    pub below: Vec<(usize, DebuggerFrame)>,
}

/// Stack of active debugger levels; level `n` is at index `n - 1`.
#[derive(Debug, Default)]
pub struct DebuggerStack {
    frames: Vec<DebuggerFrame>,
}

impl DebuggerStack {
    /// Empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame and return its 1-based level.
    pub fn push(&mut self, frame: DebuggerFrame) -> usize {
        self.frames.push(frame);
        self.frames.len()
    }

    /// Number of active levels.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether no level is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at 1-based `level`.
    #[must_use]
    pub fn frame(&self, level: usize) -> Option<&DebuggerFrame> {
        level.checked_sub(1).and_then(|i| self.frames.get(i))
    }

    /// Resolve `level` with the restart at `index`.
    ///
    /// Levels `level..=depth` are always removed. When the chosen restart
    /// clears the stack, the levels below go too. Returns `None` without
    /// touching the stack when `level` is not active.
    pub fn resolve(&mut self, level: usize, index: usize) -> Option<Resolution> {
        if level == 0 || level > self.frames.len() {
            return None;
        }
        let mut removed = self.frames.split_off(level - 1);
        let above = innermost_first(removed.split_off(1), level + 1);
        let frame = removed.pop()?;
        let action = frame.restart_at(index);

        let below = if action.is_some_and(RestartKind::clears_stack) {
            innermost_first(std::mem::take(&mut self.frames), 1)
        } else {
            Vec::new()
        };

        Some(Resolution {
            level,
            frame,
            action,
            above,
            below,
        })
    }
}

/// Number `frames` from `first_level` and order them deepest first.
fn innermost_first(frames: Vec<DebuggerFrame>, first_level: usize) -> Vec<(usize, DebuggerFrame)> {
    frames
        .into_iter()
        .enumerate()
        .map(|(i, frame)| (first_level + i, frame))
        .rev()
        .collect()
}

/// Condition text shown to the user for an aborted debugger level.
///
/// Keeps what precedes the first `delimiter` and strips a trailing
/// ` in <location>` clause.
#[must_use]
pub fn trim_message<'a>(message: &'a str, delimiter: &str) -> &'a str {
    let head = if delimiter.is_empty() {
        message
    } else {
        message.split(delimiter).next().unwrap_or(message)
    };
    head.rsplit_once(" in ").map_or(head, |(before, _)| before)
}
