//! Typed inbound messages and outbound responses.
//!
//! # Known inbound message kinds
//!
//! | Payload                                      | Maps to                       |
//! |----------------------------------------------|-------------------------------|
//! | `(:emacs-rex FORM PACKAGE THREAD ID)`        | [`Message::Rex`]              |
//! | `(:emacs-interrupt THREAD)`                  | [`Message::Interrupt`]        |
//! | `(:emacs-return-string THREAD TAG STRING)`   | [`Message::ReturnString`]     |
//! | *(anything else)*                            | [`AppError::MalformedMessage`]|
//!
//! Outbound traffic is split at the type level into [`Event`]s, of which a
//! request may produce any number, and the single [`ReturnValue`] that
//! completes it.

use crate::swank::sexp::{self, Sexp};
use crate::{AppError, Result};

/// Correlation identifier chosen by the editor for each `:emacs-rex`.
pub type RequestId = i64;

/// Thread number used in debugger and read-string events.
const SESSION_THREAD: i64 = 0;

/// Tag used in read-string events.
const READ_TAG: i64 = 1;

/// Thread designator the editor uses for the REPL.
pub const REPL_THREAD: &str = ":repl-thread";

// ── Inbound ───────────────────────────────────────────────────────────────────

/// An evaluation request: `(:emacs-rex (TAG ARGS…) PACKAGE THREAD ID)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Full command tag, e.g. `swank-repl:listener-eval`.
    pub tag: String,
    /// Positional arguments following the tag.
    pub args: Vec<Sexp>,
    /// Package the editor believes is current; `None` when sent as `nil`.
    pub package: Option<String>,
    /// Originating thread designator (`t`, `:repl-thread`, or a number).
    pub thread: Sexp,
    /// Correlation id echoed in the final `:return`.
    pub id: RequestId,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Evaluation request expecting exactly one `:return`.
    Rex(Request),
    /// Out-of-band interrupt for the given thread.
    Interrupt {
        /// Thread the editor wants interrupted.
        thread: Sexp,
    },
    /// Text typed by the user in answer to a read request.
    ReturnString {
        /// Thread that asked for input.
        thread: Sexp,
        /// Read tag from the matching `:read-string`.
        tag: Sexp,
        /// The text entered.
        text: String,
    },
}

impl Message {
    /// Parse a decoded frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MalformedMessage`] when the payload is not a
    /// well-formed S-expression or does not match a known message shape.
    pub fn parse(payload: &str) -> Result<Self> {
        let value = sexp::parse(payload)?;
        let items = value
            .as_list()
            .filter(|items| !items.is_empty())
            .ok_or_else(|| AppError::MalformedMessage("message is not a tagged list".into()))?;

        match items[0].as_symbol() {
            Some(":emacs-rex") => parse_rex(&items[1..]).map(Self::Rex),
            Some(":emacs-interrupt") => match &items[1..] {
                [thread] => Ok(Self::Interrupt {
                    thread: thread.clone(),
                }),
                _ => Err(AppError::MalformedMessage(
                    ":emacs-interrupt expects one argument".into(),
                )),
            },
            Some(":emacs-return-string") => match &items[1..] {
                [thread, tag, Sexp::Str(text)] => Ok(Self::ReturnString {
                    thread: thread.clone(),
                    tag: tag.clone(),
                    text: text.clone(),
                }),
                _ => Err(AppError::MalformedMessage(
                    ":emacs-return-string expects thread, tag and string".into(),
                )),
            },
            Some(other) => Err(AppError::MalformedMessage(format!(
                "unsupported message kind {other}"
            ))),
            None => Err(AppError::MalformedMessage(
                "message kind must be a symbol".into(),
            )),
        }
    }
}

fn parse_rex(items: &[Sexp]) -> Result<Request> {
    let [form, package, thread, id] = items else {
        return Err(AppError::MalformedMessage(format!(
            ":emacs-rex expects 4 elements, got {}",
            items.len()
        )));
    };
    let id = id
        .as_int()
        .ok_or_else(|| AppError::MalformedMessage(format!("request id {id} is not an integer")))?;
    let form = form
        .as_list()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::MalformedMessage("request form must be a non-empty list".into()))?;
    let tag = form[0]
        .as_symbol()
        .ok_or_else(|| AppError::MalformedMessage(format!("command tag {} is not a symbol", form[0])))?
        .to_ascii_lowercase();
    let package = match package {
        Sexp::Str(name) => Some(name.clone()),
        Sexp::Symbol(name) => Some(name.clone()),
        _ => None,
    };
    Ok(Request {
        tag,
        args: form[1..].to_vec(),
        package,
        thread: thread.clone(),
        id,
    })
}

/// Best-effort recovery of the request id from a payload that failed to parse
/// as a [`Message`], so the failure can still be answered.
///
/// Payloads the reader rejects outright (e.g. nested too deeply) fall back
/// to taking the last token before the closing paren of an `:emacs-rex`.
#[must_use]
pub fn salvage_request_id(payload: &str) -> Option<RequestId> {
    let Ok(value) = sexp::parse(payload) else {
        return trailing_rex_id(payload);
    };
    let items = value.as_list()?;
    if !items.first()?.is_symbol(":emacs-rex") {
        return None;
    }
    items.last()?.as_int()
}

fn trailing_rex_id(payload: &str) -> Option<RequestId> {
    let text = payload.trim();
    let head = text.get(..11)?;
    if !head.eq_ignore_ascii_case("(:emacs-rex") {
        return None;
    }
    let body = text.strip_suffix(')')?.trim_end();
    let start = body.rfind(|c: char| c.is_whitespace() || c == ')')? + 1;
    body[start..].parse().ok()
}

// ── Outbound ──────────────────────────────────────────────────────────────────

/// Intermediate message sent while a request is in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The interpreter is reading from the REPL.
    ReadString,
    /// The pending read was abandoned; evaluation finished.
    ReadAborted,
    /// Output text for the REPL buffer.
    WriteString {
        /// Text to insert.
        text: String,
        /// Whether the text is a printed evaluation result.
        repl_result: bool,
    },
    /// Current package and prompt changed (or were refreshed).
    NewPackage {
        /// Package name.
        name: String,
        /// Prompt string.
        prompt: String,
    },
    /// Enter the debugger at `level`.
    Debug {
        /// 1-based debugger depth.
        level: usize,
        /// Condition text.
        message: String,
        /// `(name, description)` pairs in index order.
        restarts: Vec<(String, String)>,
        /// Stack frame descriptions, innermost first.
        frames: Vec<String>,
        /// Request whose result is pending on this level.
        continuation: RequestId,
    },
    /// Show the debugger buffer for `level`.
    DebugActivate {
        /// 1-based debugger depth.
        level: usize,
    },
    /// Leave debugger `level`.
    DebugReturn {
        /// 1-based debugger depth.
        level: usize,
    },
}

/// Status carried by the final `:return` of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    /// Completed with a value.
    Ok(Sexp),
    /// Aborted, optionally with the condition text.
    Abort(Option<String>),
    /// Failed inside the backend before reaching the interpreter.
    Error(String),
}

/// Any message sent back to the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Intermediate event.
    Event(Event),
    /// Final result of request `id`.
    Return {
        /// Outcome of the request.
        value: ReturnValue,
        /// Correlation id of the request being completed.
        id: RequestId,
    },
}

fn usize_sexp(n: usize) -> Sexp {
    Sexp::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// Render a stack as `((0 "frame") (1 "frame") …)` starting at index `start`.
#[must_use]
pub fn frames_sexp(frames: &[String], start: usize) -> Sexp {
    Sexp::list(
        frames
            .iter()
            .enumerate()
            .map(|(i, frame)| Sexp::List(vec![usize_sexp(start + i), Sexp::string(frame.clone())]))
            .collect(),
    )
}

impl Event {
    /// Build the wire form of this event.
    #[must_use]
    pub fn to_sexp(&self) -> Sexp {
        match self {
            Self::ReadString => Sexp::List(vec![
                Sexp::keyword("read-string"),
                Sexp::Int(SESSION_THREAD),
                Sexp::Int(READ_TAG),
            ]),
            Self::ReadAborted => Sexp::List(vec![
                Sexp::keyword("read-aborted"),
                Sexp::Int(SESSION_THREAD),
                Sexp::Int(READ_TAG),
            ]),
            Self::WriteString { text, repl_result } => {
                let mut items = vec![Sexp::keyword("write-string"), Sexp::string(text.clone())];
                if *repl_result {
                    items.push(Sexp::keyword("repl-result"));
                }
                Sexp::List(items)
            }
            Self::NewPackage { name, prompt } => Sexp::List(vec![
                Sexp::keyword("new-package"),
                Sexp::string(name.clone()),
                Sexp::string(prompt.clone()),
            ]),
            Self::Debug {
                level,
                message,
                restarts,
                frames,
                continuation,
            } => Sexp::List(vec![
                Sexp::keyword("debug"),
                Sexp::Int(SESSION_THREAD),
                usize_sexp(*level),
                Sexp::List(vec![Sexp::string(message.clone()), Sexp::string(""), Sexp::Nil]),
                Sexp::list(
                    restarts
                        .iter()
                        .map(|(name, description)| {
                            Sexp::List(vec![
                                Sexp::string(name.clone()),
                                Sexp::string(description.clone()),
                            ])
                        })
                        .collect(),
                ),
                frames_sexp(frames, 0),
                Sexp::List(vec![Sexp::Int(*continuation)]),
            ]),
            Self::DebugActivate { level } => Sexp::List(vec![
                Sexp::keyword("debug-activate"),
                Sexp::Int(SESSION_THREAD),
                usize_sexp(*level),
                Sexp::Nil,
            ]),
            Self::DebugReturn { level } => Sexp::List(vec![
                Sexp::keyword("debug-return"),
                Sexp::Int(SESSION_THREAD),
                usize_sexp(*level),
                Sexp::Nil,
            ]),
        }
    }
}

impl ReturnValue {
    /// Build the `(:ok …)` / `(:abort …)` status form.
    ///
    /// Backend errors are reported as `:abort` because the editor only
    /// understands those two statuses.
    #[must_use]
    pub fn to_sexp(&self) -> Sexp {
        match self {
            Self::Ok(value) => Sexp::List(vec![Sexp::keyword("ok"), value.clone()]),
            Self::Abort(message) => Sexp::List(vec![
                Sexp::keyword("abort"),
                message.clone().map_or(Sexp::Nil, Sexp::Str),
            ]),
            Self::Error(message) => {
                Sexp::List(vec![Sexp::keyword("abort"), Sexp::string(message.clone())])
            }
        }
    }
}

impl Response {
    /// Build the wire form of this response.
    #[must_use]
    pub fn to_sexp(&self) -> Sexp {
        match self {
            Self::Event(event) => event.to_sexp(),
            Self::Return { value, id } => Sexp::List(vec![
                Sexp::keyword("return"),
                value.to_sexp(),
                Sexp::Int(*id),
            ]),
        }
    }

    /// Whether this is the final result of a request.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Return { .. })
    }
}

impl From<Event> for Response {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}
