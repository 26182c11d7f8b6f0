//! S-expression values, reader, and printer.
//!
//! Every payload exchanged with the editor is a single S-expression, and
//! every command sent to the interpreter is built from one. The reader
//! accepts the subset of Lisp syntax both ends emit: lists, strings,
//! integers, floats, symbols (keywords are symbols starting with `:`),
//! quote-family reader macros and `#` dispatch atoms.
//!
//! The printer has two token styles. On the wire to the editor booleans
//! and empty lists print as `t` / `nil`; inside commands addressed to the
//! interpreter they print as `lisp:t` / `lisp:nil` so the reader there
//! resolves them regardless of the current package.

use std::fmt::{self, Display, Formatter, Write as _};

use crate::{AppError, Result};

/// Deepest list nesting the reader accepts. Every other traversal of a
/// [`Sexp`] recurses over values the reader produced, so this bounds them too.
pub const MAX_DEPTH: usize = 512;

/// Symbol the editor inserts at the cursor position in autodoc forms.
pub const CURSOR_MARKER: &str = "swank::%cursor-marker%";

/// A structured value read from or written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexp {
    /// `nil`, the empty list, and false.
    Nil,
    /// `t`, true.
    T,
    /// Integer literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal.
    Str(String),
    /// Symbol, including keywords such as `:ok`.
    Symbol(String),
    /// Non-empty proper list. An empty `List` prints as `nil`.
    List(Vec<Sexp>),
}

/// Token style used when printing booleans and empty values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStyle {
    /// `t` / `nil`, as expected by the editor.
    Wire,
    /// `lisp:t` / `lisp:nil`, package-qualified for interpreter commands.
    Lisp,
}

impl Sexp {
    /// Build a symbol.
    #[must_use]
    pub fn sym(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    /// Build a keyword symbol; `name` is given without the leading colon.
    #[must_use]
    pub fn keyword(name: &str) -> Self {
        Self::Symbol(format!(":{name}"))
    }

    /// Build a string literal.
    #[must_use]
    pub fn string(text: impl Into<String>) -> Self {
        Self::Str(text.into())
    }

    /// Build a list; an empty vector yields [`Sexp::Nil`].
    #[must_use]
    pub fn list(items: Vec<Sexp>) -> Self {
        if items.is_empty() {
            Self::Nil
        } else {
            Self::List(items)
        }
    }

    /// `t` for `true`, `nil` for `false`.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        if value {
            Self::T
        } else {
            Self::Nil
        }
    }

    /// Whether this value is the symbol `name` (case-insensitive).
    #[must_use]
    pub fn is_symbol(&self, name: &str) -> bool {
        matches!(self, Self::Symbol(s) if s.eq_ignore_ascii_case(name))
    }

    /// Whether this value is anything other than `nil`.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil)
    }

    /// String contents when this is a string literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Symbol name when this is a symbol.
    #[must_use]
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value when this is an integer literal.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// List elements; `nil` is the empty list. Atoms yield `None`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Sexp]> {
        match self {
            Self::Nil => Some(&[]),
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Strip one level of `(quote x)`; other values are returned unchanged.
    #[must_use]
    pub fn unquote(&self) -> &Sexp {
        match self {
            Self::List(items) if items.len() == 2 && items[0].is_symbol("quote") => &items[1],
            _ => self,
        }
    }

    /// Print with the given token style.
    #[must_use]
    pub fn printed(&self, style: TokenStyle) -> Printed<'_> {
        Printed { sexp: self, style }
    }

    /// Print for an interpreter command (`lisp:t` / `lisp:nil`).
    #[must_use]
    pub fn to_lisp(&self) -> String {
        self.printed(TokenStyle::Lisp).to_string()
    }
}

impl From<bool> for Sexp {
    fn from(value: bool) -> Self {
        Self::boolean(value)
    }
}

impl From<&str> for Sexp {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Sexp {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Sexp {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl<T: Into<Sexp>> From<Option<T>> for Sexp {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}

impl Display for Sexp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.printed(TokenStyle::Wire).fmt(f)
    }
}

/// Display adapter returned by [`Sexp::printed`].
#[derive(Debug, Clone, Copy)]
pub struct Printed<'a> {
    sexp: &'a Sexp,
    style: TokenStyle,
}

impl Display for Printed<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (t, nil) = match self.style {
            TokenStyle::Wire => ("t", "nil"),
            TokenStyle::Lisp => ("lisp:t", "lisp:nil"),
        };
        match self.sexp {
            Sexp::Nil => f.write_str(nil),
            Sexp::T => f.write_str(t),
            Sexp::Int(n) => write!(f, "{n}"),
            Sexp::Float(x) => write!(f, "{x:?}"),
            Sexp::Str(s) => write_escaped(f, s),
            Sexp::Symbol(s) => f.write_str(s),
            Sexp::List(items) if items.is_empty() => f.write_str(nil),
            Sexp::List(items) => {
                f.write_char('(')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    item.printed(self.style).fmt(f)?;
                }
                f.write_char(')')
            }
        }
    }
}

fn write_escaped(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        if c == '"' || c == '\\' {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    f.write_char('"')
}

/// Escape `text` for embedding inside a double-quoted Lisp string literal.
#[must_use]
pub fn escape_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Read exactly one S-expression from `input`.
///
/// # Errors
///
/// Returns [`AppError::MalformedMessage`] if the input is empty, unbalanced,
/// nested deeper than [`MAX_DEPTH`], or has trailing data after the first
/// datum.
pub fn parse(input: &str) -> Result<Sexp> {
    let mut reader = Reader::new(input);
    let value = reader
        .read()?
        .ok_or_else(|| AppError::MalformedMessage("empty input".into()))?;
    reader.skip_atmosphere();
    if reader.pos < reader.src.len() {
        return Err(AppError::MalformedMessage(format!(
            "trailing data at byte {}",
            reader.pos
        )));
    }
    Ok(value)
}

/// Read every top-level S-expression in `input`.
///
/// # Errors
///
/// Returns [`AppError::MalformedMessage`] on unbalanced or unterminated
/// input, or input nested deeper than [`MAX_DEPTH`].
pub fn parse_all(input: &str) -> Result<Vec<Sexp>> {
    let mut reader = Reader::new(input);
    let mut forms = Vec::new();
    while let Some(form) = reader.read()? {
        forms.push(form);
    }
    Ok(forms)
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(AppError::MalformedMessage(format!(
                "nesting too deep at byte {}",
                self.pos
            )));
        }
        Ok(())
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.src[self.pos..].starts_with(prefix)
    }

    fn skip_atmosphere(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('#') if self.starts_with("#|") => {
                    self.pos += 2;
                    match self.src[self.pos..].find("|#") {
                        Some(end) => self.pos += end + 2,
                        None => self.pos = self.src.len(),
                    }
                }
                _ => return,
            }
        }
    }

    /// Read the next datum, or `None` at end of input.
    fn read(&mut self) -> Result<Option<Sexp>> {
        self.skip_atmosphere();
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        let value = match c {
            '(' => {
                self.bump();
                self.read_list()?
            }
            ')' => {
                return Err(AppError::MalformedMessage(format!(
                    "unexpected ')' at byte {}",
                    self.pos
                )));
            }
            '"' => {
                self.bump();
                Sexp::Str(self.read_string()?)
            }
            '\'' => self.read_prefixed(1, "quote")?,
            '`' => self.read_prefixed(1, "quasiquote")?,
            ',' if self.starts_with(",@") => self.read_prefixed(2, "unquote-splicing")?,
            ',' => self.read_prefixed(1, "unquote")?,
            '#' if self.starts_with("#'") => self.read_prefixed(2, "function")?,
            '#' => self.read_dispatch()?,
            _ => atom(&self.read_token()),
        };
        Ok(Some(value))
    }

    fn read_prefixed(&mut self, width: usize, head: &str) -> Result<Sexp> {
        self.pos += width;
        self.descend()?;
        let inner = self
            .read()?
            .ok_or_else(|| AppError::MalformedMessage(format!("missing form after {head}")))?;
        self.depth -= 1;
        Ok(Sexp::List(vec![Sexp::sym(head), inner]))
    }

    /// Read list elements up to the closing paren; the opening paren has
    /// already been consumed.
    fn read_list(&mut self) -> Result<Sexp> {
        self.descend()?;
        let mut items = Vec::new();
        loop {
            self.skip_atmosphere();
            match self.peek() {
                None => return Err(AppError::MalformedMessage("unterminated list".into())),
                Some(')') => {
                    self.bump();
                    self.depth -= 1;
                    return Ok(Sexp::list(items));
                }
                Some(_) => {
                    if let Some(item) = self.read()? {
                        items.push(item);
                    }
                }
            }
        }
    }

    fn read_string(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(AppError::MalformedMessage("unterminated string".into())),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => {
                        return Err(AppError::MalformedMessage("unterminated string".into()))
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    /// `#\c` characters, `#x…` style atoms, and `#f(…)` / `#(…)` vectors.
    /// Each reads as a symbol holding its source text, so it prints back
    /// exactly as written.
    fn read_dispatch(&mut self) -> Result<Sexp> {
        let start = self.pos;
        self.bump();
        if self.peek() == Some('\\') {
            self.bump();
            self.bump();
            let _rest = self.read_token();
            return Ok(Sexp::sym(&self.src[start..self.pos]));
        }
        let _prefix = self.read_token();
        if self.peek() == Some('(') {
            self.bump();
            let _body = self.read_list()?;
        }
        Ok(Sexp::sym(&self.src[start..self.pos]))
    }

    fn read_token(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '"' | '\'' | ';') {
                break;
            }
            self.bump();
        }
        self.src[start..self.pos].to_owned()
    }
}

fn atom(token: &str) -> Sexp {
    if token.eq_ignore_ascii_case("nil") {
        return Sexp::Nil;
    }
    if token.eq_ignore_ascii_case("t") {
        return Sexp::T;
    }
    if let Ok(n) = token.parse::<i64>() {
        return Sexp::Int(n);
    }
    let numeric = token.chars().any(|c| c.is_ascii_digit())
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if numeric {
        if let Ok(x) = token.parse::<f64>() {
            return Sexp::Float(x);
        }
    }
    Sexp::Symbol(token.to_owned())
}

// ── Cursor search ─────────────────────────────────────────────────────────────

/// Locate the innermost list containing [`CURSOR_MARKER`].
///
/// Returns the list and the index of the marker within it (the last
/// occurrence when the marker appears more than once in that list). When
/// the marker appears at several depths the deepest list wins; among lists
/// at the same depth, the one reached first scanning right to left wins.
#[must_use]
pub fn current_scope(form: &Sexp) -> Option<(&[Sexp], usize)> {
    let items = match form {
        Sexp::List(items) => items.as_slice(),
        _ => return None,
    };
    find_innermost(items, 0).map(|(scope, cursor, _depth)| (scope, cursor))
}

fn find_innermost(items: &[Sexp], depth: usize) -> Option<(&[Sexp], usize, usize)> {
    let mut best: Option<(&[Sexp], usize, usize)> = items
        .iter()
        .rposition(|e| e.is_symbol(CURSOR_MARKER))
        .map(|cursor| (items, cursor, depth));

    for item in items.iter().rev() {
        if let Sexp::List(children) = item {
            if let Some(found) = find_innermost(children, depth + 1) {
                if best.map_or(true, |(_, _, d)| found.2 > d) {
                    best = Some(found);
                }
            }
        }
    }
    best
}
