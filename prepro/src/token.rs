//! Tokens, hidesets, and source-file bookkeeping.
//!
//! The preprocessor works on an owned `Vec<Token>` with a cursor; expansion
//! and directive handling splice replacement tokens over the consumed range.
//! Every token owns its hideset, so copying a token into two expansion
//! branches lets each branch accumulate hidden macro names independently.

use std::cell::Cell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;

/// Lexical class of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// End of the token stream.
    Eof,
    /// Identifier or keyword.
    Ident,
    /// Numeric literal.
    Num,
    /// String literal, quotes included in the raw text.
    Str,
    /// Character literal.
    Char,
    /// Punctuator, longest-match.
    Punct,
}

/// Per-file metadata shared by every token lexed from that file.
///
/// Immutable except for `line_offset`, which `#line` adjusts so that
/// `__LINE__` and diagnostics report the overridden numbering.
#[derive(Debug, PartialEq, Eq)]
pub struct FileInfo {
    /// Resolved path used for `#pragma once` and include-guard bookkeeping.
    pub name: PathBuf,
    /// Name reported by `__FILE__` and diagnostics.
    pub display_name: String,
    /// Unique id, in order of first open.
    pub file_id: usize,
    /// Added to lexed line numbers when reporting.
    pub line_offset: Cell<i64>,
}

impl FileInfo {
    /// Create metadata for a newly opened file.
    #[must_use]
    pub fn new(name: PathBuf, display_name: impl Into<String>, file_id: usize) -> Self {
        FileInfo {
            name,
            display_name: display_name.into(),
            file_id,
            line_offset: Cell::new(0),
        }
    }
}

/// The set of macro names a token must not expand under.
///
/// Grows monotonically: names are inserted or merged in, never removed.
/// Cloning a token clones its hideset, so divergent expansion branches do
/// not see each other's additions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hideset {
    names: HashSet<String>,
}

impl Hideset {
    /// An empty hideset.
    #[must_use]
    pub fn new() -> Self {
        Hideset::default()
    }

    /// Whether `name` is hidden.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Hide `name`.
    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    /// Union `other` into this set.
    pub fn merge(&mut self, other: &Hideset) {
        for name in &other.names {
            if !self.names.contains(name) {
                self.names.insert(name.clone());
            }
        }
    }

    /// Number of hidden names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no names are hidden.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One preprocessing token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    /// Lexical class.
    pub kind: TokenKind,
    /// Raw source text (quotes included for string and char literals).
    pub text: String,
    /// Value of a numeric or character literal, 0 otherwise.
    pub value: i64,
    /// Decoded contents of a string literal.
    pub string_value: String,
    /// File the token was lexed from, if any.
    pub file: Option<Rc<FileInfo>>,
    /// Line the token was lexed on, 1-based, before `#line` adjustment.
    pub line: usize,
    /// True for the first token of a source line.
    pub at_bol: bool,
    /// True when whitespace or a comment preceded this token.
    pub has_space: bool,
    /// Macro names this token must not expand under.
    pub hideset: Hideset,
}

impl Token {
    /// A bare token with no location and an empty hideset.
    #[must_use]
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Token {
            kind,
            text: text.into(),
            value: 0,
            string_value: String::new(),
            file: None,
            line: 0,
            at_bol: false,
            has_space: false,
            hideset: Hideset::new(),
        }
    }

    /// The end-of-stream token.
    #[must_use]
    pub fn eof() -> Self {
        let mut tok = Token::new(TokenKind::Eof, "");
        tok.at_bol = true;
        tok
    }

    /// Whether this is the directive-introducing `#` punctuator.
    #[must_use]
    pub fn is_hash(&self) -> bool {
        self.kind == TokenKind::Punct && self.text == "#"
    }

    /// Whether this is the punctuator `s`.
    #[must_use]
    pub fn is_punct(&self, s: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == s
    }

    /// Whether this is the identifier `s`.
    #[must_use]
    pub fn is_ident(&self, s: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == s
    }

    /// Whether two tokens agree on kind and raw text.
    #[must_use]
    pub fn same_text(&self, other: &Token) -> bool {
        self.kind == other.kind && self.text == other.text
    }

    /// Line number after applying the file's `#line` offset.
    #[must_use]
    pub fn display_line(&self) -> i64 {
        let offset = self.file.as_ref().map_or(0, |f| f.line_offset.get());
        self.line as i64 + offset
    }

    /// `file:line` for diagnostics.
    #[must_use]
    pub fn loc(&self) -> String {
        match &self.file {
            Some(file) => format!("{}:{}", file.display_name, self.display_line()),
            None => format!("<none>:{}", self.line),
        }
    }
}

/// Render a token stream back to source text.
///
/// A token flagged `at_bol` starts a new line; `has_space` separates tokens
/// within a line. Blank lines are not reconstructed.
#[must_use]
pub fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    for tok in tokens {
        if tok.kind == TokenKind::Eof {
            continue;
        }
        if tok.at_bol && !out.is_empty() {
            out.push('\n');
        } else if tok.has_space && !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&tok.text);
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}
