//! The lexer: source text to preprocessing tokens.
//!
//! Comments and backslash-newline splices are consumed here and surface
//! only as the `has_space` flag on the following token. Directive structure
//! is preserved through `at_bol`: a `#` that starts a logical line
//! introduces a directive, any other `#` is an ordinary punctuator.

use std::rc::Rc;

use crate::diag::Diagnostics;
use crate::error::{ErrorKind, PreproError};
use crate::token::{FileInfo, Token, TokenKind};

/// Multi-character punctuators, longest first so matching is maximal-munch.
const PUNCTS: [&str; 23] = [
    "<<=", ">>=", "...", "##", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "->", "++", "--",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
];

/// Whether `c` can start an identifier.
#[must_use]
pub fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Whether `c` can continue an identifier.
#[must_use]
pub fn is_identifier_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    at_bol: bool,
    has_space: bool,
    file: &'a Rc<FileInfo>,
    diag: &'a Diagnostics,
}

/// Tokenize one source file into a stream ending in an EOF token.
///
/// # Errors
/// Returns [`PreproError`] for unterminated string, character, or block
/// comment constructs and for stray characters outside the C token set.
pub fn tokenize(
    source: &str,
    file: &Rc<FileInfo>,
    diag: &Diagnostics,
) -> Result<Vec<Token>, PreproError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        at_bol: true,
        has_space: false,
        file,
        diag,
    };
    lexer.run()
}

impl Lexer<'_> {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Consume a backslash-newline splice if one starts here.
    fn skip_splice(&mut self) -> bool {
        if self.peek(0) == Some('\\') && matches!(self.peek(1), Some('\n') | Some('\r')) {
            self.pos += if self.peek(1) == Some('\r') && self.peek(2) == Some('\n') {
                3
            } else {
                2
            };
            self.line += 1;
            return true;
        }
        false
    }

    fn error(&self, kind: ErrorKind, message: &str) -> PreproError {
        let location = format!("{}:{}", self.file.display_name, self.line);
        self.diag.error_at(kind, &location, message.to_string())
    }

    fn make(&mut self, kind: TokenKind, text: String, line: usize) -> Token {
        let mut tok = Token::new(kind, text);
        tok.file = Some(Rc::clone(self.file));
        tok.line = line;
        tok.at_bol = self.at_bol;
        tok.has_space = self.has_space;
        self.at_bol = false;
        self.has_space = false;
        tok
    }

    fn run(&mut self) -> Result<Vec<Token>, PreproError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                self.pos += 1;
                self.line += 1;
                self.at_bol = true;
                self.has_space = false;
                continue;
            }
            if c == '\r' {
                self.pos += 1;
                continue;
            }
            if c.is_whitespace() {
                self.pos += 1;
                self.has_space = true;
                continue;
            }
            // Backslash-newline joins the next physical line.
            if self.skip_splice() {
                continue;
            }
            if c == '/' && self.peek(1) == Some('/') {
                while let Some(c) = self.peek(0) {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
                self.has_space = true;
                continue;
            }
            if c == '/' && self.peek(1) == Some('*') {
                self.read_block_comment()?;
                continue;
            }
            if c == '"' {
                let tok = self.read_string()?;
                tokens.push(tok);
                continue;
            }
            if c == '\'' {
                let tok = self.read_char()?;
                tokens.push(tok);
                continue;
            }
            if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit()))
            {
                let tok = self.read_number();
                tokens.push(tok);
                continue;
            }
            if is_identifier_start(c) {
                let tok = self.read_identifier();
                tokens.push(tok);
                continue;
            }
            let tok = self.read_punct(c)?;
            tokens.push(tok);
        }
        let mut eof = Token::eof();
        eof.file = Some(Rc::clone(self.file));
        eof.line = self.line;
        tokens.push(eof);
        Ok(tokens)
    }

    fn read_block_comment(&mut self) -> Result<(), PreproError> {
        self.pos += 2;
        let mut crossed_line = false;
        loop {
            match self.peek(0) {
                Some('*') if self.peek(1) == Some('/') => {
                    self.pos += 2;
                    break;
                }
                Some('\n') => {
                    self.pos += 1;
                    self.line += 1;
                    crossed_line = true;
                }
                Some(_) => self.pos += 1,
                None => return Err(self.error(ErrorKind::InvalidToken, "unterminated block comment")),
            }
        }
        if crossed_line {
            self.at_bol = true;
            self.has_space = false;
        } else {
            self.has_space = true;
        }
        Ok(())
    }

    fn decode_escape(c: char) -> char {
        match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            other => other,
        }
    }

    fn read_string(&mut self) -> Result<Token, PreproError> {
        let line = self.line;
        let mut raw = String::from('"');
        let mut value = String::new();
        self.pos += 1;
        loop {
            match self.peek(0) {
                Some('"') => {
                    raw.push('"');
                    self.pos += 1;
                    break;
                }
                Some('\\') => match self.peek(1) {
                    Some('\n') => {
                        self.pos += 2;
                        self.line += 1;
                    }
                    Some(escaped) => {
                        raw.push('\\');
                        raw.push(escaped);
                        value.push(Self::decode_escape(escaped));
                        self.pos += 2;
                    }
                    None => {
                        return Err(
                            self.error(ErrorKind::InvalidToken, "unterminated string literal")
                        );
                    }
                },
                Some('\n') | None => {
                    return Err(self.error(ErrorKind::InvalidToken, "unterminated string literal"));
                }
                Some(c) => {
                    raw.push(c);
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
        let mut tok = self.make(TokenKind::Str, raw, line);
        tok.string_value = value;
        Ok(tok)
    }

    fn read_char(&mut self) -> Result<Token, PreproError> {
        let line = self.line;
        let mut raw = String::from('\'');
        let mut value: i64 = 0;
        let mut first = true;
        self.pos += 1;
        loop {
            match self.peek(0) {
                Some('\'') => {
                    raw.push('\'');
                    self.pos += 1;
                    break;
                }
                Some('\\') => match self.peek(1) {
                    Some(escaped) => {
                        raw.push('\\');
                        raw.push(escaped);
                        if first {
                            value = Self::decode_escape(escaped) as i64;
                            first = false;
                        }
                        self.pos += 2;
                    }
                    None => {
                        return Err(
                            self.error(ErrorKind::InvalidToken, "unterminated character literal")
                        );
                    }
                },
                Some('\n') | None => {
                    return Err(
                        self.error(ErrorKind::InvalidToken, "unterminated character literal")
                    );
                }
                Some(c) => {
                    raw.push(c);
                    if first {
                        value = c as i64;
                        first = false;
                    }
                    self.pos += 1;
                }
            }
        }
        let mut tok = self.make(TokenKind::Char, raw, line);
        tok.value = value;
        Ok(tok)
    }

    fn read_number(&mut self) -> Token {
        let line = self.line;
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if self.skip_splice() {
                continue;
            }
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                text.push(c);
                self.pos += 1;
                // Exponent signs belong to the number.
                if matches!(c, 'e' | 'E' | 'p' | 'P')
                    && matches!(self.peek(0), Some('+') | Some('-'))
                    && text.starts_with(|f: char| f.is_ascii_digit() || f == '.')
                {
                    if let Some(sign) = self.peek(0) {
                        text.push(sign);
                        self.pos += 1;
                    }
                }
            } else {
                break;
            }
        }
        let value = parse_int_value(&text);
        let mut tok = self.make(TokenKind::Num, text, line);
        tok.value = value;
        tok
    }

    fn read_identifier(&mut self) -> Token {
        let line = self.line;
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if self.skip_splice() {
                continue;
            }
            if is_identifier_continue(c) {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        self.make(TokenKind::Ident, text, line)
    }

    fn read_punct(&mut self, c: char) -> Result<Token, PreproError> {
        let line = self.line;
        for punct in PUNCTS {
            if self.matches_str(punct) {
                self.pos += punct.len();
                return Ok(self.make(TokenKind::Punct, punct.to_string(), line));
            }
        }
        if c.is_ascii_punctuation() {
            self.pos += 1;
            return Ok(self.make(TokenKind::Punct, c.to_string(), line));
        }
        Err(self.error(
            ErrorKind::InvalidToken,
            &format!("stray character {c:?} in program"),
        ))
    }

    fn matches_str(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek(i) == Some(c))
    }
}

/// Best-effort integer value of a numeric literal; 0 for floats.
fn parse_int_value(text: &str) -> i64 {
    let stripped = text.trim_end_matches(['u', 'U', 'l', 'L']);
    if stripped.contains('.')
        || (!stripped.starts_with("0x")
            && !stripped.starts_with("0X")
            && stripped.contains(['e', 'E']))
    {
        return 0;
    }
    let (digits, radix) = if let Some(hex) = stripped.strip_prefix("0x").or_else(|| {
        stripped.strip_prefix("0X")
    }) {
        (hex, 16)
    } else if let Some(bin) = stripped.strip_prefix("0b").or_else(|| stripped.strip_prefix("0B")) {
        (bin, 2)
    } else if stripped.len() > 1 && stripped.starts_with('0') {
        (&stripped[1..], 8)
    } else {
        (stripped, 10)
    };
    i64::from_str_radix(digits, radix).unwrap_or(0)
}
