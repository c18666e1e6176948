//! Conditional compilation: the `#if` stack, block skipping, and
//! constant-expression evaluation.

use crate::diag::Diagnostics;
use crate::error::{ErrorKind, PreproError};
use crate::macros::MacroTable;
use crate::token::{Token, TokenKind};

/// Where within a conditional group the cursor currently sits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CondContext {
    /// Between `#if`/`#ifdef`/`#ifndef` and the first `#elif`/`#else`.
    InThen,
    /// After at least one `#elif`.
    InElif,
    /// After `#else`; nothing but `#endif` may follow.
    InElse,
}

/// One open conditional group.
#[derive(Clone, Debug)]
pub struct CondEntry {
    /// Current position within the group.
    pub context: CondContext,
    /// The directive token that opened the group, for diagnostics.
    pub opening: Token,
    /// Whether some branch of this group has already been taken.
    pub included: bool,
}

/// The stack of open conditional groups. Its depth always equals the
/// nesting depth of unclosed `#if`s at the cursor.
#[derive(Debug, Default)]
pub struct ConditionalStack {
    entries: Vec<CondEntry>,
}

impl ConditionalStack {
    /// An empty stack.
    #[must_use]
    pub fn new() -> Self {
        ConditionalStack::default()
    }

    /// Open a new conditional group.
    pub fn push(&mut self, entry: CondEntry) {
        self.entries.push(entry);
    }

    /// Close the innermost group.
    ///
    /// # Errors
    /// Fails when no group is open (a stray `#endif`).
    pub fn pop(&mut self, tok: &Token, diag: &Diagnostics) -> Result<CondEntry, PreproError> {
        self.entries
            .pop()
            .ok_or_else(|| diag.error_with(ErrorKind::StrayConditional, tok, "stray #endif"))
    }

    /// The innermost open group.
    ///
    /// # Errors
    /// Fails when no group is open.
    pub fn top_mut(
        &mut self,
        tok: &Token,
        diag: &Diagnostics,
    ) -> Result<&mut CondEntry, PreproError> {
        self.entries
            .last_mut()
            .ok_or_else(|| diag.error_with(ErrorKind::StrayConditional, tok, "no open conditional"))
    }

    /// Whether no groups are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of open groups.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Check that every group was closed by end of input.
    ///
    /// # Errors
    /// Fails at the opening directive of the innermost unclosed group.
    pub fn finish(&self, diag: &Diagnostics) -> Result<(), PreproError> {
        match self.entries.last() {
            Some(entry) => Err(diag.error(ErrorKind::UnterminatedConditional, &entry.opening)),
            None => Ok(()),
        }
    }
}

/// Scan forward from `pos` to the `#elif`, `#else`, or `#endif` belonging
/// to the current group, skipping nested groups whole. Returns the index of
/// that directive's `#` token; nothing is consumed.
///
/// # Errors
/// Fails when the stream ends first.
pub(crate) fn skip_branch(
    tokens: &[Token],
    mut pos: usize,
    opening: &Token,
    diag: &Diagnostics,
) -> Result<usize, PreproError> {
    let mut depth = 0usize;
    while pos < tokens.len() {
        let tok = &tokens[pos];
        if tok.kind == TokenKind::Eof {
            break;
        }
        if tok.is_hash() && tok.at_bol {
            if let Some(name) = tokens.get(pos + 1) {
                if name.kind == TokenKind::Ident {
                    match name.text.as_str() {
                        "if" | "ifdef" | "ifndef" => depth += 1,
                        "elif" | "else" if depth == 0 => return Ok(pos),
                        "endif" => {
                            if depth == 0 {
                                return Ok(pos);
                            }
                            depth -= 1;
                        }
                        _ => {}
                    }
                }
            }
        }
        pos += 1;
    }
    Err(diag.error(ErrorKind::UnterminatedConditional, opening))
}

/// Rewrite `defined NAME` and `defined(NAME)` to `1` or `0` by table
/// lookup. Runs before macro expansion so the operand is never expanded.
///
/// # Errors
/// Fails when `defined` is not followed by a name.
pub(crate) fn resolve_defined(
    tokens: &[Token],
    table: &MacroTable,
    diag: &Diagnostics,
) -> Result<Vec<Token>, PreproError> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        if !tok.is_ident("defined") {
            out.push(tok.clone());
            i += 1;
            continue;
        }
        let (name, consumed) = match tokens.get(i + 1) {
            Some(t) if t.kind == TokenKind::Ident => (t.text.clone(), 2),
            Some(t) if t.is_punct("(") => match (tokens.get(i + 2), tokens.get(i + 3)) {
                (Some(name), Some(close))
                    if name.kind == TokenKind::Ident && close.is_punct(")") =>
                {
                    (name.text.clone(), 4)
                }
                _ => {
                    return Err(diag.error_with(
                        ErrorKind::InvalidToken,
                        tok,
                        "malformed defined operator",
                    ));
                }
            },
            _ => {
                return Err(diag.error_with(
                    ErrorKind::InvalidToken,
                    tok,
                    "operand of defined must be a macro name",
                ));
            }
        };
        let value = i64::from(table.is_defined(&name));
        let mut num = Token::new(TokenKind::Num, value.to_string());
        num.value = value;
        num.file = tok.file.clone();
        num.line = tok.line;
        num.has_space = tok.has_space;
        out.push(num);
        i += consumed;
    }
    Ok(out)
}

/// Evaluate an `#if`/`#elif` expression over 64-bit signed integers.
///
/// The caller resolves `defined` and macro-expands first; any identifier
/// still present evaluates to 0. `&&` and `||` short-circuit: the dead
/// operand is parsed but cannot raise division-by-zero.
///
/// # Errors
/// Fails on an empty expression, malformed syntax, or live division or
/// modulo by zero.
pub(crate) fn eval_const_expr(
    tokens: &[Token],
    anchor: &Token,
    diag: &Diagnostics,
) -> Result<i64, PreproError> {
    let significant: Vec<&Token> = tokens.iter().filter(|t| t.kind != TokenKind::Eof).collect();
    if significant.is_empty() {
        return Err(diag.error(ErrorKind::EmptyExpression, anchor));
    }
    let mut parser = ExprParser {
        tokens: &significant,
        pos: 0,
        live: true,
        anchor,
        diag,
    };
    let value = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        diag.warn(anchor, "extra tokens after constant expression");
    }
    Ok(value)
}

/// Recursive-descent evaluator over the C integer constant-expression
/// grammar, highest binding last: `||`, `&&`, `|`, `^`, `&`, equality,
/// relational, shifts, additive, multiplicative, unary, primary.
struct ExprParser<'a> {
    tokens: &'a [&'a Token],
    pos: usize,
    live: bool,
    anchor: &'a Token,
    diag: &'a Diagnostics,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).copied()
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(punct)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn parse_or(&mut self) -> Result<i64, PreproError> {
        let mut lhs = self.parse_and()?;
        while self.eat("||") {
            let saved = self.live;
            if lhs != 0 {
                self.live = false;
            }
            let rhs = self.parse_and()?;
            self.live = saved;
            lhs = i64::from(lhs != 0 || rhs != 0);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<i64, PreproError> {
        let mut lhs = self.parse_bit_or()?;
        while self.eat("&&") {
            let saved = self.live;
            if lhs == 0 {
                self.live = false;
            }
            let rhs = self.parse_bit_or()?;
            self.live = saved;
            lhs = i64::from(lhs != 0 && rhs != 0);
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> Result<i64, PreproError> {
        let mut lhs = self.parse_bit_xor()?;
        while self.eat("|") {
            lhs |= self.parse_bit_xor()?;
        }
        Ok(lhs)
    }

    fn parse_bit_xor(&mut self) -> Result<i64, PreproError> {
        let mut lhs = self.parse_bit_and()?;
        while self.eat("^") {
            lhs ^= self.parse_bit_and()?;
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> Result<i64, PreproError> {
        let mut lhs = self.parse_equality()?;
        while self.eat("&") {
            lhs &= self.parse_equality()?;
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<i64, PreproError> {
        let mut lhs = self.parse_relational()?;
        loop {
            if self.eat("==") {
                lhs = i64::from(lhs == self.parse_relational()?);
            } else if self.eat("!=") {
                lhs = i64::from(lhs != self.parse_relational()?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_relational(&mut self) -> Result<i64, PreproError> {
        let mut lhs = self.parse_shift()?;
        loop {
            if self.eat("<=") {
                lhs = i64::from(lhs <= self.parse_shift()?);
            } else if self.eat(">=") {
                lhs = i64::from(lhs >= self.parse_shift()?);
            } else if self.eat("<") {
                lhs = i64::from(lhs < self.parse_shift()?);
            } else if self.eat(">") {
                lhs = i64::from(lhs > self.parse_shift()?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_shift(&mut self) -> Result<i64, PreproError> {
        let mut lhs = self.parse_additive()?;
        loop {
            if self.eat("<<") {
                let rhs = self.parse_additive()?;
                lhs = lhs.wrapping_shl(rhs as u32);
            } else if self.eat(">>") {
                let rhs = self.parse_additive()?;
                lhs = lhs.wrapping_shr(rhs as u32);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_additive(&mut self) -> Result<i64, PreproError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            if self.eat("+") {
                lhs = lhs.wrapping_add(self.parse_multiplicative()?);
            } else if self.eat("-") {
                lhs = lhs.wrapping_sub(self.parse_multiplicative()?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_multiplicative(&mut self) -> Result<i64, PreproError> {
        let mut lhs = self.parse_unary()?;
        loop {
            if self.eat("*") {
                lhs = lhs.wrapping_mul(self.parse_unary()?);
            } else if self.eat("/") {
                let rhs = self.parse_unary()?;
                lhs = self.checked_div(lhs, rhs, false)?;
            } else if self.eat("%") {
                let rhs = self.parse_unary()?;
                lhs = self.checked_div(lhs, rhs, true)?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn checked_div(&self, lhs: i64, rhs: i64, modulo: bool) -> Result<i64, PreproError> {
        if rhs == 0 {
            if self.live {
                return Err(self.diag.error(ErrorKind::DivisionByZero, self.anchor));
            }
            return Ok(0);
        }
        Ok(if modulo {
            lhs.wrapping_rem(rhs)
        } else {
            lhs.wrapping_div(rhs)
        })
    }

    fn parse_unary(&mut self) -> Result<i64, PreproError> {
        if self.eat("!") {
            return Ok(i64::from(self.parse_unary()? == 0));
        }
        if self.eat("-") {
            return Ok(self.parse_unary()?.wrapping_neg());
        }
        if self.eat("+") {
            return self.parse_unary();
        }
        if self.eat("~") {
            return Ok(!self.parse_unary()?);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<i64, PreproError> {
        let Some(tok) = self.peek() else {
            return Err(self.diag.error_with(
                ErrorKind::InvalidToken,
                self.anchor,
                "unexpected end of constant expression",
            ));
        };
        match tok.kind {
            TokenKind::Num | TokenKind::Char => {
                let value = tok.value;
                self.pos += 1;
                Ok(value)
            }
            // Identifiers surviving expansion are undefined macros.
            TokenKind::Ident => {
                self.pos += 1;
                Ok(0)
            }
            TokenKind::Punct if tok.text == "(" => {
                self.pos += 1;
                let value = self.parse_or()?;
                if !self.eat(")") {
                    return Err(self.diag.error_with(
                        ErrorKind::InvalidToken,
                        self.anchor,
                        "expected ')' in constant expression",
                    ));
                }
                Ok(value)
            }
            _ => Err(self.diag.error_with(
                ErrorKind::InvalidToken,
                self.anchor,
                format!("unexpected token \"{}\" in constant expression", tok.text),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::token::FileInfo;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn lex(source: &str) -> Vec<Token> {
        let file = Rc::new(FileInfo::new(PathBuf::from("t.c"), "t.c", 0));
        let diag = Diagnostics::new();
        tokenize(source, &file, &diag).unwrap()
    }

    fn eval(expr: &str) -> Result<i64, PreproError> {
        let toks = lex(expr);
        let anchor = Token::new(TokenKind::Ident, "if");
        let diag = Diagnostics::new();
        eval_const_expr(&toks, &anchor, &diag)
    }

    #[test]
    fn stack_round_trip() {
        let mut stack = ConditionalStack::new();
        let diag = Diagnostics::new();
        let opening = Token::new(TokenKind::Ident, "if");
        assert!(stack.is_empty());

        stack.push(CondEntry {
            context: CondContext::InThen,
            opening: opening.clone(),
            included: true,
        });
        assert_eq!(stack.depth(), 1);
        assert!(stack.finish(&diag).is_err());

        let entry = stack.pop(&opening, &diag).unwrap();
        assert_eq!(entry.context, CondContext::InThen);
        assert!(stack.is_empty());
        assert!(stack.finish(&diag).is_ok());
    }

    #[test]
    fn stray_endif_is_fatal() {
        let mut stack = ConditionalStack::new();
        let diag = Diagnostics::new();
        let tok = Token::new(TokenKind::Ident, "endif");
        let err = stack.pop(&tok, &diag).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StrayConditional);
    }

    #[test]
    fn skip_branch_stops_at_matching_directive() {
        let toks = lex("a b\n#ifdef X\nc\n#endif\nd\n#else\ne");
        let opening = toks[0].clone();
        let diag = Diagnostics::new();
        let stop = skip_branch(&toks, 0, &opening, &diag).unwrap();
        // The nested group is skipped whole; the #else is ours.
        assert!(toks[stop].is_hash());
        assert!(toks[stop + 1].is_ident("else"));
    }

    #[test]
    fn skip_branch_unterminated() {
        let toks = lex("a\n#if 1\nb");
        let opening = toks[0].clone();
        let diag = Diagnostics::new();
        let err = skip_branch(&toks, 0, &opening, &diag).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnterminatedConditional);
    }

    #[test]
    fn defined_both_spellings() {
        let mut table = MacroTable::new();
        table.define(crate::macros::Macro {
            name: "FOO".to_string(),
            kind: crate::macros::MacroKind::Object { body: vec![] },
        });
        let diag = Diagnostics::new();
        let toks = lex("defined FOO && defined(BAR)");
        let out = resolve_defined(&toks, &table, &diag).unwrap();
        let texts: Vec<&str> = out
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(texts, vec!["1", "&&", "0"]);
    }

    #[test]
    fn malformed_defined_is_fatal() {
        let table = MacroTable::new();
        let diag = Diagnostics::new();
        let toks = lex("defined(FOO");
        let err = resolve_defined(&toks, &table, &diag).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToken);
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), 7);
        assert_eq!(eval("(1 + 2) * 3").unwrap(), 9);
        assert_eq!(eval("10 - 4 - 3").unwrap(), 3);
        assert_eq!(eval("7 / 2").unwrap(), 3);
        assert_eq!(eval("7 % 2").unwrap(), 1);
    }

    #[test]
    fn bitwise_and_shift() {
        assert_eq!(eval("1 << 4").unwrap(), 16);
        assert_eq!(eval("256 >> 4").unwrap(), 16);
        assert_eq!(eval("5 & 3").unwrap(), 1);
        assert_eq!(eval("5 | 3").unwrap(), 7);
        assert_eq!(eval("5 ^ 3").unwrap(), 6);
        assert_eq!(eval("1 | 2 == 2").unwrap(), 1 | i64::from(2 == 2));
    }

    #[test]
    fn comparison_and_logic() {
        assert_eq!(eval("3 < 4 && 4 <= 4 && 5 > 4 && 5 >= 5").unwrap(), 1);
        assert_eq!(eval("1 == 1 && 1 != 2").unwrap(), 1);
        assert_eq!(eval("0 || 2").unwrap(), 1);
        assert_eq!(eval("!0 && !!7").unwrap(), 1);
        assert_eq!(eval("~0").unwrap(), -1);
        assert_eq!(eval("-(-5)").unwrap(), 5);
    }

    #[test]
    fn undefined_identifiers_are_zero() {
        assert_eq!(eval("NOT_DEFINED").unwrap(), 0);
        assert_eq!(eval("NOT_DEFINED + 1").unwrap(), 1);
    }

    #[test]
    fn char_literals_evaluate() {
        assert_eq!(eval("'A'").unwrap(), 65);
        assert_eq!(eval("'A' == 65").unwrap(), 1);
    }

    #[test]
    fn division_by_zero_is_fatal() {
        assert_eq!(eval("1 / 0").unwrap_err().kind(), ErrorKind::DivisionByZero);
        assert_eq!(eval("1 % 0").unwrap_err().kind(), ErrorKind::DivisionByZero);
    }

    #[test]
    fn short_circuit_suppresses_division_by_zero() {
        assert_eq!(eval("0 && 1 / 0").unwrap(), 0);
        assert_eq!(eval("1 || 1 / 0").unwrap(), 1);
        // The same operand is fatal when it is live.
        assert!(eval("1 && 1 / 0").is_err());
    }

    #[test]
    fn empty_expression_is_fatal() {
        assert_eq!(eval("").unwrap_err().kind(), ErrorKind::EmptyExpression);
    }
}
