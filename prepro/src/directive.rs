//! Directive recognition and handling.
//!
//! A `#` that begins a logical line introduces a directive. The name maps
//! to a closed [`Directive`] enum; unknown names are fatal, while a bare
//! `#` (the null directive) is silently dropped. Each handler consumes its
//! directive line by splicing it out of the stream, leaving the cursor at
//! the continuation point.

use crate::conditional::{
    eval_const_expr, resolve_defined, skip_branch, CondContext, CondEntry,
};
use crate::error::{ErrorKind, PreproError};
use crate::include::{detect_guard, parse_target, IncludeTarget};
use crate::lexer::tokenize;
use crate::macros::{Macro, MacroKind};
use crate::preprocessor::Preprocessor;
use crate::token::{Token, TokenKind};

/// The directives the dispatcher understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    /// `#include`
    Include,
    /// `#include_next`
    IncludeNext,
    /// `#define`
    Define,
    /// `#undef`
    Undef,
    /// `#if`
    If,
    /// `#ifdef`
    Ifdef,
    /// `#ifndef`
    Ifndef,
    /// `#elif`
    Elif,
    /// `#else`
    Else,
    /// `#endif`
    Endif,
    /// `#pragma`
    Pragma,
    /// `#error`
    Error,
    /// `#warning`
    Warning,
    /// `#line`
    Line,
}

impl Directive {
    /// Map a directive name to its handler tag.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Directive> {
        match name {
            "include" => Some(Directive::Include),
            "include_next" => Some(Directive::IncludeNext),
            "define" => Some(Directive::Define),
            "undef" => Some(Directive::Undef),
            "if" => Some(Directive::If),
            "ifdef" => Some(Directive::Ifdef),
            "ifndef" => Some(Directive::Ifndef),
            "elif" => Some(Directive::Elif),
            "else" => Some(Directive::Else),
            "endif" => Some(Directive::Endif),
            "pragma" => Some(Directive::Pragma),
            "error" => Some(Directive::Error),
            "warning" => Some(Directive::Warning),
            "line" => Some(Directive::Line),
            _ => None,
        }
    }
}

/// Join a directive line's raw text for `#error`/`#warning` messages.
fn line_text(line: &[Token]) -> String {
    let mut out = String::new();
    for tok in line {
        if tok.has_space && !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&tok.text);
    }
    out
}

impl Preprocessor {
    /// Handle the directive whose `#` sits at the cursor.
    pub(crate) fn handle_directive(&mut self) -> Result<(), PreproError> {
        let hash = self.pos;
        let name_tok = match self.tokens.get(hash + 1) {
            Some(t) if t.kind != TokenKind::Eof && !t.at_bol => t.clone(),
            // Null directive: a lone `#` on its line.
            _ => {
                self.splice(hash..hash + 1, Vec::new());
                return Ok(());
            }
        };
        if name_tok.kind != TokenKind::Ident {
            return Err(self.diag.error_with(
                ErrorKind::UnknownDirective,
                &name_tok,
                format!("#{}", name_tok.text),
            ));
        }
        let Some(directive) = Directive::from_name(&name_tok.text) else {
            return Err(self.diag.error_with(
                ErrorKind::UnknownDirective,
                &name_tok,
                format!("#{}", name_tok.text),
            ));
        };

        let line_end = self.line_end(hash + 1);
        let line: Vec<Token> = self.tokens[hash + 2..line_end].to_vec();

        match directive {
            Directive::Include => self.handle_include(hash, line_end, &name_tok, &line, false),
            Directive::IncludeNext => self.handle_include(hash, line_end, &name_tok, &line, true),
            Directive::Define => self.handle_define(hash, line_end, &name_tok, &line),
            Directive::Undef => self.handle_undef(hash, line_end, &name_tok, &line),
            Directive::If => self.handle_if(hash, line_end, &name_tok, &line),
            Directive::Ifdef => self.handle_ifdef(hash, line_end, &name_tok, &line, false),
            Directive::Ifndef => self.handle_ifdef(hash, line_end, &name_tok, &line, true),
            Directive::Elif => self.handle_elif(hash, line_end, &name_tok, &line),
            Directive::Else => self.handle_else(hash, line_end, &name_tok, &line),
            Directive::Endif => self.handle_endif(hash, line_end, &name_tok, &line),
            Directive::Pragma => self.handle_pragma(hash, line_end, &name_tok, &line),
            Directive::Error => self.handle_error(&name_tok, &line),
            Directive::Warning => self.handle_warning(hash, line_end, &name_tok, &line),
            Directive::Line => self.handle_line(hash, line_end, &name_tok, &line),
        }
    }

    fn warn_extra(&self, after: usize, line: &[Token], name_tok: &Token) {
        if line.len() > after {
            self.diag.warn(
                name_tok,
                format!("extra tokens after #{} directive", name_tok.text),
            );
        }
    }

    fn handle_define(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
    ) -> Result<(), PreproError> {
        let Some(macro_name) = line.first().filter(|t| t.kind == TokenKind::Ident) else {
            return Err(self.diag.error_with(
                ErrorKind::InvalidToken,
                name_tok,
                "macro name missing after #define",
            ));
        };

        let function_like = line
            .get(1)
            .is_some_and(|t| t.is_punct("(") && !t.has_space);
        let mac = if function_like {
            let (params, va_name, body_start) = parse_params(line, macro_name, &self.diag)?;
            let body = clean_body(&line[body_start..]);
            Macro {
                name: macro_name.text.clone(),
                kind: MacroKind::Function {
                    params,
                    va_name,
                    body,
                },
            }
        } else {
            Macro {
                name: macro_name.text.clone(),
                kind: MacroKind::Object {
                    body: clean_body(&line[1..]),
                },
            }
        };

        if self.macros.define(mac).is_some() {
            self.diag
                .warn(macro_name, format!("\"{}\" redefined", macro_name.text));
        }
        self.splice(hash..line_end, Vec::new());
        Ok(())
    }

    fn handle_undef(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
    ) -> Result<(), PreproError> {
        let Some(macro_name) = line.first().filter(|t| t.kind == TokenKind::Ident) else {
            return Err(self.diag.error_with(
                ErrorKind::InvalidToken,
                name_tok,
                "macro name missing after #undef",
            ));
        };
        self.warn_extra(1, line, name_tok);
        if !self.macros.undefine(&macro_name.text) {
            self.diag.warn(
                macro_name,
                format!(
                    "{}: \"{}\"",
                    self.diag.message_for(ErrorKind::MacroNotFound),
                    macro_name.text
                ),
            );
        }
        self.splice(hash..line_end, Vec::new());
        Ok(())
    }

    fn eval_condition(&self, line: &[Token], name_tok: &Token) -> Result<bool, PreproError> {
        if line.is_empty() {
            return Err(self.diag.error(ErrorKind::EmptyExpression, name_tok));
        }
        let resolved = resolve_defined(line, &self.macros, &self.diag)?;
        let expanded = self.expand_sequence(resolved)?;
        Ok(eval_const_expr(&expanded, name_tok, &self.diag)? != 0)
    }

    /// Drop the directive line and, when the branch is dead, everything up
    /// to the `#elif`/`#else`/`#endif` that ends it. The terminator itself
    /// stays for the dispatcher.
    fn take_branch(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        included: bool,
    ) -> Result<(), PreproError> {
        if included {
            self.splice(hash..line_end, Vec::new());
        } else {
            let stop = skip_branch(&self.tokens, line_end, name_tok, &self.diag)?;
            self.splice(hash..stop, Vec::new());
        }
        Ok(())
    }

    fn handle_if(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
    ) -> Result<(), PreproError> {
        let included = self.eval_condition(line, name_tok)?;
        self.conditionals.push(CondEntry {
            context: CondContext::InThen,
            opening: name_tok.clone(),
            included,
        });
        self.take_branch(hash, line_end, name_tok, included)
    }

    fn handle_ifdef(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
        negate: bool,
    ) -> Result<(), PreproError> {
        let Some(macro_name) = line.first().filter(|t| t.kind == TokenKind::Ident) else {
            return Err(self.diag.error_with(
                ErrorKind::InvalidToken,
                name_tok,
                format!("macro name missing after #{}", name_tok.text),
            ));
        };
        self.warn_extra(1, line, name_tok);
        let included = self.macros.is_defined(&macro_name.text) != negate;
        self.conditionals.push(CondEntry {
            context: CondContext::InThen,
            opening: name_tok.clone(),
            included,
        });
        self.take_branch(hash, line_end, name_tok, included)
    }

    fn handle_elif(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
    ) -> Result<(), PreproError> {
        let already_included = {
            let entry = self.conditionals.top_mut(name_tok, &self.diag)?;
            if entry.context == CondContext::InElse {
                return Err(self.diag.error_with(
                    ErrorKind::StrayConditional,
                    name_tok,
                    "#elif after #else",
                ));
            }
            entry.context = CondContext::InElif;
            entry.included
        };
        if already_included {
            // A branch was taken; this one is dead without evaluation.
            return self.take_branch(hash, line_end, name_tok, false);
        }
        let included = self.eval_condition(line, name_tok)?;
        if included {
            self.conditionals.top_mut(name_tok, &self.diag)?.included = true;
        }
        self.take_branch(hash, line_end, name_tok, included)
    }

    fn handle_else(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
    ) -> Result<(), PreproError> {
        self.warn_extra(0, line, name_tok);
        let already_included = {
            let entry = self.conditionals.top_mut(name_tok, &self.diag)?;
            if entry.context == CondContext::InElse {
                return Err(self.diag.error_with(
                    ErrorKind::StrayConditional,
                    name_tok,
                    "duplicate #else",
                ));
            }
            entry.context = CondContext::InElse;
            entry.included
        };
        if !already_included {
            self.conditionals.top_mut(name_tok, &self.diag)?.included = true;
        }
        self.take_branch(hash, line_end, name_tok, !already_included)
    }

    fn handle_endif(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
    ) -> Result<(), PreproError> {
        self.warn_extra(0, line, name_tok);
        self.conditionals.pop(name_tok, &self.diag)?;
        self.splice(hash..line_end, Vec::new());
        Ok(())
    }

    fn handle_pragma(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
    ) -> Result<(), PreproError> {
        if line.first().is_some_and(|t| t.is_ident("once")) {
            self.warn_extra(1, line, name_tok);
            let path = name_tok
                .file
                .as_ref()
                .map(|f| f.name.clone())
                .unwrap_or_default();
            self.includes.mark_pragma_once(path);
        } else {
            self.diag
                .warn(name_tok, format!("ignoring #pragma {}", line_text(line)));
        }
        self.splice(hash..line_end, Vec::new());
        Ok(())
    }

    fn handle_error(&self, name_tok: &Token, line: &[Token]) -> Result<(), PreproError> {
        Err(self
            .diag
            .error_with(ErrorKind::UserError, name_tok, line_text(line)))
    }

    fn handle_warning(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
    ) -> Result<(), PreproError> {
        self.diag.warn(name_tok, format!("#warning {}", line_text(line)));
        self.splice(hash..line_end, Vec::new());
        Ok(())
    }

    fn handle_line(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
    ) -> Result<(), PreproError> {
        match line.first() {
            Some(num) if num.kind == TokenKind::Num => {
                if let Some(file) = &name_tok.file {
                    // The next physical line must report as `num.value`.
                    file.line_offset.set(num.value - (name_tok.line as i64 + 1));
                }
                match line.get(1) {
                    None => {}
                    Some(t) if t.kind == TokenKind::Str => {
                        self.diag
                            .warn(name_tok, "#line filename argument is ignored");
                    }
                    Some(_) => self.warn_extra(1, line, name_tok),
                }
            }
            _ => self
                .diag
                .warn(name_tok, "#line expects a line number; directive ignored"),
        }
        self.splice(hash..line_end, Vec::new());
        Ok(())
    }

    fn handle_include(
        &mut self,
        hash: usize,
        line_end: usize,
        name_tok: &Token,
        line: &[Token],
        next: bool,
    ) -> Result<(), PreproError> {
        let (mut target, consumed) = parse_target(line, name_tok, &self.diag)?;
        if let IncludeTarget::Expand(tokens) = target {
            let expanded = self.expand_sequence(tokens)?;
            let (retarget, consumed) = parse_target(&expanded, name_tok, &self.diag)?;
            if matches!(retarget, IncludeTarget::Expand(_)) {
                self.diag.warn(
                    name_tok,
                    "include target does not expand to a header name; directive ignored",
                );
                self.splice(hash..line_end, Vec::new());
                return Ok(());
            }
            self.warn_extra(consumed, &expanded, name_tok);
            target = retarget;
        } else {
            self.warn_extra(consumed, line, name_tok);
        }
        let (name, quoted) = match target {
            IncludeTarget::Quoted(name) => (name, true),
            IncludeTarget::Angled(name) => (name, false),
            IncludeTarget::Expand(_) => unreachable!("expanded targets handled above"),
        };

        let path = if next {
            self.includes.resolve_next(&name, name_tok, &self.diag)?
        } else {
            let current_dir = if quoted {
                name_tok
                    .file
                    .as_ref()
                    .and_then(|f| f.name.parent())
                    .map(std::path::Path::to_path_buf)
            } else {
                None
            };
            self.includes
                .resolve(&name, current_dir.as_deref(), name_tok, &self.diag)?
        };

        if self.includes.should_skip(&path, &self.macros) {
            self.splice(hash..line_end, Vec::new());
            return Ok(());
        }
        self.count_include(name_tok)?;

        let source = self.includes.read(&path)?;
        let display = path.display().to_string();
        let file = self.new_file(path.clone(), &display);
        let mut included = tokenize(&source, &file, &self.diag)?;
        if let Some(guard) = detect_guard(&included) {
            self.includes.register_guard(path, guard);
        }
        if included.last().is_some_and(|t| t.kind == TokenKind::Eof) {
            included.pop();
        }
        self.splice(hash..line_end, included);
        Ok(())
    }
}

/// Parse a function-like macro's parameter list. `line[1]` is the `(`.
/// Returns the parameters, the variadic name, and the body start index.
fn parse_params(
    line: &[Token],
    macro_name: &Token,
    diag: &crate::diag::Diagnostics,
) -> Result<(Vec<String>, Option<String>, usize), PreproError> {
    let malformed = |detail: &str| -> PreproError {
        diag.error_with(
            ErrorKind::MalformedParameterList,
            macro_name,
            format!("in macro \"{}\": {detail}", macro_name.text),
        )
    };

    let mut params: Vec<String> = Vec::new();
    let mut va_name: Option<String> = None;
    let mut i = 2;
    // Empty parameter list.
    if line.get(i).is_some_and(|t| t.is_punct(")")) {
        return Ok((params, va_name, i + 1));
    }
    loop {
        let Some(tok) = line.get(i) else {
            return Err(malformed("unterminated parameter list"));
        };
        if tok.is_punct("...") {
            va_name = Some("__VA_ARGS__".to_string());
            i += 1;
        } else if tok.kind == TokenKind::Ident {
            if line.get(i + 1).is_some_and(|t| t.is_punct("...")) {
                // GNU named variadic parameter: `args...`.
                va_name = Some(tok.text.clone());
                i += 2;
            } else {
                if params.iter().any(|p| p == &tok.text) {
                    return Err(malformed(&format!("duplicate parameter \"{}\"", tok.text)));
                }
                params.push(tok.text.clone());
                i += 1;
            }
        } else {
            return Err(malformed(&format!("unexpected token \"{}\"", tok.text)));
        }

        match line.get(i) {
            Some(t) if t.is_punct(")") => return Ok((params, va_name, i + 1)),
            Some(t) if t.is_punct(",") => {
                if va_name.is_some() {
                    return Err(malformed("parameters after \"...\""));
                }
                i += 1;
            }
            _ => return Err(malformed("expected ',' or ')'")),
        }
    }
}

/// Normalize a macro body slice: fresh copies with line-start flags
/// cleared, since the body will be spliced mid-line.
fn clean_body(body: &[Token]) -> Vec<Token> {
    let mut out = body.to_vec();
    for tok in &mut out {
        tok.at_bol = false;
    }
    out
}
