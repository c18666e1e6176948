//! The preprocessor driver: owns the subsystems and the token stream.
//!
//! The stream is one owned `Vec<Token>` with a cursor. Directives and macro
//! calls are spliced over in place and the cursor is left at the start of
//! the replacement, so spliced-in tokens are rescanned on the next
//! iteration. Hidesets keep the rescan from re-expanding a macro inside
//! its own output.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use crate::conditional::ConditionalStack;
use crate::diag::Diagnostics;
use crate::error::{ErrorKind, PreproError};
use crate::include::{DiskLoader, FileLoader, IncludeManager};
use crate::lexer::tokenize;
use crate::macros::{collect_args, Macro, MacroKind, MacroTable};
use crate::token::{render, FileInfo, Token, TokenKind};

/// Hard ceiling on processed `#include`s, against unguarded cycles.
const MAX_INCLUDES: usize = 4096;

/// Configuration applied to a [`Preprocessor`] before processing.
#[derive(Clone, Debug, Default)]
pub struct PreproConfig {
    /// Directories searched for include targets, in order.
    pub include_paths: Vec<PathBuf>,
    /// Object-like macros to predefine, as `(name, body)` pairs.
    pub defines: Vec<(String, String)>,
    /// Macro names to undefine after the predefines are installed.
    pub undefines: Vec<String>,
}

impl PreproConfig {
    /// An empty configuration.
    #[must_use]
    pub fn new() -> Self {
        PreproConfig::default()
    }

    /// Append an include search directory.
    #[must_use]
    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    /// Predefine an object-like macro.
    #[must_use]
    pub fn with_define(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.defines.push((name.into(), body.into()));
        self
    }

    /// Undefine a macro (after predefines, so it can cancel one).
    #[must_use]
    pub fn with_undefine(mut self, name: impl Into<String>) -> Self {
        self.undefines.push(name.into());
        self
    }
}

/// The preprocessor engine.
pub struct Preprocessor {
    pub(crate) macros: MacroTable,
    pub(crate) conditionals: ConditionalStack,
    pub(crate) includes: IncludeManager,
    pub(crate) diag: Arc<Diagnostics>,
    pub(crate) tokens: Vec<Token>,
    pub(crate) pos: usize,
    pub(crate) include_count: usize,
    next_file_id: usize,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Preprocessor::new()
    }
}

impl Preprocessor {
    /// A preprocessor over the real filesystem.
    #[must_use]
    pub fn new() -> Self {
        Preprocessor::with_loader(Box::new(DiskLoader))
    }

    /// A preprocessor resolving includes through `loader`.
    #[must_use]
    pub fn with_loader(loader: Box<dyn FileLoader>) -> Self {
        Preprocessor {
            macros: MacroTable::new(),
            conditionals: ConditionalStack::new(),
            includes: IncludeManager::new(loader),
            diag: Arc::new(Diagnostics::new()),
            tokens: Vec::new(),
            pos: 0,
            include_count: 0,
            next_file_id: 0,
        }
    }

    /// The shared diagnostics reporter.
    #[must_use]
    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        Arc::clone(&self.diag)
    }

    /// The macro table.
    #[must_use]
    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    /// Apply include paths and command-line style defines.
    ///
    /// # Errors
    /// Fails when a predefine's body does not lex.
    pub fn apply_config(&mut self, config: &PreproConfig) -> Result<(), PreproError> {
        self.includes.set_paths(config.include_paths.clone());
        for (name, body) in &config.defines {
            self.define(name, body)?;
        }
        for name in &config.undefines {
            self.macros.undefine(name);
        }
        Ok(())
    }

    /// Define an object-like macro from source text, as `-D NAME=body`
    /// would.
    ///
    /// # Errors
    /// Fails when `body` does not lex.
    pub fn define(&mut self, name: &str, body: &str) -> Result<(), PreproError> {
        let file = self.new_file(PathBuf::from("<command line>"), "<command line>");
        let mut tokens = tokenize(body, &file, &self.diag)?;
        if tokens.last().is_some_and(|t| t.kind == TokenKind::Eof) {
            tokens.pop();
        }
        if let Some(first) = tokens.first_mut() {
            first.at_bol = false;
            first.has_space = false;
        }
        self.macros.define(Macro {
            name: name.to_string(),
            kind: MacroKind::Object { body: tokens },
        });
        Ok(())
    }

    /// Undefine a macro; false when it was not defined.
    pub fn undefine(&mut self, name: &str) -> bool {
        self.macros.undefine(name)
    }

    pub(crate) fn new_file(&mut self, name: PathBuf, display_name: &str) -> Rc<FileInfo> {
        let info = Rc::new(FileInfo::new(name, display_name, self.next_file_id));
        self.next_file_id += 1;
        info
    }

    /// Preprocess `source`, reporting locations under `display_name`.
    ///
    /// # Errors
    /// Any fatal diagnostic or I/O failure aborts processing.
    pub fn process(&mut self, source: &str, display_name: &str) -> Result<String, PreproError> {
        let file = self.new_file(PathBuf::from(display_name), display_name);
        self.tokens = tokenize(source, &file, &self.diag)?;
        self.pos = 0;
        self.run()?;
        self.conditionals.finish(&self.diag)?;
        let output = render(&self.tokens);
        self.tokens = Vec::new();
        Ok(output)
    }

    /// Preprocess the file at `path`.
    ///
    /// # Errors
    /// Any fatal diagnostic or I/O failure aborts processing.
    pub fn process_file(&mut self, path: impl AsRef<Path>) -> Result<String, PreproError> {
        let path = path.as_ref();
        let canonical = self.includes.canonicalize(path);
        let source = self.includes.read(&canonical)?;
        let display = path.display().to_string();
        let file = self.new_file(canonical, &display);
        self.tokens = tokenize(&source, &file, &self.diag)?;
        self.pos = 0;
        self.run()?;
        self.conditionals.finish(&self.diag)?;
        let output = render(&self.tokens);
        self.tokens = Vec::new();
        Ok(output)
    }

    fn run(&mut self) -> Result<(), PreproError> {
        while self.pos < self.tokens.len() {
            let tok = &self.tokens[self.pos];
            if tok.kind == TokenKind::Eof {
                break;
            }
            if tok.is_hash() && tok.at_bol {
                self.handle_directive()?;
                continue;
            }
            if tok.kind == TokenKind::Ident
                && Self::expand_at(&self.macros, &self.diag, &mut self.tokens, self.pos)?
            {
                continue;
            }
            self.pos += 1;
        }
        Ok(())
    }

    /// Try to expand a macro use at `pos` in `tokens`, splicing the
    /// expansion over the consumed range. Returns false when the token is
    /// not an expandable macro use; the cursor is untouched either way, so
    /// a true return means the replacement gets rescanned.
    pub(crate) fn expand_at(
        macros: &MacroTable,
        diag: &Diagnostics,
        tokens: &mut Vec<Token>,
        pos: usize,
    ) -> Result<bool, PreproError> {
        let tok = tokens[pos].clone();
        if tok.kind != TokenKind::Ident || tok.hideset.contains(&tok.text) {
            return Ok(false);
        }
        let Some(mac) = macros.lookup(&tok.text) else {
            return Ok(false);
        };
        match &mac.kind {
            MacroKind::Builtin { handler } => {
                let mut out = handler(&tok);
                mac.tag_output(&tok, &mut out);
                tokens.splice(pos..pos + 1, out);
                Ok(true)
            }
            MacroKind::Object { body } => {
                let out = mac.expand_object(&tok, body);
                tokens.splice(pos..pos + 1, out);
                Ok(true)
            }
            MacroKind::Function {
                params,
                va_name,
                body,
            } => {
                let open = pos + 1;
                // A function-like macro name without `(` is just a name.
                if !tokens.get(open).is_some_and(|t| t.is_punct("(")) {
                    return Ok(false);
                }
                let (mut args, close) =
                    collect_args(tokens, open, params, va_name.as_deref(), &tok, diag)?;
                // Arguments expand before substitution, so a nested call
                // to this same macro resolves before the output is painted
                // with its name.
                for arg in &mut args {
                    arg.expanded = Self::expand_all(macros, diag, arg.tokens.clone())?;
                }
                let out = mac.expand_function(&tok, body, &args, diag)?;
                tokens.splice(pos..close + 1, out);
                Ok(true)
            }
        }
    }

    /// Fully expand an owned token sequence, as `#if` expressions,
    /// macro-form include targets, and macro arguments need.
    pub(crate) fn expand_all(
        macros: &MacroTable,
        diag: &Diagnostics,
        mut tokens: Vec<Token>,
    ) -> Result<Vec<Token>, PreproError> {
        let mut pos = 0;
        while pos < tokens.len() {
            if tokens[pos].kind == TokenKind::Ident
                && Self::expand_at(macros, diag, &mut tokens, pos)?
            {
                continue;
            }
            pos += 1;
        }
        Ok(tokens)
    }

    /// [`Preprocessor::expand_all`] over this instance's table.
    pub(crate) fn expand_sequence(&self, tokens: Vec<Token>) -> Result<Vec<Token>, PreproError> {
        Self::expand_all(&self.macros, &self.diag, tokens)
    }

    /// Index one past the last token of the logical line starting at `from`.
    pub(crate) fn line_end(&self, from: usize) -> usize {
        let mut i = from;
        while i < self.tokens.len() {
            let tok = &self.tokens[i];
            if tok.kind == TokenKind::Eof || tok.at_bol {
                break;
            }
            i += 1;
        }
        i
    }

    pub(crate) fn splice(
        &mut self,
        range: std::ops::Range<usize>,
        replacement: Vec<Token>,
    ) {
        self.tokens.splice(range, replacement);
    }

    /// Count an `#include` against the cycle ceiling.
    pub(crate) fn count_include(&mut self, anchor: &Token) -> Result<(), PreproError> {
        self.include_count += 1;
        if self.include_count > MAX_INCLUDES {
            return Err(self.diag.error(ErrorKind::IncludeDepthExceeded, anchor));
        }
        Ok(())
    }
}
