//! Include resolution: search paths, `#include_next`, `#pragma once`, and
//! the include-guard heuristic.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use crate::cache::LruCache;
use crate::diag::Diagnostics;
use crate::error::{ErrorKind, PreproError};
use crate::macros::MacroTable;
use crate::token::{Token, TokenKind};

/// Filesystem access seam, so tests can preprocess virtual file trees.
pub trait FileLoader {
    /// Whether `path` names a readable file.
    fn exists(&self, path: &Path) -> bool;
    /// Resolve `path` to its canonical form.
    ///
    /// # Errors
    /// Propagates the underlying I/O failure.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
    /// Read the file's contents.
    ///
    /// # Errors
    /// Propagates the underlying I/O failure.
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// The real filesystem.
#[derive(Debug, Default)]
pub struct DiskLoader;

impl FileLoader for DiskLoader {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// An in-memory file tree for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryLoader {
    files: HashMap<PathBuf, String>,
}

#[cfg(test)]
impl MemoryLoader {
    pub(crate) fn new() -> Self {
        MemoryLoader::default()
    }

    pub(crate) fn add(&mut self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files.insert(path.into(), contents.into());
    }
}

#[cfg(test)]
impl FileLoader for MemoryLoader {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        if self.files.contains_key(path) {
            Ok(path.to_path_buf())
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such file"))
        }
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
}

/// How the include target was written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IncludeTarget {
    /// `#include "name"`: the including file's directory is searched first.
    Quoted(String),
    /// `#include <name>`: only the configured paths are searched.
    Angled(String),
    /// `#include FOO`: the tokens must be macro-expanded and re-parsed.
    Expand(Vec<Token>),
}

/// Parse the tokens after `#include` into a target. Also returns the number
/// of line tokens the target consumed, so the caller can warn about
/// trailing junk.
///
/// # Errors
/// Fails when the target is missing or an angle-bracket form never closes
/// on its line.
pub(crate) fn parse_target(
    line: &[Token],
    directive: &Token,
    diag: &Diagnostics,
) -> Result<(IncludeTarget, usize), PreproError> {
    match line.first() {
        None => Err(diag.error_with(
            ErrorKind::UnterminatedInclude,
            directive,
            "missing include target",
        )),
        Some(tok) if tok.kind == TokenKind::Str => {
            Ok((IncludeTarget::Quoted(tok.string_value.clone()), 1))
        }
        Some(tok) if tok.is_punct("<") => {
            let mut name = String::new();
            for (i, part) in line[1..].iter().enumerate() {
                if part.is_punct(">") {
                    return Ok((IncludeTarget::Angled(name), i + 2));
                }
                name.push_str(&part.text);
            }
            Err(diag.error(ErrorKind::UnterminatedInclude, directive))
        }
        Some(_) => Ok((IncludeTarget::Expand(line.to_vec()), line.len())),
    }
}

/// Scan a freshly lexed file for the classic include-guard shape: it must
/// open with `#ifndef NAME` / `#define NAME` and carry an `#endif` within
/// the last 20 tokens. Returns the guard macro name.
pub(crate) fn detect_guard(tokens: &[Token]) -> Option<String> {
    let opens_with_guard = tokens.len() >= 6
        && tokens[0].is_hash()
        && tokens[0].at_bol
        && tokens[1].is_ident("ifndef")
        && tokens[2].kind == TokenKind::Ident
        && tokens[3].is_hash()
        && tokens[3].at_bol
        && tokens[4].is_ident("define")
        && tokens[5].text == tokens[2].text;
    if !opens_with_guard {
        return None;
    }
    let tail_start = tokens.len().saturating_sub(20);
    let closes = tokens[tail_start..]
        .windows(2)
        .any(|w| w[0].is_hash() && w[0].at_bol && w[1].is_ident("endif"));
    closes.then(|| tokens[2].text.clone())
}

/// Search-path state and re-include suppression.
pub struct IncludeManager {
    paths: Vec<PathBuf>,
    /// Where the next `#include_next` resumes searching.
    next_cursor: usize,
    pragma_once: HashSet<PathBuf>,
    include_guards: HashMap<PathBuf, String>,
    search_cache: LruCache<String, PathBuf>,
    loader: Box<dyn FileLoader>,
}

impl IncludeManager {
    /// A manager over `loader` with an empty search path.
    #[must_use]
    pub fn new(loader: Box<dyn FileLoader>) -> Self {
        IncludeManager {
            paths: Vec::new(),
            next_cursor: 0,
            pragma_once: HashSet::new(),
            include_guards: HashMap::new(),
            search_cache: LruCache::with_capacity(64),
            loader,
        }
    }

    /// Replace the search paths. Resets the `#include_next` cursor and
    /// drops cached search results.
    pub fn set_paths(&mut self, paths: Vec<PathBuf>) {
        self.paths = paths;
        self.next_cursor = 0;
        self.search_cache.clear();
    }

    /// Append one search path.
    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
        self.search_cache.clear();
    }

    /// Resolve an include target to a canonical path. Quoted includes pass
    /// the including file's directory as `current_dir`; it is searched
    /// before the configured paths.
    ///
    /// # Errors
    /// Fails when no candidate exists.
    pub fn resolve(
        &self,
        name: &str,
        current_dir: Option<&Path>,
        anchor: &Token,
        diag: &Diagnostics,
    ) -> Result<PathBuf, PreproError> {
        let key = format!(
            "{}\u{1}{name}",
            current_dir.map(|d| d.display().to_string()).unwrap_or_default()
        );
        if let Some(hit) = self.search_cache.get(&key) {
            return Ok(hit);
        }
        let dirs = current_dir.into_iter().chain(self.paths.iter().map(PathBuf::as_path));
        for dir in dirs {
            let candidate = dir.join(name);
            if self.loader.exists(&candidate) {
                let canonical = self.loader.canonicalize(&candidate)?;
                self.search_cache.put(key, canonical.clone());
                return Ok(canonical);
            }
        }
        Err(diag.error_with(ErrorKind::IncludeNotFound, anchor, name))
    }

    /// Resolve a `#include_next` target, resuming the search after the
    /// path that satisfied the previous one.
    ///
    /// # Errors
    /// Fails when no remaining path has the file.
    pub fn resolve_next(
        &mut self,
        name: &str,
        anchor: &Token,
        diag: &Diagnostics,
    ) -> Result<PathBuf, PreproError> {
        for (offset, dir) in self.paths[self.next_cursor.min(self.paths.len())..]
            .iter()
            .enumerate()
        {
            let candidate = dir.join(name);
            if self.loader.exists(&candidate) {
                self.next_cursor += offset + 1;
                return Ok(self.loader.canonicalize(&candidate)?);
            }
        }
        Err(diag.error_with(ErrorKind::IncludeNotFound, anchor, name))
    }

    /// Record that `path` used `#pragma once`; false when already recorded.
    pub fn mark_pragma_once(&mut self, path: PathBuf) -> bool {
        self.pragma_once.insert(path)
    }

    /// Remember the guard macro detected in `path`.
    pub fn register_guard(&mut self, path: PathBuf, guard: String) {
        self.include_guards.insert(path, guard);
    }

    /// Whether re-including `path` would be a no-op: it used
    /// `#pragma once`, or its include guard is currently defined.
    #[must_use]
    pub fn should_skip(&self, path: &Path, table: &MacroTable) -> bool {
        if self.pragma_once.contains(path) {
            return true;
        }
        self.include_guards
            .get(path)
            .is_some_and(|guard| table.is_defined(guard))
    }

    /// Read a resolved file's contents.
    ///
    /// # Errors
    /// Propagates the loader's I/O failure.
    pub fn read(&self, path: &Path) -> Result<String, PreproError> {
        Ok(self.loader.read(path)?)
    }

    /// Canonicalize leniently: the path itself when the loader cannot.
    #[must_use]
    pub fn canonicalize(&self, path: &Path) -> PathBuf {
        self.loader
            .canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
