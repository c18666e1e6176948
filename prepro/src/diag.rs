//! Diagnostics reporting.
//!
//! Fatal errors print one `[ERROR] [<file>:<line>]: <msg>` line through the
//! `log` facade and come back as a [`PreproError`] the caller propagates.
//! Warnings print and continue. The per-kind message table can be overridden
//! at runtime and is safe to share across threads.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{PoisonError, RwLock};

use crate::error::{ErrorKind, PreproError};
use crate::token::Token;

/// Diagnostic reporter with a registrable message table.
///
/// Handed around as an `Arc<Diagnostics>`; every subsystem that can raise a
/// diagnostic receives a handle instead of reaching for a global.
#[derive(Debug, Default)]
pub struct Diagnostics {
    overrides: RwLock<HashMap<ErrorKind, String>>,
}

impl Diagnostics {
    /// A reporter with only the default messages.
    #[must_use]
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Replace the message used for `kind`.
    pub fn register(&self, kind: ErrorKind, message: impl Into<String>) {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, message.into());
    }

    /// The registered message for `kind`, or its default.
    #[must_use]
    pub fn message_for(&self, kind: ErrorKind) -> String {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_message().to_string())
    }

    /// Raise a fatal diagnostic at `tok` with the table message for `kind`.
    #[must_use]
    pub fn error(&self, kind: ErrorKind, tok: &Token) -> PreproError {
        self.error_at(kind, &tok.loc(), self.message_for(kind))
    }

    /// Raise a fatal diagnostic at `tok`, appending `detail` to the message.
    #[must_use]
    pub fn error_with(&self, kind: ErrorKind, tok: &Token, detail: impl Display) -> PreproError {
        self.error_at(kind, &tok.loc(), format!("{}: {detail}", self.message_for(kind)))
    }

    /// Raise a fatal diagnostic at an explicit `file:line` location.
    #[must_use]
    pub fn error_at(&self, kind: ErrorKind, location: &str, message: String) -> PreproError {
        log::error!("[ERROR] [{location}]: {message}");
        PreproError::Fatal {
            kind,
            location: location.to_string(),
            message,
        }
    }

    /// Report a non-fatal warning at `tok`.
    pub fn warn(&self, tok: &Token, message: impl Display) {
        self.warn_at(&tok.loc(), message);
    }

    /// Report a non-fatal warning at an explicit `file:line` location.
    pub fn warn_at(&self, location: &str, message: impl Display) {
        log::warn!("[WARNING] [{location}]: {message}");
    }
}
