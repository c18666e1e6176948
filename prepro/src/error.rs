//! Error types for the preprocessor.

use thiserror::Error;

/// Classification of every diagnostic the preprocessor can raise.
///
/// Each kind carries a default message; the [`crate::Diagnostics`] table can
/// override the message for a kind at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A macro name was referenced but is not defined.
    MacroNotFound,
    /// `#` in a macro body is not followed by a parameter name.
    MalformedStringize,
    /// `##` appears at either end of a macro body.
    MalformedPaste,
    /// The parameter list of a function-like macro does not parse.
    MalformedParameterList,
    /// A macro call supplied the wrong number of arguments.
    ArgumentMismatch,
    /// A macro call's argument list was never closed.
    UnterminatedCall,
    /// An include target was opened but never closed.
    UnterminatedInclude,
    /// No include search path contains the requested file.
    IncludeNotFound,
    /// Too many `#include` directives were processed; likely a cycle.
    IncludeDepthExceeded,
    /// `#elif`, `#else`, or `#endif` without a matching `#if`.
    StrayConditional,
    /// A conditional block was still open at end of input.
    UnterminatedConditional,
    /// A directive name the dispatcher does not recognize.
    UnknownDirective,
    /// `#if` or `#elif` with no expression tokens.
    EmptyExpression,
    /// Division or modulo by zero in a constant expression.
    DivisionByZero,
    /// The lexer encountered a malformed or stray token.
    InvalidToken,
    /// A `#error` directive was reached.
    UserError,
    /// An underlying I/O failure.
    Io,
}

impl ErrorKind {
    /// The message used when no override is registered for this kind.
    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::MacroNotFound => "macro not found",
            ErrorKind::MalformedStringize => "'#' is not followed by a macro parameter",
            ErrorKind::MalformedPaste => "misplaced '##' operator",
            ErrorKind::MalformedParameterList => "malformed macro parameter list",
            ErrorKind::ArgumentMismatch => "wrong number of macro arguments",
            ErrorKind::UnterminatedCall => "unterminated macro call",
            ErrorKind::UnterminatedInclude => "unterminated include target",
            ErrorKind::IncludeNotFound => "include file not found",
            ErrorKind::IncludeDepthExceeded => "includes nested too deeply",
            ErrorKind::StrayConditional => "conditional directive outside of any #if",
            ErrorKind::UnterminatedConditional => "unterminated conditional directive",
            ErrorKind::UnknownDirective => "unknown preprocessing directive",
            ErrorKind::EmptyExpression => "empty constant expression",
            ErrorKind::DivisionByZero => "division by zero in constant expression",
            ErrorKind::InvalidToken => "invalid token",
            ErrorKind::UserError => "#error",
            ErrorKind::Io => "I/O error",
        }
    }
}

/// Errors that abort preprocessing.
#[derive(Debug, Error)]
pub enum PreproError {
    /// A fatal diagnostic, already formatted with its source location.
    #[error("[ERROR] [{location}]: {message}")]
    Fatal {
        /// Which diagnostic was raised.
        kind: ErrorKind,
        /// `file:line` of the offending token.
        location: String,
        /// Human-readable description.
        message: String,
    },

    /// An I/O failure while reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PreproError {
    /// The [`ErrorKind`] this error carries.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PreproError::Fatal { kind, .. } => *kind,
            PreproError::Io(_) => ErrorKind::Io,
        }
    }
}
