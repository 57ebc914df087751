//! Crate-wide error type.
//!
//! Each pipeline stage either returns its artifact or fails with the matching
//! variant. Only the type checker produces recoverable diagnostics
//! (warnings); those travel alongside the errors so callers can report both.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Unmatched input in the lexer. The message embeds `line:col`.
    Lex(String),
    /// Grammar violation. The message embeds `line:col`.
    Parse(String),
    /// The type checker found errors; warnings collected so far ride along.
    TypeCheck {
        errors: Vec<String>,
        warnings: Vec<String>,
    },
    /// The program exceeds a bytecode limit (8-bit operands).
    Compile(String),
    /// Fatal VM error: undefined variable, bad callee, arity mismatch,
    /// out-of-bounds index, operator type mismatch.
    Runtime(String),
    /// A bytecode artifact failed to decode.
    Decode(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Lex(msg) => write!(f, "lex error: {msg}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::TypeCheck { errors, .. } => {
                write!(f, "type check failed with {} error(s)", errors.len())
            }
            Error::Compile(msg) => write!(f, "compile error: {msg}"),
            Error::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Error::Decode(msg) => write!(f, "decode error: {msg}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}
