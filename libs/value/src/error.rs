//! Error types for value decoding and expression evaluation.

use thiserror::Error;

/// Errors produced while evaluating expressions or decoding values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The first identifier of a reference is not in scope.
    #[error("identifier {0:?} does not exist")]
    UnknownIdentifier(String),

    /// A reference walked into an object that lacks the requested key.
    #[error("{path} does not have a field named {key:?}")]
    MissingKey { path: String, key: String },

    /// A value had a different type than required.
    #[error("{path}: expected {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A call expression's callee is not a function.
    #[error("{0} is not a function")]
    NotCallable(String),

    /// A function returned an error.
    #[error("call to {function} failed: {message}")]
    Call { function: String, message: String },

    /// The JSON encoding of a block tree or expression is malformed.
    #[error("invalid syntax: {0}")]
    InvalidSyntax(String),
}

impl ValueError {
    /// Shorthand for a type mismatch at `path`.
    pub fn type_mismatch(path: impl Into<String>, expected: &'static str, actual: &'static str) -> Self {
        Self::TypeMismatch {
            path: path.into(),
            expected,
            actual,
        }
    }
}

impl From<serde_json::Error> for ValueError {
    fn from(err: serde_json::Error) -> Self {
        ValueError::InvalidSyntax(err.to_string())
    }
}
