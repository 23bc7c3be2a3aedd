//! Identity errors.

use thiserror::Error;

/// Errors from building component identities or parsing generated IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier cannot be empty")]
    Empty,

    /// A name segment, label or instance key is not a valid identifier.
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    #[error("component ID must have at least one name segment")]
    MissingName,

    /// A string could not be parsed as a generated `{prefix}_{ulid}` ID.
    #[error("{value:?} is not a valid {prefix} ID: {reason}")]
    Malformed {
        prefix: &'static str,
        value: String,
        reason: String,
    },
}
