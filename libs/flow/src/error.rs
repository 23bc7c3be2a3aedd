//! Error types for the component graph.

use std::fmt;

use conflux_id::IdError;
use conflux_value::ValueError;
use thiserror::Error;

/// A problem found while loading configuration. Any occurrence rejects the
/// whole reload.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("block {block:?} has an invalid identifier: {source}")]
    InvalidIdentifier {
        block: String,
        #[source]
        source: IdError,
    },

    #[error("{kind} block requires a label")]
    MissingLabel { kind: String },

    #[error("node {id} is declared more than once")]
    DuplicateNode { id: String },

    #[error("node {id} conflicts with node {other}")]
    ConflictingIdentity { id: String, other: String },

    #[error("attribute {attribute:?} is set more than once in {id}")]
    DuplicateAttribute { id: String, attribute: String },

    #[error("service configuration block {kind:?} is declared more than once")]
    DuplicateService { kind: String },

    #[error("unknown component kind {kind:?}")]
    UnknownKind { kind: String },

    #[error("{kind} blocks are only allowed inside a module")]
    OutsideModule { kind: String },

    #[error("service configuration block {kind:?} is not allowed inside a module")]
    ServiceInModule { kind: String },

    #[error("invalid configuration for service block {kind:?}: {message}")]
    InvalidServiceConfig { kind: String, message: String },

    #[error("{id}: reference {reference} does not resolve to any node")]
    UnresolvedReference { id: String, reference: String },

    #[error("cycle detected between nodes: {}", .nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    #[error("{id}: attribute {attribute:?} expects {expected}, got {actual}")]
    TypeMismatch {
        id: String,
        attribute: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{id}: unknown attribute {attribute:?}")]
    UnknownAttribute { id: String, attribute: String },

    #[error("{id}: module {module:?} does not declare argument {argument:?}")]
    UnknownArgument {
        id: String,
        module: String,
        argument: String,
    },
}

/// All configuration errors found in one reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigErrors(Vec<ConfigError>);

impl ConfigErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: ConfigError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigError> {
        self.0.iter()
    }

    /// Returns `Ok(value)` if no error was collected.
    pub fn into_result<T>(self, value: T) -> Result<T, ConfigErrors> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

impl From<ConfigError> for ConfigErrors {
    fn from(err: ConfigError) -> Self {
        Self(vec![err])
    }
}

impl IntoIterator for ConfigErrors {
    type Item = ConfigError;
    type IntoIter = std::vec::IntoIter<ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Errors returned by component construction, `run` and `update`.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// Arguments could not be decoded.
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] ValueError),

    /// A module's configuration failed to load.
    #[error("module failed to load: {0}")]
    Module(#[from] ConfigErrors),

    /// The component failed.
    #[error("{0}")]
    Failed(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ComponentError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Why one node failed to evaluate.
///
/// Evaluation failures mark the node unhealthy and leave it running with its
/// previous arguments.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("failed to build component: {0}")]
    Build(#[from] ComponentError),

    #[error("missing required argument {0:?}")]
    MissingArgument(String),

    #[error("module definition {0:?} is not available")]
    MissingDefinition(String),
}
