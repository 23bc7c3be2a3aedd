use thiserror::Error;

/// Errors raised by services and the service manager.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Two services were registered under the same name.
    #[error("service {0:?} registered twice")]
    Duplicate(String),

    /// A service depends on a service that is not registered.
    #[error("service {service:?} depends on unknown service {dependency:?}")]
    UnknownDependency { service: String, dependency: String },

    /// The dependency graph between services has a cycle.
    #[error("service dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// No service is registered under the name.
    #[error("service {0:?} not found")]
    NotFound(String),

    /// The service exists but does not expose data.
    #[error("service {0:?} does not expose data")]
    NoData(String),

    /// Configuration passed to `update` was rejected.
    #[error("invalid configuration for service {service:?}: {message}")]
    InvalidConfig { service: String, message: String },

    /// A service's run loop returned an error.
    #[error("service {service:?} failed: {source}")]
    Failed {
        service: String,
        #[source]
        source: Box<ServiceError>,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
