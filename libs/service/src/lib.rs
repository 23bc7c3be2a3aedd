//! # conflux-service
//!
//! Process-wide services that live beside the component graph.
//!
//! Services are registered once in an immutable [`ServiceRegistry`], started
//! by the [`ServiceManager`] in dependency order, and stopped in reverse. The
//! [`ServiceHost`] is the only way components and other services reach a
//! service's shared data.

pub mod cluster;
mod error;
mod host;
mod manager;
mod registry;
mod service;

pub use cluster::{ClusterData, ClusterService};
pub use error::{Result, ServiceError};
pub use host::ServiceHost;
pub use manager::{ManagerOptions, ServiceManager, ServiceState};
pub use registry::{ServiceRegistry, ServiceRegistryBuilder};
pub use service::{Service, ServiceContext, ServiceData, ServiceDefinition};
