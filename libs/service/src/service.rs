//! The service trait and its run context.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use conflux_value::Value;
use tokio::sync::watch;

use crate::{Result, ServiceHost};

/// Data a running service shares through the [`ServiceHost`].
pub type ServiceData = Arc<dyn Any + Send + Sync>;

/// Static description of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Unique service name.
    pub name: String,

    /// Services that must be running before this one starts.
    pub depends_on: Vec<String>,

    /// Name of the configuration block routed to this service, if any.
    pub config_type: Option<String>,
}

impl ServiceDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            depends_on: Vec::new(),
            config_type: None,
        }
    }

    #[must_use]
    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.depends_on = names.iter().map(|n| n.to_string()).collect();
        self
    }

    #[must_use]
    pub fn config_type(mut self, block_name: &str) -> Self {
        self.config_type = Some(block_name.to_string());
        self
    }
}

/// A process-wide service.
///
/// `run` is invoked once, after every dependency is running, and should return
/// when the context's shutdown signal fires. `update` may be called
/// concurrently with `run`.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    fn definition(&self) -> ServiceDefinition;

    async fn run(&self, ctx: ServiceContext) -> Result<()>;

    /// Applies the evaluated body of the service's configuration block.
    async fn update(&self, config: Value) -> Result<()>;

    /// Data shared with components and other services.
    fn data(&self) -> Option<ServiceData> {
        None
    }
}

/// Context passed to [`Service::run`].
pub struct ServiceContext {
    /// Name of the running service.
    pub name: String,

    /// Shutdown signal receiver.
    pub shutdown: watch::Receiver<bool>,

    /// Access to other services' data.
    pub host: ServiceHost,
}

impl ServiceContext {
    /// Check if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Waits until shutdown is signaled or the manager goes away.
    pub async fn cancelled(&mut self) {
        let _ = self.shutdown.wait_for(|stop| *stop).await;
    }
}
