//! The component capability trait and the component registry.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use conflux_id::{ComponentId, NodePath};
use conflux_service::ServiceHost;
use conflux_value::Value;
use tokio::sync::watch;

use crate::node::{Node, UpdateQueue};
use crate::{ComponentError, Health};

/// A long-running worker managed by a graph node.
///
/// `run` is invoked once for the node's lifetime and should return when the
/// context's shutdown signal fires. `update` is invoked with the newest
/// arguments whenever they change and may run concurrently with `run`.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    async fn run(&self, ctx: RunContext) -> Result<(), ComponentError>;

    async fn update(&self, args: Value) -> Result<(), ComponentError>;

    /// Health reported by the component itself, if it tracks one.
    fn current_health(&self) -> Option<Health> {
        None
    }
}

/// Context passed to [`Component::run`].
#[derive(Clone)]
pub struct RunContext {
    /// Shutdown signal receiver.
    pub shutdown: watch::Receiver<bool>,
}

impl RunContext {
    /// Check if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Waits until the node is cancelled.
    pub async fn cancelled(&mut self) {
        let _ = self.shutdown.wait_for(|stop| *stop).await;
    }
}

/// Everything a component receives at construction.
#[derive(Clone)]
pub struct ComponentOptions {
    /// Controller-local identity.
    pub id: ComponentId,

    /// Globally unique path including module qualifiers.
    pub path: NodePath,

    /// Directory the component may use for persistent state.
    pub data_path: PathBuf,

    /// Publishes the component's exports.
    pub exports: ExportsHandle,

    /// Access to service data.
    pub host: ServiceHost,
}

/// Publishes exports of one node.
///
/// Publishing a value deep-equal to the current exports is a no-op. Changed
/// exports are stored on the node and then announced to the evaluator.
#[derive(Clone)]
pub struct ExportsHandle {
    node: Arc<Node>,
    queue: UpdateQueue,
}

impl ExportsHandle {
    pub(crate) fn new(node: Arc<Node>, queue: UpdateQueue) -> Self {
        Self { node, queue }
    }

    pub fn publish(&self, exports: Value) {
        if self.node.set_exports(exports) {
            self.queue.notify(self.node.id());
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

type Constructor =
    dyn Fn(ComponentOptions, Value) -> Result<Arc<dyn Component>, ComponentError> + Send + Sync;

/// How to build one component kind.
#[derive(Clone)]
pub struct Registration {
    kind: String,
    arguments: Value,
    exports: Value,
    cluster_aware: bool,
    build: Arc<Constructor>,
}

impl Registration {
    /// Registers `kind` with a constructor receiving the initial arguments.
    pub fn new<F>(kind: &str, build: F) -> Self
    where
        F: Fn(ComponentOptions, Value) -> Result<Arc<dyn Component>, ComponentError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            kind: kind.to_string(),
            arguments: Value::Null,
            exports: Value::Null,
            cluster_aware: false,
            build: Arc::new(build),
        }
    }

    /// Zero-value arguments that evaluated block bodies are overlaid on.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    /// Zero-value exports published before the component reports any.
    #[must_use]
    pub fn with_exports(mut self, exports: Value) -> Self {
        self.exports = exports;
        self
    }

    /// Marks the component as consulting cluster ownership.
    #[must_use]
    pub fn cluster_aware(mut self) -> Self {
        self.cluster_aware = true;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    pub fn exports(&self) -> &Value {
        &self.exports
    }

    pub fn is_cluster_aware(&self) -> bool {
        self.cluster_aware
    }

    pub(crate) fn build(
        &self,
        options: ComponentOptions,
        args: Value,
    ) -> Result<Arc<dyn Component>, ComponentError> {
        (self.build)(options, args)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &self.kind)
            .field("cluster_aware", &self.cluster_aware)
            .finish_non_exhaustive()
    }
}

/// Immutable map of component kinds, shared by every controller.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    kinds: HashMap<String, Registration>,
}

impl ComponentRegistry {
    pub fn builder() -> ComponentRegistryBuilder {
        ComponentRegistryBuilder::default()
    }

    pub fn get(&self, kind: &str) -> Option<&Registration> {
        self.kinds.get(kind)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Builder for [`ComponentRegistry`]. Later registrations of a kind replace
/// earlier ones.
#[derive(Debug, Default)]
pub struct ComponentRegistryBuilder {
    kinds: HashMap<String, Registration>,
}

impl ComponentRegistryBuilder {
    #[must_use]
    pub fn register(mut self, registration: Registration) -> Self {
        self.kinds.insert(registration.kind.clone(), registration);
        self
    }

    pub fn build(self) -> ComponentRegistry {
        ComponentRegistry { kinds: self.kinds }
    }
}
