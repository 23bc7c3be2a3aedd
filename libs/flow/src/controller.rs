//! The component controller.
//!
//! A controller owns one live graph. Reloads build a candidate graph off to
//! the side and swap it in only when it validates; the run loop turns export
//! changes published by node tasks into evaluation waves. Reloads and waves
//! are serialized by one async mutex, while snapshots read the live graph
//! without locking.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use conflux_id::{ComponentId, ModulePath, NodePath, ReloadId};
use conflux_service::{ServiceHost, ServiceManager};
use conflux_value::{Block, Scope, Value};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::component::ComponentRegistry;
use crate::graph::Graph;
use crate::loader::{self, Candidate, LoadContext};
use crate::module::ModuleDefinition;
use crate::node::UpdateQueue;
use crate::snapshot::GraphSnapshot;
use crate::{ConfigError, ConfigErrors};

/// Controller tunables.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Root of the per-node data directories.
    pub data_path: PathBuf,

    /// How long shutdown and node removal wait for tasks to return.
    pub shutdown_grace: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            data_path: std::env::temp_dir().join("conflux"),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Shared by a controller and every module controller below it.
#[derive(Clone)]
pub(crate) struct ControllerContext {
    pub(crate) registry: Arc<ComponentRegistry>,
    pub(crate) host: ServiceHost,
    pub(crate) options: ControllerOptions,
}

/// Outcome of a successful reload.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub reload_id: ReloadId,
    pub generation: u64,
    pub added: Vec<ComponentId>,
    pub removed: Vec<ComponentId>,
    pub updated: Vec<ComponentId>,
    /// Nodes failing right after the reload's evaluation wave.
    pub unhealthy: Vec<ComponentId>,
}

/// Outcome of [`Controller::shutdown`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// Node tasks that returned within the grace period.
    pub stopped: usize,
    /// Node tasks left running after the grace period.
    pub abandoned: Vec<NodePath>,
}

/// State a module controller receives from its instance node.
pub(crate) struct ModuleState {
    pub(crate) arguments: RwLock<Value>,
    pub(crate) definitions: RwLock<BTreeMap<String, Arc<ModuleDefinition>>>,
    pub(crate) on_exports: Box<dyn Fn(Value) + Send + Sync>,
    pub(crate) last_exports: parking_lot::Mutex<Option<Value>>,
}

pub(crate) struct Inner {
    pub(crate) context: ControllerContext,
    pub(crate) module_path: ModulePath,
    services: Option<Arc<ServiceManager>>,
    pub(crate) live: ArcSwap<Graph>,
    lock: Mutex<()>,
    pub(crate) queue: UpdateQueue,
    events: Mutex<Events>,
    /// Tasks of removed nodes that have not returned yet.
    removals: parking_lot::Mutex<Vec<Removal>>,
    pub(crate) module: Option<ModuleState>,
}

struct Removal {
    path: NodePath,
    handle: JoinHandle<()>,
    deadline: Instant,
    warned: bool,
}

/// Inputs of the run loop.
struct Events {
    queue_rx: mpsc::UnboundedReceiver<ComponentId>,
    /// Subscribed at construction so no membership change is missed before
    /// the loop starts.
    cluster: Option<watch::Receiver<u64>>,
}

/// Drives one component graph.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    /// Creates a root controller without services.
    pub fn new(registry: Arc<ComponentRegistry>, options: ControllerOptions) -> Self {
        let context = ControllerContext {
            registry,
            host: ServiceHost::empty(),
            options,
        };
        Self::build(context, ModulePath::root(), None, None)
    }

    /// Creates a root controller whose service blocks update `services`.
    pub fn with_services(
        registry: Arc<ComponentRegistry>,
        services: Arc<ServiceManager>,
        options: ControllerOptions,
    ) -> Self {
        let context = ControllerContext {
            registry,
            host: services.host(),
            options,
        };
        Self::build(context, ModulePath::root(), Some(services), None)
    }

    /// Creates the controller of a module instance.
    pub(crate) fn new_module(
        context: ControllerContext,
        module_path: ModulePath,
        arguments: Value,
        definitions: BTreeMap<String, Arc<ModuleDefinition>>,
        on_exports: impl Fn(Value) + Send + Sync + 'static,
    ) -> Self {
        let module = ModuleState {
            arguments: RwLock::new(arguments),
            definitions: RwLock::new(definitions),
            on_exports: Box::new(on_exports),
            last_exports: parking_lot::Mutex::new(None),
        };
        Self::build(context, module_path, None, Some(module))
    }

    fn build(
        context: ControllerContext,
        module_path: ModulePath,
        services: Option<Arc<ServiceManager>>,
        module: Option<ModuleState>,
    ) -> Self {
        let (queue, queue_rx) = UpdateQueue::new();
        let cluster = context.host.cluster().map(|c| c.subscribe());
        Self {
            inner: Arc::new(Inner {
                context,
                module_path,
                services,
                live: ArcSwap::from_pointee(Graph::empty()),
                lock: Mutex::new(()),
                queue,
                events: Mutex::new(Events { queue_rx, cluster }),
                removals: parking_lot::Mutex::new(Vec::new()),
                module,
            }),
        }
    }

    /// Module qualifiers of this controller; empty for the root.
    pub fn module_path(&self) -> &ModulePath {
        &self.inner.module_path
    }

    /// Generation of the live graph; zero before the first reload.
    pub fn generation(&self) -> u64 {
        self.inner.live.load().generation
    }

    /// Loads `blocks` as the new live graph.
    ///
    /// Either every block validates and the graph is swapped in, or nothing
    /// changes and all problems are returned together.
    pub async fn reload(&self, blocks: Vec<Block>) -> Result<ReloadSummary, ConfigErrors> {
        let _guard = self.inner.lock.lock().await;

        let candidate = self.inner.prepare(blocks).inspect_err(|errors| {
            warn!(
                module = %self.inner.module_path,
                errors = errors.len(),
                "Rejected configuration reload"
            );
        })?;
        let configs = service_configs(&candidate.services)?;

        if let Some(services) = &self.inner.services {
            if !configs.is_empty() {
                // Services keep their previous configuration on failure.
                if let Err(e) = services.update(&configs).await {
                    warn!(error = %e, "Service configuration update failed");
                }
            }
        }

        Ok(self.inner.apply(candidate))
    }

    /// Loads the first graph of a module controller.
    ///
    /// Only valid before the controller is shared, so no lock is taken.
    pub(crate) fn load_now(&self, blocks: Vec<Block>) -> Result<ReloadSummary, ConfigErrors> {
        let candidate = self.inner.prepare(blocks)?;
        Ok(self.inner.apply(candidate))
    }

    /// Replaces the arguments and inherited definitions of a module controller.
    pub(crate) fn set_module_inputs(
        &self,
        arguments: Value,
        definitions: BTreeMap<String, Arc<ModuleDefinition>>,
    ) {
        if let Some(module) = &self.inner.module {
            *module.arguments.write() = arguments;
            *module.definitions.write() = definitions;
        }
    }

    /// Propagates export changes until `shutdown` fires.
    ///
    /// All changes queued when a wave starts are handled by that one wave.
    /// Cluster membership changes re-deliver arguments to cluster-aware nodes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let inner = &self.inner;
        let mut events = inner.events.lock().await;
        let Events { queue_rx: rx, cluster } = &mut *events;

        debug!(module = %inner.module_path, "Controller running");

        loop {
            tokio::select! {
                biased;

                // The borrowed value must not outlive this arm.
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,

                Some(id) = rx.recv() => {
                    let mut changed = BTreeSet::from([id]);
                    while let Ok(id) = rx.try_recv() {
                        changed.insert(id);
                    }
                    inner.propagate(changed).await;
                }

                ok = cluster_changed(cluster) => {
                    if ok {
                        inner.repost_cluster_aware().await;
                    } else {
                        *cluster = None;
                    }
                }
            }
        }

        debug!(module = %inner.module_path, "Controller loop stopped");
    }

    /// Cancels every node task and waits for them up to `grace`.
    ///
    /// Tasks still running at the deadline are abandoned, not aborted.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let _guard = self.inner.lock.lock().await;
        let graph = self.inner.live.load_full();
        let deadline = Instant::now() + grace;

        let mut handles: Vec<_> = graph
            .nodes()
            .filter_map(|node| Some((node.path().clone(), node.stop()?)))
            .collect();
        handles.extend(
            self.inner
                .removals
                .lock()
                .drain(..)
                .map(|removal| (removal.path, removal.handle)),
        );

        let waits = handles.into_iter().map(|(path, handle)| async move {
            (path, tokio::time::timeout_at(deadline, handle).await)
        });

        let mut report = ShutdownReport::default();
        for (path, outcome) in join_all(waits).await {
            match outcome {
                Ok(Ok(())) => report.stopped += 1,
                Ok(Err(e)) => {
                    warn!(node_id = %path, error = %e, "Node task panicked");
                    report.stopped += 1;
                }
                Err(_) => {
                    warn!(node_id = %path, "Node task did not stop within grace period, abandoning");
                    report.abandoned.push(path);
                }
            }
        }

        info!(
            module = %self.inner.module_path,
            stopped = report.stopped,
            abandoned = report.abandoned.len(),
            "Controller shut down"
        );
        report
    }

    /// Point-in-time view of the live graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot::capture(&self.inner.module_path, &self.inner.live.load())
    }
}

impl Inner {
    fn prepare(&self, blocks: Vec<Block>) -> Result<Candidate, ConfigErrors> {
        let previous = self.live.load();
        let inherited = self
            .module
            .as_ref()
            .map(|m| m.definitions.read().clone())
            .unwrap_or_default();
        let ctx = LoadContext {
            context: &self.context,
            module_path: &self.module_path,
            in_module: self.module.is_some(),
            inherited: &inherited,
        };
        loader::load(&ctx, blocks, &previous)
    }

    fn apply(&self, candidate: Candidate) -> ReloadSummary {
        let reload_id = ReloadId::new();
        let removed: Vec<ComponentId> = candidate
            .removed
            .iter()
            .map(|node| {
                self.track_removal(node.path(), node.remove());
                debug!(node_id = %node.path(), "Removed node");
                node.id().clone()
            })
            .collect();

        let mut graph = candidate.graph;
        graph.generation = self.live.load().generation + 1;
        let graph = Arc::new(graph);
        self.live.store(Arc::clone(&graph));

        self.evaluate_wave(&graph, (0..graph.entries.len()).collect());

        let unhealthy: Vec<ComponentId> = graph
            .nodes()
            .filter(|node| node.health().health.is_failing())
            .map(|node| node.id().clone())
            .collect();

        info!(
            reload_id = %reload_id,
            module = %self.module_path,
            generation = graph.generation,
            added = candidate.added.len(),
            updated = candidate.updated.len(),
            removed = removed.len(),
            unhealthy = unhealthy.len(),
            "Applied configuration"
        );

        ReloadSummary {
            reload_id,
            generation: graph.generation,
            added: candidate.added,
            removed,
            updated: candidate.updated,
            unhealthy,
        }
    }

    /// Keeps the task of a removed node until it returns, so shutdown can
    /// still wait for it.
    fn track_removal(&self, path: &NodePath, handle: Option<JoinHandle<()>>) {
        let now = Instant::now();
        let mut removals = self.removals.lock();

        removals.retain_mut(|removal| {
            if removal.handle.is_finished() {
                return false;
            }
            if !removal.warned && now >= removal.deadline {
                warn!(node_id = %removal.path, "Removed node did not stop within grace period");
                removal.warned = true;
            }
            true
        });

        if let Some(handle) = handle {
            removals.push(Removal {
                path: path.clone(),
                handle,
                deadline: now + self.context.options.shutdown_grace,
                warned: false,
            });
        }
    }

    /// Re-evaluates the dependents of nodes whose exports or health changed.
    async fn propagate(&self, changed: BTreeSet<ComponentId>) {
        let _guard = self.lock.lock().await;
        let graph = self.live.load_full();

        let dirty: BTreeSet<usize> = changed
            .iter()
            .filter_map(|id| graph.index.get(id))
            .flat_map(|&i| graph.entries[i].dependents.iter().copied())
            .collect();
        if dirty.is_empty() {
            return;
        }

        debug!(
            module = %self.module_path,
            changed = changed.len(),
            dirty = dirty.len(),
            "Propagating export changes"
        );
        self.evaluate_wave(&graph, dirty);
    }

    async fn repost_cluster_aware(&self) {
        let _guard = self.lock.lock().await;
        let graph = self.live.load();
        let mut count = 0;
        for entry in &graph.entries {
            if entry
                .role
                .registration()
                .is_some_and(|r| r.is_cluster_aware())
            {
                entry.node.repost_arguments();
                count += 1;
            }
        }
        if count > 0 {
            info!(module = %self.module_path, nodes = count, "Cluster membership changed");
        }
    }
}

/// Evaluates service blocks against the stdlib-only scope.
fn service_configs(blocks: &[Block]) -> Result<HashMap<String, Value>, ConfigErrors> {
    let scope = Scope::with_stdlib();
    let mut errors = ConfigErrors::new();
    let mut configs = HashMap::new();

    for block in blocks {
        match block.evaluate_body(&scope) {
            Ok(value) => {
                configs.insert(block.kind(), value);
            }
            Err(e) => errors.push(ConfigError::InvalidServiceConfig {
                kind: block.kind(),
                message: e.to_string(),
            }),
        }
    }

    errors.into_result(configs)
}

/// Resolves when cluster membership changes. Returns false once the cluster
/// service is gone.
async fn cluster_changed(rx: &mut Option<watch::Receiver<u64>>) -> bool {
    match rx {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_value::Expr;
    use rstest::rstest;

    #[rstest]
    #[case::literal(Expr::literal(3), true)]
    #[case::stdlib(Expr::call("length", vec![Expr::literal("abc")]), true)]
    #[case::reference(Expr::reference("local.tick.a.count"), false)]
    fn test_service_configs_use_stdlib_scope(#[case] expr: Expr, #[case] ok: bool) {
        let block = Block::new("clustering", None).attr("port", expr);
        let result = service_configs(std::slice::from_ref(&block));
        assert_eq!(result.is_ok(), ok);
        if let Err(errors) = result {
            assert!(matches!(
                errors.iter().next(),
                Some(ConfigError::InvalidServiceConfig { kind, .. }) if kind == "clustering"
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_reload_bumps_generation() {
        let controller = Controller::new(
            Arc::new(ComponentRegistry::builder().build()),
            ControllerOptions::default(),
        );
        assert_eq!(controller.generation(), 0);

        let summary = controller.reload(Vec::new()).await.unwrap();
        assert_eq!(summary.generation, 1);
        assert!(summary.added.is_empty());
        assert_eq!(controller.generation(), 1);

        let report = controller.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.stopped, 0);
        assert!(report.abandoned.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_kind_rejected_without_swap() {
        let controller = Controller::new(
            Arc::new(ComponentRegistry::builder().build()),
            ControllerOptions::default(),
        );
        let errors = controller
            .reload(vec![Block::new("nope.missing", Some("a"))])
            .await
            .unwrap_err();

        assert_eq!(errors.len(), 1);
        assert_eq!(controller.generation(), 0);
    }
}
