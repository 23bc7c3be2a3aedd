//! Service lifecycle management.
//!
//! The manager orders services so that every dependency starts first, runs
//! each service in its own task, routes configuration updates by config type,
//! and stops services in exact reverse order at shutdown.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use conflux_value::Value;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use crate::{Result, Service, ServiceContext, ServiceError, ServiceHost, ServiceRegistry};

/// Service lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Registered but not started.
    Created,
    /// Run has been invoked and has not returned.
    Running,
    /// Run returned or the service was shut down.
    Stopped,
}

/// Service manager tunables.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Time each service is given to stop at shutdown.
    pub shutdown_grace: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Starts, updates and stops the services of a registry.
pub struct ServiceManager {
    registry: Arc<ServiceRegistry>,
    /// Service names, dependencies first.
    order: Vec<String>,
    states: Arc<Mutex<HashMap<String, ServiceState>>>,
    options: ManagerOptions,
}

struct RunningService {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ServiceManager {
    /// Creates a manager, failing if the dependency graph is invalid.
    pub fn new(registry: Arc<ServiceRegistry>, options: ManagerOptions) -> Result<Self> {
        let order = startup_order(&registry)?;
        let states = order
            .iter()
            .map(|name| (name.clone(), ServiceState::Created))
            .collect();

        Ok(Self {
            registry,
            order,
            states: Arc::new(Mutex::new(states)),
            options,
        })
    }

    /// Host giving access to the managed services' data.
    pub fn host(&self) -> ServiceHost {
        ServiceHost::new(Arc::clone(&self.registry))
    }

    /// Names of the services in startup order.
    pub fn startup_order(&self) -> &[String] {
        &self.order
    }

    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.states.lock().get(name).copied()
    }

    /// Routes evaluated configuration blocks to services.
    ///
    /// `configs` maps a config type to the evaluated block body. Services whose
    /// config type is absent are left untouched. Every matching service is
    /// updated even if an earlier one fails; the first error is returned.
    pub async fn update(&self, configs: &HashMap<String, Value>) -> Result<()> {
        let mut first_error = None;

        for name in &self.order {
            let Some(definition) = self.registry.definition(name) else {
                continue;
            };
            let Some(config) = definition
                .config_type
                .as_ref()
                .and_then(|config_type| configs.get(config_type))
            else {
                continue;
            };
            let Some(service) = self.registry.get(name) else {
                continue;
            };

            match service.update(config.clone()).await {
                Ok(()) => info!(service = %name, "Updated service"),
                Err(e) => {
                    error!(service = %name, error = %e, "Failed to update service");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs every service until `shutdown` fires or a service fails.
    ///
    /// Services start dependency-first; each is launched only once all its
    /// dependencies are running. On exit all services are stopped in reverse
    /// startup order, each bounded by the shutdown grace period. A service
    /// error is surfaced after that shutdown completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
        let running = self.start(exit_tx);

        info!(count = running.len(), "Started services");

        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.wait_for(|stop| *stop) => break Ok(()),

                exit = exit_rx.recv() => match exit {
                    Some((name, Err(e))) => {
                        error!(service = %name, error = %e, "Service failed, shutting down");
                        break Err(ServiceError::Failed {
                            service: name,
                            source: Box::new(e),
                        });
                    }
                    Some((name, Ok(()))) => {
                        info!(service = %name, "Service exited");
                    }
                    None => break Ok(()),
                },
            }
        };

        self.stop_all(running).await;
        outcome
    }

    fn start(
        &self,
        exit_tx: mpsc::UnboundedSender<(String, Result<()>)>,
    ) -> Vec<RunningService> {
        let mut ready: HashMap<String, watch::Receiver<bool>> = HashMap::new();
        let mut running = Vec::with_capacity(self.order.len());

        for name in &self.order {
            let (Some(service), Some(definition)) =
                (self.registry.get(name), self.registry.definition(name))
            else {
                continue;
            };

            let dependencies: Vec<watch::Receiver<bool>> = definition
                .depends_on
                .iter()
                .filter_map(|dep| ready.get(dep).cloned())
                .collect();
            let (ready_tx, ready_rx) = watch::channel(false);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            ready.insert(name.clone(), ready_rx);

            let ctx = ServiceContext {
                name: name.clone(),
                shutdown: shutdown_rx,
                host: self.host(),
            };
            let task = run_service(
                Arc::clone(service),
                ctx,
                dependencies,
                ready_tx,
                Arc::clone(&self.states),
                exit_tx.clone(),
            );
            let handle = tokio::spawn(task.instrument(tracing::info_span!("service", name = %name)));

            running.push(RunningService {
                name: name.clone(),
                shutdown_tx,
                handle,
            });
        }

        running
    }

    async fn stop_all(&self, running: Vec<RunningService>) {
        info!(count = running.len(), "Stopping services");

        for mut service in running.into_iter().rev() {
            let _ = service.shutdown_tx.send(true);
            match tokio::time::timeout(self.options.shutdown_grace, &mut service.handle).await {
                Ok(_) => info!(service = %service.name, "Service stopped"),
                Err(_) => warn!(
                    service = %service.name,
                    grace_ms = self.options.shutdown_grace.as_millis() as u64,
                    "Service did not stop within grace period, abandoning"
                ),
            }
            self.states
                .lock()
                .insert(service.name.clone(), ServiceState::Stopped);
        }
    }
}

async fn run_service(
    service: Arc<dyn Service>,
    mut ctx: ServiceContext,
    dependencies: Vec<watch::Receiver<bool>>,
    ready_tx: watch::Sender<bool>,
    states: Arc<Mutex<HashMap<String, ServiceState>>>,
    exit_tx: mpsc::UnboundedSender<(String, Result<()>)>,
) {
    let name = ctx.name.clone();

    for mut dependency in dependencies {
        tokio::select! {
            ready = dependency.wait_for(|ready| *ready) => {
                if ready.is_err() {
                    warn!(service = %name, "Dependency stopped before becoming ready");
                    return;
                }
            }
            _ = ctx.shutdown.wait_for(|stop| *stop) => return,
        }
    }

    states.lock().insert(name.clone(), ServiceState::Running);
    info!(service = %name, "Starting service");

    // Dependents are released only after run has been entered.
    let mut run = service.run(ctx);
    let result = match futures_util::poll!(&mut run) {
        Poll::Ready(result) => {
            ready_tx.send_replace(true);
            result
        }
        Poll::Pending => {
            ready_tx.send_replace(true);
            run.await
        }
    };

    states.lock().insert(name.clone(), ServiceState::Stopped);
    let _ = exit_tx.send((name, result));
}

/// Topologically sorts services, dependencies first.
///
/// Ties are broken by registration order.
fn startup_order(registry: &ServiceRegistry) -> Result<Vec<String>> {
    let names: Vec<&str> = registry.iter().map(|(d, _)| d.name.as_str()).collect();
    let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    let mut in_degree = vec![0usize; names.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); names.len()];

    for (i, (definition, _)) in registry.iter().enumerate() {
        for dep in &definition.depends_on {
            let Some(&j) = index.get(dep.as_str()) else {
                return Err(ServiceError::UnknownDependency {
                    service: definition.name.clone(),
                    dependency: dep.clone(),
                });
            };
            in_degree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..names.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(names.len());

    while let Some(i) = ready.pop_first() {
        order.push(names[i].to_string());
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() != names.len() {
        let cycle = (0..names.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| names[i].to_string())
            .collect();
        return Err(ServiceError::Cycle(cycle));
    }

    Ok(order)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceDefinition;
    use async_trait::async_trait;

    struct Noop(ServiceDefinition);

    #[async_trait]
    impl Service for Noop {
        fn definition(&self) -> ServiceDefinition {
            self.0.clone()
        }

        async fn run(&self, mut ctx: ServiceContext) -> Result<()> {
            ctx.cancelled().await;
            Ok(())
        }

        async fn update(&self, _config: Value) -> Result<()> {
            Ok(())
        }
    }

    fn registry(defs: Vec<ServiceDefinition>) -> Arc<ServiceRegistry> {
        let builder = defs
            .into_iter()
            .fold(ServiceRegistry::builder(), |b, d| b.register(Noop(d)));
        Arc::new(builder.build().unwrap())
    }

    #[test]
    fn test_startup_order_dependencies_first() {
        let registry = registry(vec![
            ServiceDefinition::new("http").depends_on(&["cluster", "labels"]),
            ServiceDefinition::new("cluster").depends_on(&["labels"]),
            ServiceDefinition::new("labels"),
        ]);
        let manager = ServiceManager::new(registry, ManagerOptions::default()).unwrap();
        assert_eq!(manager.startup_order(), ["labels", "cluster", "http"]);
        assert_eq!(manager.state("http"), Some(ServiceState::Created));
    }

    #[test]
    fn test_cycle_is_fatal() {
        let registry = registry(vec![
            ServiceDefinition::new("a").depends_on(&["b"]),
            ServiceDefinition::new("b").depends_on(&["a"]),
            ServiceDefinition::new("c"),
        ]);
        let err = ServiceManager::new(registry, ManagerOptions::default())
            .err()
            .unwrap();
        match err {
            ServiceError::Cycle(names) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_dependency_is_fatal() {
        let registry = registry(vec![ServiceDefinition::new("a").depends_on(&["metrics"])]);
        let err = ServiceManager::new(registry, ManagerOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::UnknownDependency { .. }));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = ServiceRegistry::builder()
            .register(Noop(ServiceDefinition::new("a")))
            .register(Noop(ServiceDefinition::new("a")))
            .build();
        assert!(matches!(result, Err(ServiceError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let registry = registry(vec![ServiceDefinition::new("a")]);
        let manager = Arc::new(ServiceManager::new(registry, ManagerOptions::default()).unwrap());
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run(rx).await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.state("a") != Some(ServiceState::Running) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(manager.state("a"), Some(ServiceState::Stopped));
    }
}
