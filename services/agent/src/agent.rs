//! Wiring of services, components and the controller.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use conflux_flow::{Controller, ControllerOptions, ReloadSummary, ShutdownReport};
use conflux_service::{ClusterService, ManagerOptions, ServiceManager, ServiceRegistry};
use conflux_value::{parse_config, Block};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::components;
use crate::config::Config;

/// A parsed configuration file.
#[derive(Debug)]
pub struct ConfigFile {
    pub blocks: Vec<Block>,
    /// Hex SHA-256 of the file contents.
    pub digest: String,
}

/// Reads and parses the JSON block-tree file at `path`.
pub fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let blocks = parse_config(&source)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    let digest = hex::encode(Sha256::digest(source.as_bytes()));
    Ok(ConfigFile { blocks, digest })
}

/// The running agent.
pub struct Agent {
    config: Config,
    services: Arc<ServiceManager>,
    controller: Controller,
}

impl Agent {
    /// Builds the registries, the service manager and the root controller.
    pub fn new(config: Config) -> Result<Self> {
        let services = ServiceRegistry::builder()
            .register(ClusterService::new(&config.node_name))
            .build()
            .context("failed to build service registry")?;

        let services = Arc::new(
            ServiceManager::new(
                Arc::new(services),
                ManagerOptions {
                    shutdown_grace: config.shutdown_grace,
                },
            )
            .context("failed to order services")?,
        );

        let registry = components::registry();
        info!(
            components = registry.len(),
            services = ?services.startup_order(),
            "Built registries"
        );

        let controller = Controller::with_services(
            Arc::new(registry),
            Arc::clone(&services),
            ControllerOptions {
                data_path: config.data_dir.clone(),
                shutdown_grace: config.shutdown_grace,
            },
        );

        Ok(Self {
            config,
            services,
            controller,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn services(&self) -> &Arc<ServiceManager> {
        &self.services
    }

    /// Re-reads the config file and applies it.
    ///
    /// On rejection every configuration error is logged and the previous graph
    /// keeps running.
    pub async fn reload(&self) -> Result<ReloadSummary> {
        let file = read_config_file(&self.config.config_file)?;
        info!(
            config_file = %self.config.config_file.display(),
            digest = %file.digest,
            blocks = file.blocks.len(),
            "Loading configuration"
        );

        match self.controller.reload(file.blocks).await {
            Ok(summary) => Ok(summary),
            Err(errors) => {
                for e in errors.iter() {
                    error!(error = %e, "Configuration error");
                }
                Err(anyhow::Error::new(errors).context("configuration rejected"))
            }
        }
    }

    /// Runs services and the controller until `shutdown` fires or a service
    /// fails, then stops every node task.
    ///
    /// A service failure is returned after the graph has been shut down.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<ShutdownReport> {
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut services = tokio::spawn({
            let services = Arc::clone(&self.services);
            let shutdown = stop_rx.clone();
            async move { services.run(shutdown).await }
        });
        let controller = tokio::spawn({
            let controller = self.controller.clone();
            let shutdown = stop_rx.clone();
            async move { controller.run(shutdown).await }
        });

        let mut shutdown = shutdown;
        let service_result = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => {
                info!("Shutdown requested");
                None
            }
            result = &mut services => Some(result),
        };

        let _ = stop_tx.send(true);
        if let Err(e) = controller.await {
            warn!(error = %e, "Controller loop panicked");
        }
        let report = self.controller.shutdown(self.config.shutdown_grace).await;

        let service_result = match service_result {
            Some(result) => result,
            None => services.await,
        };
        match service_result {
            Ok(Ok(())) => Ok(report),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("service failed")),
            Err(e) => Err(anyhow::Error::new(e).context("service manager panicked")),
        }
    }
}
