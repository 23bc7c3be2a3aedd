//! Shared setup for controller integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use conflux_flow::{Controller, ControllerOptions, GraphSnapshot, HealthType, ShutdownReport};
use conflux_testing::{Journal, PASSTHROUGH};
use conflux_value::{Block, Expr, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

/// A controller with the testing registry and its run loop spawned.
pub struct Harness {
    pub controller: Controller,
    pub journal: Journal,
    shutdown: watch::Sender<bool>,
    run: JoinHandle<()>,
}

impl Harness {
    pub fn new() -> Self {
        let journal = Journal::new();
        let controller = Controller::new(
            Arc::new(conflux_testing::registry(&journal)),
            ControllerOptions {
                data_path: std::env::temp_dir().join("conflux-flow-tests"),
                shutdown_grace: Duration::from_secs(2),
            },
        );

        let (shutdown, rx) = watch::channel(false);
        let run = tokio::spawn({
            let controller = controller.clone();
            async move { controller.run(rx).await }
        });

        Self {
            controller,
            journal,
            shutdown,
            run,
        }
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.controller.snapshot()
    }

    pub fn exports(&self, id: &str) -> Option<Value> {
        self.snapshot().node(id).map(|n| n.exports.clone())
    }

    pub fn output(&self, id: &str) -> Option<Value> {
        self.exports(id)?.get("output").cloned()
    }

    pub fn health(&self, id: &str) -> Option<HealthType> {
        self.snapshot().node(id).map(|n| n.health.health)
    }

    pub async fn wait_for(&self, what: &str, check: impl FnMut() -> bool) {
        assert!(
            conflux_testing::eventually(WAIT, check).await,
            "timed out waiting for {what}"
        );
    }

    pub async fn stop(self) -> ShutdownReport {
        self.stop_within(WAIT).await
    }

    /// Stops the run loop, then shuts the controller down with `grace`.
    pub async fn stop_within(self, grace: Duration) -> ShutdownReport {
        let _ = self.shutdown.send(true);
        tokio::time::timeout(WAIT, self.run)
            .await
            .expect("controller loop did not stop")
            .expect("controller loop panicked");
        self.controller.shutdown(grace).await
    }
}

pub fn passthrough(label: &str, input: Expr) -> Block {
    Block::new(PASSTHROUGH, Some(label)).attr("input", input)
}
