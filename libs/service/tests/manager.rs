//! Integration tests for service ordering, update routing and failure handling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conflux_service::{
    ManagerOptions, Result, Service, ServiceContext, ServiceDefinition, ServiceError,
    ServiceManager, ServiceRegistry, ServiceState,
};
use conflux_value::Value;
use parking_lot::Mutex;
use tokio::sync::watch;

type Journal = Arc<Mutex<Vec<String>>>;

/// Records run/stop/update events into a shared journal.
struct Recording {
    definition: ServiceDefinition,
    journal: Journal,
    fail_after: Option<Duration>,
}

impl Recording {
    fn new(definition: ServiceDefinition, journal: &Journal) -> Self {
        Self {
            definition,
            journal: Arc::clone(journal),
            fail_after: None,
        }
    }

    fn failing(mut self, after: Duration) -> Self {
        self.fail_after = Some(after);
        self
    }
}

#[async_trait]
impl Service for Recording {
    fn definition(&self) -> ServiceDefinition {
        self.definition.clone()
    }

    async fn run(&self, mut ctx: ServiceContext) -> Result<()> {
        self.journal.lock().push(format!("run {}", ctx.name));

        if let Some(after) = self.fail_after {
            tokio::time::sleep(after).await;
            return Err(ServiceError::Internal(anyhow::anyhow!("boom")));
        }

        ctx.cancelled().await;
        self.journal.lock().push(format!("stop {}", ctx.name));
        Ok(())
    }

    async fn update(&self, config: Value) -> Result<()> {
        self.journal
            .lock()
            .push(format!("update {} {}", self.definition.name, config));
        Ok(())
    }
}

fn manager(services: Vec<Recording>) -> Arc<ServiceManager> {
    let registry = services
        .into_iter()
        .fold(ServiceRegistry::builder(), |b, s| b.register(s))
        .build()
        .unwrap();
    let options = ManagerOptions {
        shutdown_grace: Duration::from_secs(2),
    };
    Arc::new(ServiceManager::new(Arc::new(registry), options).unwrap())
}

async fn wait_running(manager: &ServiceManager, names: &[&str]) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !names
            .iter()
            .all(|n| manager.state(n) == Some(ServiceState::Running))
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("services did not start");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dependency_runs_first_and_stops_last() {
    let journal = Journal::default();
    // Registered dependent-first to prove ordering comes from dependencies.
    let manager = manager(vec![
        Recording::new(ServiceDefinition::new("s2").depends_on(&["s1"]), &journal),
        Recording::new(ServiceDefinition::new("s1"), &journal),
    ]);

    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run(rx).await }
    });

    wait_running(&manager, &["s1", "s2"]).await;
    tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());

    assert_eq!(
        *journal.lock(),
        vec!["run s1", "run s2", "stop s2", "stop s1"]
    );
    assert_eq!(manager.state("s1"), Some(ServiceState::Stopped));
    assert_eq!(manager.state("s2"), Some(ServiceState::Stopped));
}

#[tokio::test]
async fn test_failure_triggers_reverse_shutdown() {
    let journal = Journal::default();
    let manager = manager(vec![
        Recording::new(ServiceDefinition::new("base"), &journal),
        Recording::new(ServiceDefinition::new("flaky").depends_on(&["base"]), &journal)
            .failing(Duration::from_millis(20)),
        Recording::new(ServiceDefinition::new("top").depends_on(&["flaky"]), &journal),
    ]);

    let (_tx, rx) = watch::channel(false);
    let result = tokio::time::timeout(Duration::from_secs(5), manager.run(rx))
        .await
        .unwrap();

    match result {
        Err(ServiceError::Failed { service, .. }) => assert_eq!(service, "flaky"),
        other => panic!("expected failure, got {other:?}"),
    }

    let journal = journal.lock().clone();
    assert_eq!(journal[..3], ["run base", "run flaky", "run top"]);
    assert_eq!(journal[3..], ["stop top", "stop base"]);
}

#[tokio::test]
async fn test_update_routed_by_config_type() {
    let journal = Journal::default();
    let manager = manager(vec![
        Recording::new(ServiceDefinition::new("cluster").config_type("clustering"), &journal),
        Recording::new(ServiceDefinition::new("http").config_type("http"), &journal),
        Recording::new(ServiceDefinition::new("labels"), &journal),
    ]);

    let configs = HashMap::from([(
        "clustering".to_string(),
        Value::from_pairs([("peers", Value::Array(vec![]))]),
    )]);
    manager.update(&configs).await.unwrap();

    assert_eq!(*journal.lock(), vec![r#"update cluster {"peers":[]}"#]);
}
