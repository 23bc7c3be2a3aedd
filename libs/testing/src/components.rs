use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conflux_flow::{
    Component, ComponentError, ComponentOptions, ExportsHandle, Health, Registration, RunContext,
};
use conflux_value::{Value, ValueError};
use parking_lot::Mutex;
use tracing::debug;

use crate::Journal;

pub const PASSTHROUGH: &str = "testing.passthrough";
pub const SUM: &str = "testing.sum";
pub const COUNTER: &str = "testing.counter";
pub const FAILING: &str = "testing.failing";
pub const STUCK: &str = "testing.stuck";

fn millis(args: &Value, key: &str) -> Duration {
    let ms = args.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    Duration::from_millis(ms.max(0.0) as u64)
}

// =============================================================================
// Passthrough
// =============================================================================

/// Exports its `input` argument as `output`.
///
/// Updates can be slowed down with `update_delay_ms` and rejected with
/// `fail_update`, which keeps the previous output.
struct Passthrough {
    name: String,
    exports: ExportsHandle,
    journal: Journal,
}

impl Passthrough {
    fn publish(&self, args: &Value) {
        let output = args.get("input").cloned().unwrap_or_default();
        self.exports.publish(Value::from_pairs([("output", output)]));
    }
}

pub(crate) fn passthrough(journal: Journal) -> Registration {
    Registration::new(PASSTHROUGH, move |options: ComponentOptions, args| {
        let component = Passthrough {
            name: options.path.to_string(),
            exports: options.exports,
            journal: journal.clone(),
        };
        component.journal.record(format!("construct {}", component.name));
        component.publish(&args);
        Ok(Arc::new(component) as Arc<dyn Component>)
    })
    .with_arguments(Value::from_pairs([
        ("input", Value::Null),
        ("fail_update", Value::from(false)),
        ("update_delay_ms", Value::from(0)),
    ]))
    .with_exports(Value::from_pairs([("output", Value::Null)]))
}

#[async_trait]
impl Component for Passthrough {
    async fn run(&self, mut ctx: RunContext) -> Result<(), ComponentError> {
        self.journal.record(format!("run {}", self.name));
        ctx.cancelled().await;
        self.journal.record(format!("stop {}", self.name));
        Ok(())
    }

    async fn update(&self, args: Value) -> Result<(), ComponentError> {
        let input = args.get("input").cloned().unwrap_or_default();
        self.journal.record(format!("update {} {input}", self.name));

        let delay = millis(&args, "update_delay_ms");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if args.get("fail_update").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ComponentError::failed("update rejected"));
        }

        self.publish(&args);
        self.journal.record(format!("updated {} {input}", self.name));
        Ok(())
    }
}

// =============================================================================
// Sum
// =============================================================================

/// Adds up the numbers in `inputs` and exports the result as `total`.
struct Sum {
    exports: ExportsHandle,
    journal: Journal,
    name: String,
}

impl Sum {
    fn publish(&self, args: &Value) -> Result<(), ComponentError> {
        let mut total = 0.0;
        let inputs = args.get("inputs").and_then(Value::as_array).unwrap_or_default();
        for (i, item) in inputs.iter().enumerate() {
            total += item.as_f64().ok_or_else(|| {
                ValueError::type_mismatch(format!("inputs[{i}]"), "number", item.type_name())
            })?;
        }
        self.exports.publish(Value::from_pairs([("total", Value::from(total))]));
        Ok(())
    }
}

pub(crate) fn sum(journal: Journal) -> Registration {
    Registration::new(SUM, move |options: ComponentOptions, args| {
        let component = Sum {
            name: options.path.to_string(),
            exports: options.exports,
            journal: journal.clone(),
        };
        component.journal.record(format!("construct {}", component.name));
        component.publish(&args)?;
        Ok(Arc::new(component) as Arc<dyn Component>)
    })
    .with_arguments(Value::from_pairs([("inputs", Value::Array(Vec::new()))]))
    .with_exports(Value::from_pairs([("total", Value::from(0))]))
}

#[async_trait]
impl Component for Sum {
    async fn run(&self, mut ctx: RunContext) -> Result<(), ComponentError> {
        ctx.cancelled().await;
        Ok(())
    }

    async fn update(&self, args: Value) -> Result<(), ComponentError> {
        self.journal.record(format!("update {}", self.name));
        self.publish(&args)
    }
}

// =============================================================================
// Counter
// =============================================================================

/// Publishes an increasing `count` every `interval_ms`.
struct Counter {
    exports: ExportsHandle,
    interval_ms: AtomicU64,
    count: Mutex<u64>,
}

pub(crate) fn counter(journal: Journal) -> Registration {
    Registration::new(COUNTER, move |options: ComponentOptions, args| {
        journal.record(format!("construct {}", options.path));
        let interval = millis(&args, "interval_ms").as_millis() as u64;
        Ok(Arc::new(Counter {
            exports: options.exports,
            interval_ms: AtomicU64::new(interval.max(1)),
            count: Mutex::new(0),
        }) as Arc<dyn Component>)
    })
    .with_arguments(Value::from_pairs([("interval_ms", Value::from(10))]))
    .with_exports(Value::from_pairs([("count", Value::from(0))]))
}

#[async_trait]
impl Component for Counter {
    async fn run(&self, mut ctx: RunContext) -> Result<(), ComponentError> {
        loop {
            let interval = Duration::from_millis(self.interval_ms.load(Ordering::Relaxed));
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }

            let count = {
                let mut count = self.count.lock();
                *count += 1;
                *count
            };
            self.exports.publish(Value::from_pairs([("count", Value::from(count))]));
        }
    }

    async fn update(&self, args: Value) -> Result<(), ComponentError> {
        let interval = millis(&args, "interval_ms").as_millis() as u64;
        self.interval_ms.store(interval.max(1), Ordering::Relaxed);
        debug!(interval_ms = interval, "Counter interval changed");
        Ok(())
    }

    fn current_health(&self) -> Option<Health> {
        Some(Health::healthy(format!("counted to {}", self.count.lock())))
    }
}

// =============================================================================
// Failing
// =============================================================================

/// Returns an error from `run` after `after_ms`.
struct Failing {
    name: String,
    journal: Journal,
    message: String,
    after: Duration,
}

pub(crate) fn failing(journal: Journal) -> Registration {
    Registration::new(FAILING, move |options: ComponentOptions, args| {
        let message = args.str_field("message")?.to_string();
        Ok(Arc::new(Failing {
            name: options.path.to_string(),
            journal: journal.clone(),
            message,
            after: millis(&args, "after_ms"),
        }) as Arc<dyn Component>)
    })
    .with_arguments(Value::from_pairs([
        ("message", Value::from("boom")),
        ("after_ms", Value::from(0)),
    ]))
    .with_exports(Value::object())
}

#[async_trait]
impl Component for Failing {
    async fn run(&self, mut ctx: RunContext) -> Result<(), ComponentError> {
        self.journal.record(format!("run {}", self.name));
        tokio::select! {
            _ = ctx.cancelled() => Ok(()),
            _ = tokio::time::sleep(self.after) => Err(ComponentError::failed(self.message.clone())),
        }
    }

    async fn update(&self, _args: Value) -> Result<(), ComponentError> {
        Ok(())
    }
}

// =============================================================================
// Stuck
// =============================================================================

/// A component whose `run` never returns, even when cancelled.
struct Stuck {
    name: String,
    journal: Journal,
}

pub(crate) fn stuck(journal: Journal) -> Registration {
    Registration::new(STUCK, move |options: ComponentOptions, _args| {
        Ok(Arc::new(Stuck {
            name: options.path.to_string(),
            journal: journal.clone(),
        }) as Arc<dyn Component>)
    })
    .with_exports(Value::object())
}

#[async_trait]
impl Component for Stuck {
    async fn run(&self, _ctx: RunContext) -> Result<(), ComponentError> {
        self.journal.record(format!("run {}", self.name));
        std::future::pending().await
    }

    async fn update(&self, _args: Value) -> Result<(), ComponentError> {
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
