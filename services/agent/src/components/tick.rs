use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use conflux_flow::{Component, ComponentError, ExportsHandle, Registration, RunContext};
use conflux_value::Value;
use tracing::{debug, warn};

pub const LOCAL_TICK: &str = "local.tick";

const DEFAULT_INTERVAL_MS: u64 = 1_000;

/// File under the node's data directory holding the last published count.
const COUNT_FILE: &str = "count";

/// Publishes a tick counter and timestamp every `interval_ms`.
///
/// The counter is persisted in the node's data directory and resumes from the
/// stored value when the node is constructed again.
struct Tick {
    exports: ExportsHandle,
    interval_ms: AtomicU64,
    data_path: PathBuf,
    start: u64,
}

/// Reads the persisted count. A missing or unreadable file starts from zero.
fn load_count(data_path: &Path) -> u64 {
    let path = data_path.join(COUNT_FILE);
    match std::fs::read_to_string(&path) {
        Ok(raw) => raw.trim().parse::<u64>().unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring corrupt tick count");
            0
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read tick count");
            0
        }
    }
}

async fn store_count(data_path: &Path, count: u64) -> std::io::Result<()> {
    tokio::fs::create_dir_all(data_path).await?;
    tokio::fs::write(data_path.join(COUNT_FILE), count.to_string()).await
}

fn interval_ms(args: &Value) -> Result<u64, ComponentError> {
    let ms = args.number_field("interval_ms")?;
    if !ms.is_finite() || ms < 1.0 {
        return Err(ComponentError::failed(format!(
            "interval_ms must be a positive number, got {ms}"
        )));
    }
    Ok(ms as u64)
}

pub(crate) fn registration() -> Registration {
    Registration::new(LOCAL_TICK, |options, args| {
        let start = load_count(&options.data_path);
        Ok(Arc::new(Tick {
            exports: options.exports,
            interval_ms: AtomicU64::new(interval_ms(&args)?),
            data_path: options.data_path,
            start,
        }) as Arc<dyn Component>)
    })
    .with_arguments(Value::from_pairs([(
        "interval_ms",
        Value::from(DEFAULT_INTERVAL_MS),
    )]))
    .with_exports(Value::from_pairs([
        ("count", Value::from(0)),
        ("last_tick", Value::Null),
    ]))
}

#[async_trait]
impl Component for Tick {
    async fn run(&self, mut ctx: RunContext) -> Result<(), ComponentError> {
        let mut count = self.start;
        loop {
            let interval = Duration::from_millis(self.interval_ms.load(Ordering::Relaxed));
            tokio::select! {
                biased;

                _ = ctx.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }

            count += 1;
            self.exports.publish(Value::from_pairs([
                ("count", Value::from(count)),
                ("last_tick", Value::from(Utc::now().to_rfc3339())),
            ]));

            if let Err(e) = store_count(&self.data_path, count).await {
                warn!(data_path = %self.data_path.display(), error = %e, "Failed to persist tick count");
            }
        }
    }

    async fn update(&self, args: Value) -> Result<(), ComponentError> {
        let ms = interval_ms(&args)?;
        self.interval_ms.store(ms, Ordering::Relaxed);
        debug!(interval_ms = ms, "Tick interval changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Value::from(250), Some(250))]
    #[case(Value::from(0), None)]
    #[case(Value::from("fast"), None)]
    fn test_interval_validation(#[case] raw: Value, #[case] expected: Option<u64>) {
        let args = Value::from_pairs([("interval_ms", raw)]);
        assert_eq!(interval_ms(&args).ok(), expected);
    }

    #[tokio::test]
    async fn test_count_survives_reconstruction() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("local.tick.a");
        assert_eq!(load_count(&data_path), 0);

        store_count(&data_path, 41).await.unwrap();
        assert_eq!(load_count(&data_path), 41);

        std::fs::write(data_path.join(COUNT_FILE), "not a number").unwrap();
        assert_eq!(load_count(&data_path), 0);
    }
}
