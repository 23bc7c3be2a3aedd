//! Keeps the subset of keys owned by this node.

use std::sync::Arc;

use async_trait::async_trait;
use conflux_flow::{Component, ComponentError, ExportsHandle, Registration, RunContext};
use conflux_service::ClusterData;
use conflux_value::{Value, ValueError};
use parking_lot::Mutex;
use tracing::info;

pub const SHARDING_FILTER: &str = "sharding.filter";

/// Exports as `owned` the entries of `keys` this node owns in the cluster.
///
/// The controller re-delivers the current arguments whenever cluster
/// membership changes, so `update` always recomputes ownership.
struct ShardingFilter {
    cluster: Arc<ClusterData>,
    exports: ExportsHandle,
    owned: Mutex<Vec<String>>,
}

fn keys(args: &Value) -> Result<Vec<String>, ComponentError> {
    let Some(items) = args.get("keys").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                ComponentError::from(ValueError::type_mismatch(
                    format!("keys[{i}]"),
                    "string",
                    item.type_name(),
                ))
            })
        })
        .collect()
}

impl ShardingFilter {
    fn apply(&self, args: &Value) -> Result<(), ComponentError> {
        let owned: Vec<String> = keys(args)?
            .into_iter()
            .filter(|key| self.cluster.owns_key(key))
            .collect();

        let mut current = self.owned.lock();
        if *current != owned {
            info!(
                node_name = %self.cluster.node_name(),
                owned = owned.len(),
                "Shard ownership changed"
            );
        }
        *current = owned.clone();
        drop(current);

        let owned = Value::Array(owned.into_iter().map(Value::from).collect());
        self.exports.publish(Value::from_pairs([("owned", owned)]));
        Ok(())
    }
}

pub(crate) fn registration() -> Registration {
    Registration::new(SHARDING_FILTER, |options, args| {
        let cluster = options
            .host
            .cluster()
            .ok_or_else(|| ComponentError::failed("cluster service is not registered"))?;
        let component = ShardingFilter {
            cluster,
            exports: options.exports,
            owned: Mutex::new(Vec::new()),
        };
        component.apply(&args)?;
        Ok(Arc::new(component) as Arc<dyn Component>)
    })
    .with_arguments(Value::from_pairs([("keys", Value::Array(Vec::new()))]))
    .with_exports(Value::from_pairs([("owned", Value::Array(Vec::new()))]))
    .cluster_aware()
}

#[async_trait]
impl Component for ShardingFilter {
    async fn run(&self, mut ctx: RunContext) -> Result<(), ComponentError> {
        ctx.cancelled().await;
        Ok(())
    }

    async fn update(&self, args: Value) -> Result<(), ComponentError> {
        self.apply(&args)
    }
}
