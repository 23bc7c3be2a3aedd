use std::sync::Arc;

use async_trait::async_trait;
use conflux_flow::{Component, ComponentError, ExportsHandle, Registration, RunContext};
use conflux_value::Value;

pub const STATIC_VALUE: &str = "static.value";

/// Exports its `value` argument unchanged.
struct StaticValue {
    exports: ExportsHandle,
}

impl StaticValue {
    fn publish(&self, args: &Value) {
        let value = args.get("value").cloned().unwrap_or_default();
        self.exports.publish(Value::from_pairs([("value", value)]));
    }
}

pub(crate) fn registration() -> Registration {
    Registration::new(STATIC_VALUE, |options, args| {
        let component = StaticValue {
            exports: options.exports,
        };
        component.publish(&args);
        Ok(Arc::new(component) as Arc<dyn Component>)
    })
    .with_arguments(Value::from_pairs([("value", Value::Null)]))
    .with_exports(Value::from_pairs([("value", Value::Null)]))
}

#[async_trait]
impl Component for StaticValue {
    async fn run(&self, mut ctx: RunContext) -> Result<(), ComponentError> {
        ctx.cancelled().await;
        Ok(())
    }

    async fn update(&self, args: Value) -> Result<(), ComponentError> {
        self.publish(&args);
        Ok(())
    }
}
