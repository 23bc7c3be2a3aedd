//! Builtin component kinds.

mod sharding;
mod static_value;
mod tick;

use conflux_flow::{ComponentRegistry, ComponentRegistryBuilder};

pub use sharding::SHARDING_FILTER;
pub use static_value::STATIC_VALUE;
pub use tick::LOCAL_TICK;

/// Adds every builtin component to `builder`.
pub fn register_builtins(builder: ComponentRegistryBuilder) -> ComponentRegistryBuilder {
    builder
        .register(static_value::registration())
        .register(tick::registration())
        .register(sharding::registration())
}

/// Registry of the builtin components.
pub fn registry() -> ComponentRegistry {
    register_builtins(ComponentRegistry::builder()).build()
}
