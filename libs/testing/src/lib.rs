//! # conflux-testing
//!
//! Small, deterministic components for exercising the controller in
//! integration tests. Every component writes what happens to it into a shared
//! [`Journal`], so tests can assert on construction, update and shutdown
//! order.
//!
//! | kind                  | arguments                                    | exports        |
//! |-----------------------|----------------------------------------------|----------------|
//! | `testing.passthrough` | `input`, `fail_update`, `update_delay_ms`    | `output`       |
//! | `testing.sum`         | `inputs`                                     | `total`        |
//! | `testing.counter`     | `interval_ms`                                | `count`        |
//! | `testing.failing`     | `message`, `after_ms`                        | none           |
//! | `testing.stuck`       | none                                         | none           |

mod components;
mod journal;

use std::time::Duration;

use conflux_flow::{ComponentRegistry, ComponentRegistryBuilder};

pub use components::{COUNTER, FAILING, PASSTHROUGH, STUCK, SUM};
pub use journal::Journal;

/// Adds every testing component to `builder`.
pub fn register_all(builder: ComponentRegistryBuilder, journal: &Journal) -> ComponentRegistryBuilder {
    builder
        .register(components::passthrough(journal.clone()))
        .register(components::sum(journal.clone()))
        .register(components::counter(journal.clone()))
        .register(components::failing(journal.clone()))
        .register(components::stuck(journal.clone()))
}

/// A registry holding only the testing components.
pub fn registry(journal: &Journal) -> ComponentRegistry {
    register_all(ComponentRegistry::builder(), journal).build()
}

/// Polls `check` until it holds or `timeout` elapses. Returns whether it held.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let polled = tokio::time::timeout(timeout, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    polled.is_ok()
}
