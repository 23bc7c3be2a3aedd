//! # conflux-flow
//!
//! The component graph controller.
//!
//! Configuration is a list of blocks. Each block becomes a node of a directed
//! acyclic graph whose edges are the references between block expressions.
//! Every component node runs in its own task; when a node publishes new
//! exports, its dependents are re-evaluated in topological order and receive
//! their new arguments through a coalescing mailbox.
//!
//! ## Pieces
//!
//! - [`Controller`]: atomic reloads, evaluation waves, shutdown and snapshots
//! - [`Component`] / [`ComponentRegistry`]: the capability trait and the
//!   immutable kind registry
//! - [`ModuleDefinition`]: `declare` blocks instantiated as isolated
//!   sub-graphs
//! - [`Health`]: per-node health with a severity order

mod component;
mod controller;
mod error;
mod evaluator;
mod graph;
mod health;
mod loader;
mod mailbox;
mod module;
mod node;
mod snapshot;

pub use component::{
    Component, ComponentOptions, ComponentRegistry, ComponentRegistryBuilder, ExportsHandle,
    Registration, RunContext,
};
pub use controller::{Controller, ControllerOptions, ReloadSummary, ShutdownReport};
pub use error::{ComponentError, ConfigError, ConfigErrors, EvaluationError};
pub use health::{Health, HealthType};
pub use mailbox::Mailbox;
pub use module::ModuleDefinition;
pub use node::NodePhase;
pub use snapshot::{GraphSnapshot, NodeSnapshot};
