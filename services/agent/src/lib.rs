//! Conflux agent library.
//!
//! Exposes the agent's configuration, builtin components and wiring so that
//! they can be exercised from integration tests.

pub mod agent;
pub mod components;
pub mod config;

pub use agent::{read_config_file, Agent, ConfigFile};
pub use config::Config;
