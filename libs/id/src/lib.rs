//! # conflux-id
//!
//! Identity types for the conflux component graph controller.
//!
//! ## Identities
//!
//! - [`ComponentId`]: dotted kind segments plus an optional label, the
//!   identity of a block inside one controller (`local.tick.a`)
//! - [`ModuleId`]: a module instance, keyed by definition and instance key
//! - [`ModulePath`] / [`NodePath`]: module-instance qualifiers that make a
//!   node globally unique (`math.a/testing.sum.total`)
//! - [`TaskId`], [`ReloadId`]: ULID-based ids for log correlation
//!
//! ## ULID ID Format
//!
//! Generated IDs use a prefixed format: `{prefix}_{ulid}`, e.g.
//! `task_01HV4Z2WQXKJNM8GPQY6VBKC3D`.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use macros::parse_prefixed;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
