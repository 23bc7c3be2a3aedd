//! # conflux-value
//!
//! The data that flows through the component graph.
//!
//! - [`Value`]: tagged-union value tree with deep structural equality
//! - [`Expr`]: an already-parsed expression, evaluated against a [`Scope`]
//! - [`Block`]: one node of the parsed configuration tree
//!
//! The configuration language itself (lexing, parsing, type system) lives
//! outside this workspace; blocks arrive here already parsed, or decoded from
//! their JSON encoding with [`parse_config`].

mod block;
mod error;
mod expr;
mod scope;
pub mod stdlib;
mod value;

pub use block::{parse_config, Attribute, Block};
pub use error::ValueError;
pub use expr::{Expr, Traversal};
pub use scope::Scope;
pub use value::{Capsule, Function, Value};
