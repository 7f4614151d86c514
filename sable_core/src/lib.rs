//! Core language contract for Sable.
//!
//! This crate defines everything both execution backends (the bytecode VM
//! and the tree-walking interpreter) must agree on:
//!
//! - [`Value`] - the closed, tagged runtime value union
//! - [`ops`] - arithmetic, comparison and indexing semantics, defined once
//! - [`builtins`] - the builtin function table
//! - [`bytecode`] - the instruction set and compiled code objects
//! - [`error`] - the failure taxonomy shared by compiler, VM and host
//!
//! Nothing here performs execution; the crate is the semantics contract the
//! backends implement against.

pub mod builtins;
pub mod bytecode;
pub mod error;
pub mod ops;
pub mod span;
pub mod value;

pub use builtins::Builtin;
pub use error::{CompileError, Failure, FailureKind, SableError};
pub use span::Span;
pub use value::Value;

/// Crate version string, surfaced by the CLI banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
