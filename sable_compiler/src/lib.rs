//! AST-to-bytecode compiler for Sable.
//!
//! Compilation is two passes over the AST:
//!
//! 1. [`scope::ScopeAnalyzer`] classifies every name per scope: local,
//!    cell (captured by an inner function), or free (captured from an
//!    enclosing one).
//! 2. [`compiler::Compiler`] walks the tree once more and emits code
//!    objects through [`builder::CodeBuilder`], resolving every reference
//!    to a slot or upvalue index at compile time. Nothing is looked up by
//!    name at runtime.
//!
//! [`format`] is the versioned binary container for compiled programs.

pub mod builder;
pub mod compiler;
pub mod format;
pub mod scope;

pub use compiler::Compiler;
