//! Scope analysis.
//!
//! A pre-pass over the AST that classifies every name before code
//! generation: plain locals stay in frame slots, locals captured by an
//! inner function become cells, and captured references become free
//! variables resolved to upvalue indices.

mod analyzer;
mod symbol;

pub use analyzer::ScopeAnalyzer;
pub use symbol::{Scope, ScopeKind, Symbol, SymbolFlags};
