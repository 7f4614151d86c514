//! Symbol table and scope definitions.

use rustc_hash::FxHashMap;
use std::rc::Rc;

/// The kind of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The module body. Behaves like a function frame for captures: module
    /// locals can become cells.
    Module,
    /// A `fn` or `async fn` body.
    Function,
}

/// Flags for symbol classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolFlags(u8);

impl SymbolFlags {
    /// No flags.
    pub const NONE: SymbolFlags = SymbolFlags(0);
    /// Declared in this scope (`let`, `const`, `fn`, parameter, loop var).
    pub const DEF: SymbolFlags = SymbolFlags(1 << 0);
    /// Referenced in this scope.
    pub const USE: SymbolFlags = SymbolFlags(1 << 1);
    /// A function parameter.
    pub const PARAM: SymbolFlags = SymbolFlags(1 << 2);
    /// A `const` binding.
    pub const CONST: SymbolFlags = SymbolFlags(1 << 3);
    /// Captured by an inner function; lives in a cell, not a plain slot.
    pub const CELL: SymbolFlags = SymbolFlags(1 << 4);
    /// Captured from an enclosing function; resolved to an upvalue.
    pub const FREE: SymbolFlags = SymbolFlags(1 << 5);

    /// Check if a flag is set.
    #[inline]
    pub const fn contains(self, other: SymbolFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Combine flags.
    #[inline]
    pub const fn union(self, other: SymbolFlags) -> SymbolFlags {
        SymbolFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for SymbolFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for SymbolFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Information about one name in a scope.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// The name.
    pub name: Rc<str>,
    /// Classification flags.
    pub flags: SymbolFlags,
}

impl Symbol {
    /// Create an unclassified symbol.
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            flags: SymbolFlags::NONE,
        }
    }

    /// Declared in this scope.
    #[inline]
    pub fn is_defined(&self) -> bool {
        self.flags.contains(SymbolFlags::DEF)
    }

    /// Lives in a cell (captured by an inner function).
    #[inline]
    pub fn is_cell(&self) -> bool {
        self.flags.contains(SymbolFlags::CELL)
    }

    /// Captured from an enclosing function.
    #[inline]
    pub fn is_free(&self) -> bool {
        self.flags.contains(SymbolFlags::FREE)
    }

    /// Declared `const`.
    #[inline]
    pub fn is_const(&self) -> bool {
        self.flags.contains(SymbolFlags::CONST)
    }
}

/// One analyzed scope.
#[derive(Debug)]
pub struct Scope {
    /// Scope kind.
    pub kind: ScopeKind,
    /// Function name, or `<module>`.
    pub name: Rc<str>,
    /// True for `async fn` bodies; for the module, true once it contains
    /// a top-level `await`.
    pub is_async: bool,
    /// Symbols seen in this scope.
    pub symbols: FxHashMap<Rc<str>, Symbol>,
    /// Child function scopes, in source order. The compiler consumes them
    /// in the same order it encounters the declarations.
    pub children: Vec<Scope>,
}

impl Scope {
    /// Create an empty scope.
    pub fn new(kind: ScopeKind, name: impl Into<Rc<str>>) -> Self {
        Self {
            kind,
            name: name.into(),
            is_async: false,
            symbols: FxHashMap::default(),
            children: Vec::new(),
        }
    }

    /// Record a declaration.
    pub fn define(&mut self, name: impl Into<Rc<str>>, flags: SymbolFlags) {
        let name = name.into();
        self.symbols
            .entry(name.clone())
            .or_insert_with(|| Symbol::new(name))
            .flags |= flags | SymbolFlags::DEF;
    }

    /// Record a reference.
    pub fn mark_use(&mut self, name: impl Into<Rc<str>>) {
        let name = name.into();
        self.symbols
            .entry(name.clone())
            .or_insert_with(|| Symbol::new(name))
            .flags |= SymbolFlags::USE;
    }

    /// Look up a symbol.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Set a flag on an existing (or new) symbol.
    pub fn mark(&mut self, name: impl Into<Rc<str>>, flags: SymbolFlags) {
        let name = name.into();
        self.symbols
            .entry(name.clone())
            .or_insert_with(|| Symbol::new(name))
            .flags |= flags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = SymbolFlags::DEF | SymbolFlags::CONST;
        assert!(flags.contains(SymbolFlags::DEF));
        assert!(flags.contains(SymbolFlags::CONST));
        assert!(!flags.contains(SymbolFlags::CELL));
    }

    #[test]
    fn test_define_and_use() {
        let mut scope = Scope::new(ScopeKind::Function, "f");
        scope.define("x", SymbolFlags::PARAM);
        scope.mark_use("y");

        assert!(scope.lookup("x").unwrap().is_defined());
        assert!(!scope.lookup("y").unwrap().is_defined());
        assert!(scope.lookup("y").unwrap().flags.contains(SymbolFlags::USE));
    }
}
