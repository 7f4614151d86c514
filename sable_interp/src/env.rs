//! Environment chain.

use rustc_hash::{FxHashMap, FxHashSet};
use sable_core::error::{Failure, FailureKind};
use sable_core::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared handle to an environment; closures keep their defining
/// environment alive through this.
pub type EnvRef = Rc<RefCell<Env>>;

/// One lexical environment: bindings plus a parent link.
#[derive(Debug, Default)]
pub struct Env {
    vars: FxHashMap<Rc<str>, Value>,
    consts: FxHashSet<Rc<str>>,
    parent: Option<EnvRef>,
}

impl Env {
    /// The root (global) environment.
    pub fn root() -> EnvRef {
        Rc::new(RefCell::new(Env::default()))
    }

    /// A child environment for a call or loop body.
    pub fn child(parent: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Env {
            vars: FxHashMap::default(),
            consts: FxHashSet::default(),
            parent: Some(parent.clone()),
        }))
    }

    /// Declare a binding in this environment.
    pub fn define(&mut self, name: Rc<str>, value: Value, is_const: bool) {
        if is_const {
            self.consts.insert(name.clone());
        }
        self.vars.insert(name, value);
    }

    /// Assign to an existing binding, walking the chain outward.
    pub fn assign(env: &EnvRef, name: &str, value: Value) -> Result<(), Failure> {
        let mut current = env.clone();
        loop {
            {
                let mut borrowed = current.borrow_mut();
                if borrowed.vars.contains_key(name) {
                    if borrowed.consts.contains(name) {
                        return Err(Failure::new(
                            FailureKind::TypeMismatch,
                            format!("cannot reassign const '{name}'"),
                        ));
                    }
                    borrowed.vars.insert(name.into(), value);
                    return Ok(());
                }
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(parent) => current = parent,
                None => {
                    return Err(Failure::new(
                        FailureKind::UnknownName,
                        format!("cannot assign to undeclared name '{name}'"),
                    ));
                }
            }
        }
    }

    /// Read a binding, walking the chain outward.
    pub fn get(env: &EnvRef, name: &str) -> Option<Value> {
        let mut current = env.clone();
        loop {
            if let Some(value) = current.borrow().vars.get(name) {
                return Some(value.clone());
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(parent) => current = parent,
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let root = Env::root();
        root.borrow_mut().define("x".into(), Value::Int(1), false);
        assert!(matches!(Env::get(&root, "x"), Some(Value::Int(1))));
        assert!(Env::get(&root, "y").is_none());
    }

    #[test]
    fn test_child_sees_parent() {
        let root = Env::root();
        root.borrow_mut().define("x".into(), Value::Int(1), false);
        let child = Env::child(&root);
        assert!(matches!(Env::get(&child, "x"), Some(Value::Int(1))));
    }

    #[test]
    fn test_assign_reaches_parent() {
        let root = Env::root();
        root.borrow_mut().define("x".into(), Value::Int(1), false);
        let child = Env::child(&root);
        Env::assign(&child, "x", Value::Int(2)).unwrap();
        assert!(matches!(Env::get(&root, "x"), Some(Value::Int(2))));
    }

    #[test]
    fn test_const_rejected() {
        let root = Env::root();
        root.borrow_mut().define("k".into(), Value::Int(1), true);
        assert!(Env::assign(&root, "k", Value::Int(2)).is_err());
    }

    #[test]
    fn test_shadowing() {
        let root = Env::root();
        root.borrow_mut().define("x".into(), Value::Int(1), false);
        let child = Env::child(&root);
        child.borrow_mut().define("x".into(), Value::Int(9), false);
        assert!(matches!(Env::get(&child, "x"), Some(Value::Int(9))));
        assert!(matches!(Env::get(&root, "x"), Some(Value::Int(1))));
    }
}
