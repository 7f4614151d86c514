//! Runtime value model.
//!
//! [`Value`] is a closed tagged union; every value on an operand stack or in
//! an environment has a determinate tag, and no operation coerces between
//! incompatible tags except the single Int→Float promotion defined in
//! [`crate::ops`].
//!
//! Aggregate values (lists, maps, struct instances) and captured variables
//! are shared through `Rc` cells; the longest-living closure or task holding
//! a cell keeps it alive. Execution is single-threaded by design, so there
//! is no interior locking.

use crate::builtins::Builtin;
use crate::error::{Failure, FailureKind};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared, growable list storage.
pub type ListRef = Rc<RefCell<Vec<Value>>>;
/// Shared map storage.
pub type MapRef = Rc<RefCell<FxHashMap<MapKey, Value>>>;
/// A shared mutable variable cell (captured upvalue or cell-local).
pub type CellRef = Rc<RefCell<Value>>;

// =============================================================================
// Value
// =============================================================================

/// A Sable runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// The unit value.
    Void,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer. Arithmetic is checked; overflow fails.
    Int(i64),
    /// IEEE-754 double.
    Float(f64),
    /// Immutable string.
    Str(Rc<str>),
    /// Ordered, growable sequence.
    List(ListRef),
    /// Unordered map with hashable keys.
    Map(MapRef),
    /// Fixed-shape struct or contract instance.
    Struct(Rc<StructInstance>),
    /// A callable closure; concrete representation is backend-specific.
    Closure(Rc<dyn Callable>),
    /// A builtin function.
    Builtin(Builtin),
    /// Handle to an async task's completion cell.
    Task(TaskHandle),
}

impl Value {
    /// Build a string value.
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    /// Build a list value from elements.
    pub fn list(elements: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(elements)))
    }

    /// Build an empty map value.
    pub fn map() -> Self {
        Self::Map(Rc::new(RefCell::new(FxHashMap::default())))
    }

    /// The tag name used in diagnostics and by the `type` builtin.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Struct(_) => "struct",
            Self::Closure(_) => "function",
            Self::Builtin(_) => "function",
            Self::Task(_) => "task",
        }
    }

    /// Integer payload, if this is an `Int`.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float payload, if this is a `Float`.
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Numeric payload promoted to `f64` (Int or Float).
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// True if this is `Void`.
    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Void
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            // `{:?}` keeps a trailing `.0` on integral floats, so `5.0`
            // and `5` render distinctly on both backends.
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                // Sorted for deterministic rendering; map storage itself is
                // unordered.
                let map = entries.borrow();
                let mut keys: Vec<MapKey> = map.keys().cloned().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {}", map[key])?;
                }
                write!(f, "}}")
            }
            Self::Struct(instance) => {
                write!(f, "{}(", instance.ty.name)?;
                let slots = instance.slots.borrow();
                for (i, (name, value)) in instance.ty.fields.iter().zip(slots.iter()).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, ")")
            }
            Self::Closure(c) => write!(f, "<fn {}>", c.name()),
            Self::Builtin(b) => write!(f, "<builtin {}>", b.name()),
            Self::Task(handle) => match &*handle.status() {
                TaskStatus::Pending(id) => write!(f, "<task #{} pending>", id.0),
                TaskStatus::Completed(_) => write!(f, "<task completed>"),
                TaskStatus::Failed(_) => write!(f, "<task failed>"),
            },
        }
    }
}

// =============================================================================
// Map Keys
// =============================================================================

/// The hashable subset of [`Value`] usable as a map key.
///
/// Floats, aggregates and callables are not hashable; using one as a key is
/// a `TypeMismatch` failure, enforced by [`MapKey::from_value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    /// Boolean key.
    Bool(bool),
    /// Integer key.
    Int(i64),
    /// String key.
    Str(Rc<str>),
}

impl MapKey {
    /// Convert a value into a key, or fail with `TypeMismatch`.
    pub fn from_value(value: &Value) -> Result<Self, Failure> {
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Str(s) => Ok(Self::Str(s.clone())),
            other => Err(Failure::new(
                FailureKind::TypeMismatch,
                format!("{} is not hashable as a map key", other.type_name()),
            )),
        }
    }

    /// Convert back into a value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

// =============================================================================
// Struct / Contract Types
// =============================================================================

/// A struct or contract type: a named, ordered field list declared once at
/// compile time. Instances are fixed-shape; no dynamic field addition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    /// Declared type name.
    pub name: Rc<str>,
    /// Field names, in declaration order. Slot N holds field N.
    pub fields: Box<[Rc<str>]>,
    /// Declared field type annotations, parallel to `fields` (informational;
    /// the runtime does not enforce them).
    pub field_types: Box<[Rc<str>]>,
    /// True for `contract` declarations.
    pub is_contract: bool,
}

impl StructType {
    /// Resolve a field name to its slot index.
    pub fn field_slot(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| &**f == name)
    }
}

/// An event type: a named, ordered field list, used by `emit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventType {
    /// Declared event name.
    pub name: Rc<str>,
    /// Field names, in declaration order.
    pub fields: Box<[Rc<str>]>,
}

/// A struct/contract instance: its type plus one slot per declared field.
#[derive(Debug)]
pub struct StructInstance {
    /// The declared type.
    pub ty: Rc<StructType>,
    /// Field slots, in declaration order. Length always equals
    /// `ty.fields.len()`.
    pub slots: RefCell<Vec<Value>>,
}

impl StructInstance {
    /// Create an instance from slot values in declared field order.
    ///
    /// The caller (compiler or interpreter) guarantees the count matches the
    /// declaration; a mismatch here is an internal invariant violation.
    pub fn new(ty: Rc<StructType>, slots: Vec<Value>) -> Self {
        debug_assert_eq!(slots.len(), ty.fields.len());
        Self {
            ty,
            slots: RefCell::new(slots),
        }
    }

    /// Read field slot `slot`.
    pub fn get(&self, slot: usize) -> Option<Value> {
        self.slots.borrow().get(slot).cloned()
    }

    /// Write field slot `slot`. Returns false if the slot is out of shape.
    pub fn set(&self, slot: usize, value: Value) -> bool {
        match self.slots.borrow_mut().get_mut(slot) {
            Some(target) => {
                *target = value;
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// Callables
// =============================================================================

/// The seam between the shared value model and backend-specific function
/// representations.
///
/// The VM's bytecode closure and the interpreter's AST function both
/// implement this; callers downcast through [`Callable::as_any`] to their
/// own concrete type and fail with `NotCallable` on a foreign one.
pub trait Callable: fmt::Debug {
    /// Function name for diagnostics.
    fn name(&self) -> &str;
    /// Declared parameter count.
    fn arity(&self) -> usize;
    /// True for `async fn`.
    fn is_async(&self) -> bool;
    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

// =============================================================================
// Task Handles
// =============================================================================

/// Identifier of a task within one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u32);

/// Completion state of an async task, as observed through its handle.
#[derive(Debug, Clone)]
pub enum TaskStatus {
    /// Still owned by a scheduler.
    Pending(TaskId),
    /// Finished with a value.
    Completed(Value),
    /// Finished with a failure (including cancellation).
    Failed(Failure),
}

/// A shared handle to a task's completion cell.
///
/// The scheduler that owns the task resolves the cell exactly once; any
/// number of holders (awaiting tasks, the host) observe the transition.
#[derive(Debug, Clone)]
pub struct TaskHandle(Rc<RefCell<TaskStatus>>);

impl TaskHandle {
    /// A handle for a task the scheduler has yet to complete.
    pub fn pending(id: TaskId) -> Self {
        Self(Rc::new(RefCell::new(TaskStatus::Pending(id))))
    }

    /// A handle that is already completed (eager backends, literals).
    pub fn completed(value: Value) -> Self {
        Self(Rc::new(RefCell::new(TaskStatus::Completed(value))))
    }

    /// A handle that is already failed.
    pub fn failed(failure: Failure) -> Self {
        Self(Rc::new(RefCell::new(TaskStatus::Failed(failure))))
    }

    /// Current status. The borrow is released when the guard drops.
    pub fn status(&self) -> std::cell::Ref<'_, TaskStatus> {
        self.0.borrow()
    }

    /// The task id, while still pending.
    pub fn pending_id(&self) -> Option<TaskId> {
        match &*self.0.borrow() {
            TaskStatus::Pending(id) => Some(*id),
            _ => None,
        }
    }

    /// Resolve the cell with a value. Pending-state transition only.
    pub fn complete(&self, value: Value) {
        debug_assert!(matches!(&*self.0.borrow(), TaskStatus::Pending(_)));
        *self.0.borrow_mut() = TaskStatus::Completed(value);
    }

    /// Resolve the cell with a failure.
    pub fn fail(&self, failure: Failure) {
        *self.0.borrow_mut() = TaskStatus::Failed(failure);
    }

    /// True once the cell is resolved either way.
    pub fn is_resolved(&self) -> bool {
        !matches!(&*self.0.borrow(), TaskStatus::Pending(_))
    }

    /// Identity comparison (two clones of one handle are the same task).
    pub fn same_as(&self, other: &TaskHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Void.type_name(), "void");
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::str("x").type_name(), "string");
        assert_eq!(Value::list(vec![]).type_name(), "list");
    }

    #[test]
    fn test_display_scalars() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Float(5.0).to_string(), "5.0");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::str("hi").to_string(), "hi");
        assert_eq!(Value::Void.to_string(), "void");
    }

    #[test]
    fn test_display_list() {
        let v = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(v.to_string(), "[1, 2]");
    }

    #[test]
    fn test_display_map_is_sorted() {
        let v = Value::map();
        if let Value::Map(m) = &v {
            m.borrow_mut()
                .insert(MapKey::Str("b".into()), Value::Int(2));
            m.borrow_mut()
                .insert(MapKey::Str("a".into()), Value::Int(1));
        }
        assert_eq!(v.to_string(), "{a: 1, b: 2}");
    }

    #[test]
    fn test_map_key_rejects_unhashable() {
        assert!(MapKey::from_value(&Value::Float(1.5)).is_err());
        assert!(MapKey::from_value(&Value::list(vec![])).is_err());
        assert!(MapKey::from_value(&Value::Int(3)).is_ok());
    }

    #[test]
    fn test_struct_slots() {
        let ty = Rc::new(StructType {
            name: "Point".into(),
            fields: vec!["x".into(), "y".into()].into_boxed_slice(),
            field_types: vec!["int".into(), "int".into()].into_boxed_slice(),
            is_contract: false,
        });
        assert_eq!(ty.field_slot("y"), Some(1));
        assert_eq!(ty.field_slot("z"), None);

        let inst = StructInstance::new(ty, vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(inst.get(1), Some(Value::Int(2))));
        assert!(inst.set(0, Value::Int(9)));
        assert!(matches!(inst.get(0), Some(Value::Int(9))));
        assert!(!inst.set(5, Value::Void));
    }

    #[test]
    fn test_task_handle_transitions() {
        let h = TaskHandle::pending(TaskId(1));
        assert!(!h.is_resolved());
        assert_eq!(h.pending_id(), Some(TaskId(1)));

        let h2 = h.clone();
        h.complete(Value::Int(7));
        assert!(h2.is_resolved());
        assert!(matches!(&*h2.status(), TaskStatus::Completed(Value::Int(7))));
    }
}
