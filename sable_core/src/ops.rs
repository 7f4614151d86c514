//! Operation semantics, defined once.
//!
//! Every arithmetic, comparison, truthiness and indexing rule of the
//! language lives here as a pure function over [`Value`]; the VM's opcode
//! handlers and the interpreter's expression evaluator both delegate to
//! these, so backend parity holds by construction.
//!
//! Numeric rules:
//!
//! - Integer arithmetic is checked; any result outside `i64` is an
//!   `Overflow` failure, never a wrapped value.
//! - Int→Float promotion happens exactly when one operand of an arithmetic
//!   or comparison operation is a Float. No other implicit coercion exists.
//! - `/` is true division and always yields Float; division or modulo by
//!   zero of either tag is `DivisionByZero`.
//! - Float arithmetic follows IEEE-754 defaults: infinities and NaN
//!   propagate and comparisons involving NaN are false.

use crate::error::{Failure, FailureKind};
use crate::value::{MapKey, Value};

// =============================================================================
// Truthiness
// =============================================================================

/// Truthiness of a value: empty/zero/void are false, everything else true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Void => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::List(items) => !items.borrow().is_empty(),
        Value::Map(entries) => !entries.borrow().is_empty(),
        Value::Struct(_) | Value::Closure(_) | Value::Builtin(_) | Value::Task(_) => true,
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

/// `a + b`: checked integer add, float add, string or list concatenation.
pub fn add(a: &Value, b: &Value) -> Result<Value, Failure> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_add(*y)
            .map(Value::Int)
            .ok_or_else(Failure::overflow),
        (Value::Str(x), Value::Str(y)) => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Ok(Value::str(s))
        }
        (Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        _ => float_binary(a, b, "+", |x, y| x + y),
    }
}

/// `a - b`.
pub fn sub(a: &Value, b: &Value) -> Result<Value, Failure> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_sub(*y)
            .map(Value::Int)
            .ok_or_else(Failure::overflow),
        _ => float_binary(a, b, "-", |x, y| x - y),
    }
}

/// `a * b`.
pub fn mul(a: &Value, b: &Value) -> Result<Value, Failure> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_mul(*y)
            .map(Value::Int)
            .ok_or_else(Failure::overflow),
        _ => float_binary(a, b, "*", |x, y| x * y),
    }
}

/// `a / b`: true division, always Float.
pub fn div(a: &Value, b: &Value) -> Result<Value, Failure> {
    let x = number_operand(a, b, "/")?;
    let y = number_operand(b, a, "/")?;
    if y == 0.0 {
        return Err(Failure::division_by_zero());
    }
    Ok(Value::Float(x / y))
}

/// `a % b`: Euclidean modulo on integers (result has the divisor's sign
/// convention of Euclidean division), float modulo otherwise.
pub fn rem(a: &Value, b: &Value) -> Result<Value, Failure> {
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => Err(Failure::division_by_zero()),
        (Value::Int(x), Value::Int(y)) => x
            .checked_rem_euclid(*y)
            .map(Value::Int)
            .ok_or_else(Failure::overflow),
        _ => {
            let x = number_operand(a, b, "%")?;
            let y = number_operand(b, a, "%")?;
            if y == 0.0 {
                return Err(Failure::division_by_zero());
            }
            Ok(Value::Float(x - y * (x / y).floor()))
        }
    }
}

/// `a ** b`: integer power for non-negative integer exponents (checked via
/// i128), float power otherwise.
pub fn pow(a: &Value, b: &Value) -> Result<Value, Failure> {
    if let (Value::Int(base), Value::Int(exp)) = (a, b) {
        if *exp >= 0 {
            return int_pow(*base, *exp).map(Value::Int);
        }
        // Negative exponent falls through to float semantics.
    }
    float_binary(a, b, "**", f64::powf)
}

fn int_pow(base: i64, exp: i64) -> Result<i64, Failure> {
    debug_assert!(exp >= 0);
    // Bases whose powers never grow can take any exponent.
    match base {
        0 => return Ok(if exp == 0 { 1 } else { 0 }),
        1 => return Ok(1),
        -1 => return Ok(if exp % 2 == 0 { 1 } else { -1 }),
        _ => {}
    }
    let exp = u32::try_from(exp).map_err(|_| Failure::overflow())?;
    let wide = (base as i128).checked_pow(exp).ok_or_else(Failure::overflow)?;
    i64::try_from(wide).map_err(|_| Failure::overflow())
}

/// Unary `-a`.
pub fn neg(a: &Value) -> Result<Value, Failure> {
    match a {
        Value::Int(x) => x.checked_neg().map(Value::Int).ok_or_else(Failure::overflow),
        Value::Float(x) => Ok(Value::Float(-x)),
        other => Err(Failure::new(
            FailureKind::TypeMismatch,
            format!("bad operand type for unary '-': {}", other.type_name()),
        )),
    }
}

/// Unary logical `not a`.
pub fn not(a: &Value) -> Value {
    Value::Bool(!truthy(a))
}

// =============================================================================
// Bitwise
// =============================================================================

/// `a & b` (integers only).
pub fn bit_and(a: &Value, b: &Value) -> Result<Value, Failure> {
    int_binary(a, b, "&", |x, y| Ok(x & y))
}

/// `a | b`.
pub fn bit_or(a: &Value, b: &Value) -> Result<Value, Failure> {
    int_binary(a, b, "|", |x, y| Ok(x | y))
}

/// `a ^ b`.
pub fn bit_xor(a: &Value, b: &Value) -> Result<Value, Failure> {
    int_binary(a, b, "^", |x, y| Ok(x ^ y))
}

/// Unary `~a`.
pub fn bit_not(a: &Value) -> Result<Value, Failure> {
    match a {
        Value::Int(x) => Ok(Value::Int(!x)),
        other => Err(Failure::new(
            FailureKind::TypeMismatch,
            format!("bad operand type for unary '~': {}", other.type_name()),
        )),
    }
}

/// `a << b`: fails with `Overflow` when the shift amount is out of range or
/// when shifted-out bits would change the value.
pub fn shl(a: &Value, b: &Value) -> Result<Value, Failure> {
    int_binary(a, b, "<<", |x, y| {
        if !(0..64).contains(&y) {
            return Err(Failure::new(FailureKind::Overflow, "shift amount out of range"));
        }
        let shifted = x.wrapping_shl(y as u32);
        if shifted.wrapping_shr(y as u32) != x {
            return Err(Failure::overflow());
        }
        Ok(shifted)
    })
}

/// `a >> b`: arithmetic shift; the shift amount must be in `0..64`.
pub fn shr(a: &Value, b: &Value) -> Result<Value, Failure> {
    int_binary(a, b, ">>", |x, y| {
        if !(0..64).contains(&y) {
            return Err(Failure::new(FailureKind::Overflow, "shift amount out of range"));
        }
        Ok(x.wrapping_shr(y as u32))
    })
}

// =============================================================================
// Equality & Ordering
// =============================================================================

/// Structural equality.
///
/// Numeric values compare across Int/Float by promotion; lists and maps
/// compare element-wise; struct instances, closures and tasks compare by
/// identity; any other tag pairing is unequal.
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Void, Value::Void) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| value_eq(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| value_eq(v, other)))
        }
        (Value::Struct(x), Value::Struct(y)) => std::rc::Rc::ptr_eq(x, y),
        (Value::Closure(x), Value::Closure(y)) => {
            std::ptr::eq(std::rc::Rc::as_ptr(x), std::rc::Rc::as_ptr(y))
        }
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Task(x), Value::Task(y)) => x.same_as(y),
        _ => false,
    }
}

/// `a == b` as a value.
pub fn eq(a: &Value, b: &Value) -> Result<Value, Failure> {
    Ok(Value::Bool(value_eq(a, b)))
}

/// `a != b` as a value.
pub fn ne(a: &Value, b: &Value) -> Result<Value, Failure> {
    Ok(Value::Bool(!value_eq(a, b)))
}

/// `a < b`.
pub fn lt(a: &Value, b: &Value) -> Result<Value, Failure> {
    ordered(a, b, "<", |o| o == std::cmp::Ordering::Less, |x, y| x < y)
}

/// `a <= b`.
pub fn le(a: &Value, b: &Value) -> Result<Value, Failure> {
    ordered(a, b, "<=", |o| o != std::cmp::Ordering::Greater, |x, y| x <= y)
}

/// `a > b`.
pub fn gt(a: &Value, b: &Value) -> Result<Value, Failure> {
    ordered(a, b, ">", |o| o == std::cmp::Ordering::Greater, |x, y| x > y)
}

/// `a >= b`.
pub fn ge(a: &Value, b: &Value) -> Result<Value, Failure> {
    ordered(a, b, ">=", |o| o != std::cmp::Ordering::Less, |x, y| x >= y)
}

// =============================================================================
// Indexing
// =============================================================================

/// `obj[index]` for lists, strings and maps.
///
/// List and string indices are integers and may be negative (from the end);
/// map lookups require a hashable key and fail with `UnknownKey` if absent.
pub fn index_get(obj: &Value, index: &Value) -> Result<Value, Failure> {
    match obj {
        Value::List(items) => {
            let items = items.borrow();
            let idx = normalize_index(index, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(index, chars.len())?;
            Ok(Value::str(chars[idx].to_string()))
        }
        Value::Map(entries) => {
            let key = MapKey::from_value(index)?;
            entries.borrow().get(&key).cloned().ok_or_else(|| {
                Failure::new(FailureKind::UnknownKey, format!("key {key} not found in map"))
            })
        }
        other => Err(Failure::new(
            FailureKind::TypeMismatch,
            format!("{} is not indexable", other.type_name()),
        )),
    }
}

/// `obj[index] = value` for lists and maps. Map assignment inserts.
pub fn index_set(obj: &Value, index: &Value, value: Value) -> Result<(), Failure> {
    match obj {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let idx = normalize_index(index, len)?;
            items[idx] = value;
            Ok(())
        }
        Value::Map(entries) => {
            let key = MapKey::from_value(index)?;
            entries.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(Failure::new(
            FailureKind::TypeMismatch,
            format!("{} does not support index assignment", other.type_name()),
        )),
    }
}

/// `obj.name` for struct instances (declared fields) and maps (string keys).
pub fn field_get(obj: &Value, name: &str) -> Result<Value, Failure> {
    match obj {
        Value::Struct(instance) => match instance.ty.field_slot(name) {
            Some(slot) => Ok(instance
                .get(slot)
                .expect("field slot within declared shape")),
            None => Err(unknown_field(&instance.ty.name, name)),
        },
        Value::Map(entries) => entries
            .borrow()
            .get(&MapKey::Str(name.into()))
            .cloned()
            .ok_or_else(|| {
                Failure::new(FailureKind::UnknownKey, format!("key {name} not found in map"))
            }),
        other => Err(Failure::new(
            FailureKind::TypeMismatch,
            format!("{} has no fields", other.type_name()),
        )),
    }
}

/// `obj.name = value` for struct instances and maps.
pub fn field_set(obj: &Value, name: &str, value: Value) -> Result<(), Failure> {
    match obj {
        Value::Struct(instance) => match instance.ty.field_slot(name) {
            Some(slot) => {
                let ok = instance.set(slot, value);
                debug_assert!(ok, "field slot within declared shape");
                Ok(())
            }
            None => Err(unknown_field(&instance.ty.name, name)),
        },
        Value::Map(entries) => {
            entries.borrow_mut().insert(MapKey::Str(name.into()), value);
            Ok(())
        }
        other => Err(Failure::new(
            FailureKind::TypeMismatch,
            format!("{} has no fields", other.type_name()),
        )),
    }
}

/// Membership test: value in list, key in map, substring in string.
pub fn contains(container: &Value, item: &Value) -> Result<Value, Failure> {
    match container {
        Value::List(items) => Ok(Value::Bool(
            items.borrow().iter().any(|v| value_eq(v, item)),
        )),
        Value::Map(entries) => {
            let key = MapKey::from_value(item)?;
            Ok(Value::Bool(entries.borrow().contains_key(&key)))
        }
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(Value::Bool(s.contains(&**needle))),
            other => Err(Failure::new(
                FailureKind::TypeMismatch,
                format!("cannot search a string for {}", other.type_name()),
            )),
        },
        other => Err(Failure::new(
            FailureKind::TypeMismatch,
            format!("{} is not a container", other.type_name()),
        )),
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn unknown_field(ty: &str, name: &str) -> Failure {
    Failure::new(
        FailureKind::UnknownField,
        format!("unknown field '{name}' on {ty}"),
    )
}

/// Resolve a (possibly negative) integer index against `len`.
fn normalize_index(index: &Value, len: usize) -> Result<usize, Failure> {
    let raw = index.as_int().ok_or_else(|| {
        Failure::new(
            FailureKind::TypeMismatch,
            format!("index must be int, not {}", index.type_name()),
        )
    })?;
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved as usize >= len {
        return Err(Failure::index_out_of_range(raw, len));
    }
    Ok(resolved as usize)
}

/// Mixed-mode float fallback for an arithmetic operator.
fn float_binary(
    a: &Value,
    b: &Value,
    op: &str,
    f: impl FnOnce(f64, f64) -> f64,
) -> Result<Value, Failure> {
    let x = number_operand(a, b, op)?;
    let y = number_operand(b, a, op)?;
    Ok(Value::Float(f(x, y)))
}

fn number_operand(v: &Value, other: &Value, op: &str) -> Result<f64, Failure> {
    v.as_number()
        .ok_or_else(|| Failure::type_mismatch(op, v.type_name(), other.type_name()))
}

/// Integer-only binary operator.
fn int_binary(
    a: &Value,
    b: &Value,
    op: &str,
    f: impl FnOnce(i64, i64) -> Result<i64, Failure>,
) -> Result<Value, Failure> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => f(*x, *y).map(Value::Int),
        _ => Err(Failure::type_mismatch(op, a.type_name(), b.type_name())),
    }
}

/// Ordering comparison over numbers and strings.
///
/// Integer pairs use exact ordering; any float operand switches to IEEE
/// partial ordering (NaN comparisons are false). Strings are lexicographic.
fn ordered(
    a: &Value,
    b: &Value,
    op: &str,
    int_check: impl FnOnce(std::cmp::Ordering) -> bool,
    float_check: impl FnOnce(f64, f64) -> bool,
) -> Result<Value, Failure> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Bool(int_check(x.cmp(y)))),
        (Value::Str(x), Value::Str(y)) => Ok(Value::Bool(int_check(x.cmp(y)))),
        _ => {
            let x = a
                .as_number()
                .ok_or_else(|| Failure::type_mismatch(op, a.type_name(), b.type_name()))?;
            let y = b
                .as_number()
                .ok_or_else(|| Failure::type_mismatch(op, a.type_name(), b.type_name()))?;
            Ok(Value::Bool(float_check(x, y)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_int_add_and_overflow() {
        let v = add(&Value::Int(2), &Value::Int(3)).unwrap();
        assert!(matches!(v, Value::Int(5)));

        let err = add(&Value::Int(i64::MAX), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, FailureKind::Overflow);
    }

    #[test]
    fn test_mixed_promotion() {
        let v = add(&Value::Int(1), &Value::Float(0.5)).unwrap();
        assert!(matches!(v, Value::Float(x) if x == 1.5));

        let v = mul(&Value::Float(2.0), &Value::Int(3)).unwrap();
        assert!(matches!(v, Value::Float(x) if x == 6.0));
    }

    #[test]
    fn test_true_division() {
        let v = div(&Value::Int(10), &Value::Int(4)).unwrap();
        assert!(matches!(v, Value::Float(x) if x == 2.5));

        let err = div(&Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, FailureKind::DivisionByZero);

        let err = div(&Value::Float(1.0), &Value::Float(0.0)).unwrap_err();
        assert_eq!(err.kind, FailureKind::DivisionByZero);
    }

    #[test]
    fn test_euclidean_modulo() {
        assert!(matches!(
            rem(&Value::Int(-7), &Value::Int(3)).unwrap(),
            Value::Int(2)
        ));
        let err = rem(&Value::Int(5), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, FailureKind::DivisionByZero);
    }

    #[test]
    fn test_int_pow() {
        assert!(matches!(
            pow(&Value::Int(2), &Value::Int(10)).unwrap(),
            Value::Int(1024)
        ));
        assert!(matches!(
            pow(&Value::Int(-1), &Value::Int(1_000_000_001)).unwrap(),
            Value::Int(-1)
        ));
        let err = pow(&Value::Int(2), &Value::Int(64)).unwrap_err();
        assert_eq!(err.kind, FailureKind::Overflow);

        // Negative exponent switches to float.
        assert!(matches!(
            pow(&Value::Int(2), &Value::Int(-1)).unwrap(),
            Value::Float(x) if x == 0.5
        ));
    }

    #[test]
    fn test_neg_overflow() {
        let err = neg(&Value::Int(i64::MIN)).unwrap_err();
        assert_eq!(err.kind, FailureKind::Overflow);
    }

    #[test]
    fn test_string_concat() {
        let v = add(&Value::str("ab"), &Value::str("cd")).unwrap();
        assert!(matches!(v, Value::Str(s) if &*s == "abcd"));
    }

    #[test]
    fn test_shift_overflow() {
        assert!(matches!(
            shl(&Value::Int(1), &Value::Int(4)).unwrap(),
            Value::Int(16)
        ));
        let err = shl(&Value::Int(1), &Value::Int(64)).unwrap_err();
        assert_eq!(err.kind, FailureKind::Overflow);
        let err = shl(&Value::Int(i64::MAX), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, FailureKind::Overflow);
    }

    #[test]
    fn test_equality_across_tags() {
        assert!(truthy(&eq(&Value::Int(1), &Value::Float(1.0)).unwrap()));
        assert!(!truthy(&eq(&Value::Int(1), &Value::str("1")).unwrap()));
        assert!(truthy(
            &eq(
                &Value::list(vec![Value::Int(1)]),
                &Value::list(vec![Value::Int(1)])
            )
            .unwrap()
        ));
    }

    #[test]
    fn test_ordering() {
        assert!(truthy(&lt(&Value::Int(1), &Value::Int(2)).unwrap()));
        assert!(truthy(&ge(&Value::Float(2.0), &Value::Int(2)).unwrap()));
        assert!(truthy(&lt(&Value::str("a"), &Value::str("b")).unwrap()));
        // NaN never orders.
        assert!(!truthy(
            &lt(&Value::Float(f64::NAN), &Value::Float(1.0)).unwrap()
        ));
        assert!(lt(&Value::Bool(true), &Value::Bool(false)).is_err());
    }

    #[test]
    fn test_list_indexing() {
        let list = Value::list(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        assert!(matches!(
            index_get(&list, &Value::Int(1)).unwrap(),
            Value::Int(20)
        ));
        assert!(matches!(
            index_get(&list, &Value::Int(-1)).unwrap(),
            Value::Int(30)
        ));
        let err = index_get(&list, &Value::Int(3)).unwrap_err();
        assert_eq!(err.kind, FailureKind::IndexOutOfRange);
    }

    #[test]
    fn test_map_get_set() {
        let map = Value::map();
        index_set(&map, &Value::str("k"), Value::Int(5)).unwrap();
        assert!(matches!(
            index_get(&map, &Value::str("k")).unwrap(),
            Value::Int(5)
        ));
        let err = index_get(&map, &Value::str("missing")).unwrap_err();
        assert_eq!(err.kind, FailureKind::UnknownKey);
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&Value::Void));
        assert!(!truthy(&Value::Int(0)));
        assert!(!truthy(&Value::str("")));
        assert!(truthy(&Value::str("x")));
        assert!(!truthy(&Value::list(vec![])));
        assert!(truthy(&Value::Float(0.5)));
    }

    #[test]
    fn test_contains() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(truthy(&contains(&list, &Value::Int(2)).unwrap()));
        assert!(!truthy(&contains(&list, &Value::Int(9)).unwrap()));
        assert!(truthy(
            &contains(&Value::str("hello"), &Value::str("ell")).unwrap()
        ));
    }
}
