//! Builtin function table.
//!
//! Builtins resolve at compile time (after locals and captures) and are the
//! only values that perform I/O. Output goes through a host-supplied sink so
//! both backends and the test harness observe identical output.

use crate::error::{Failure, FailureKind};
use crate::ops;
use crate::value::{MapKey, Value};
use std::io::Write;

/// A builtin function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Write arguments separated by spaces, no trailing newline.
    Print,
    /// Like `print` with a trailing newline.
    Println,
    /// Length of a list, string or map.
    Len,
    /// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
    Range,
    /// Render any value as a string.
    Str,
    /// Convert to integer.
    Int,
    /// Convert to float.
    Float,
    /// Tag name of a value.
    Type,
    /// Absolute value.
    Abs,
    /// Minimum of a list or of the arguments.
    Min,
    /// Maximum of a list or of the arguments.
    Max,
    /// Sum of a numeric list.
    Sum,
    /// Append to a list; returns the list.
    Push,
    /// Remove and return the last element (or the element at an index).
    Pop,
    /// Keys of a map, sorted.
    Keys,
    /// Values of a map, in sorted-key order.
    Values,
    /// Membership test.
    Contains,
}

/// All builtins, in table order. The index is the compile-time operand of
/// the `LoadBuiltin` instruction, so the order is part of the bytecode
/// format and must not be reshuffled.
pub const BUILTINS: [Builtin; 17] = [
    Builtin::Print,
    Builtin::Println,
    Builtin::Len,
    Builtin::Range,
    Builtin::Str,
    Builtin::Int,
    Builtin::Float,
    Builtin::Type,
    Builtin::Abs,
    Builtin::Min,
    Builtin::Max,
    Builtin::Sum,
    Builtin::Push,
    Builtin::Pop,
    Builtin::Keys,
    Builtin::Values,
    Builtin::Contains,
];

impl Builtin {
    /// Source-level name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Println => "println",
            Self::Len => "len",
            Self::Range => "range",
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Type => "type",
            Self::Abs => "abs",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Keys => "keys",
            Self::Values => "values",
            Self::Contains => "contains",
        }
    }

    /// Resolve a source name to a builtin.
    pub fn lookup(name: &str) -> Option<Builtin> {
        BUILTINS.iter().copied().find(|b| b.name() == name)
    }

    /// Table index, used as the `LoadBuiltin` operand.
    pub fn index(self) -> u16 {
        BUILTINS
            .iter()
            .position(|b| *b == self)
            .expect("builtin present in table") as u16
    }

    /// Builtin for a table index.
    pub fn from_index(index: u16) -> Option<Builtin> {
        BUILTINS.get(index as usize).copied()
    }

    /// Invoke the builtin.
    pub fn invoke(self, args: &[Value], out: &mut dyn Write) -> Result<Value, Failure> {
        match self {
            Self::Print => {
                write_joined(out, args);
                Ok(Value::Void)
            }
            Self::Println => {
                write_joined(out, args);
                let _ = writeln!(out);
                Ok(Value::Void)
            }
            Self::Len => {
                let [arg] = expect_args::<1>(self, args)?;
                let len = match arg {
                    Value::List(items) => items.borrow().len(),
                    Value::Str(s) => s.chars().count(),
                    Value::Map(entries) => entries.borrow().len(),
                    other => {
                        return Err(type_failure(self, other));
                    }
                };
                Ok(Value::Int(len as i64))
            }
            Self::Range => builtin_range(args),
            Self::Str => {
                let [arg] = expect_args::<1>(self, args)?;
                Ok(Value::str(arg.to_string()))
            }
            Self::Int => {
                let [arg] = expect_args::<1>(self, args)?;
                builtin_int(arg)
            }
            Self::Float => {
                let [arg] = expect_args::<1>(self, args)?;
                match arg {
                    Value::Int(i) => Ok(Value::Float(*i as f64)),
                    Value::Float(f) => Ok(Value::Float(*f)),
                    Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
                    Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                        Failure::new(
                            FailureKind::TypeMismatch,
                            format!("cannot convert '{s}' to float"),
                        )
                    }),
                    other => Err(type_failure(self, other)),
                }
            }
            Self::Type => {
                let [arg] = expect_args::<1>(self, args)?;
                let name = match arg {
                    Value::Struct(instance) => instance.ty.name.to_string(),
                    other => other.type_name().to_string(),
                };
                Ok(Value::str(name))
            }
            Self::Abs => {
                let [arg] = expect_args::<1>(self, args)?;
                match arg {
                    Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(Failure::overflow),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => Err(type_failure(self, other)),
                }
            }
            Self::Min => builtin_extreme(self, args, ops::lt),
            Self::Max => builtin_extreme(self, args, ops::gt),
            Self::Sum => {
                let [arg] = expect_args::<1>(self, args)?;
                let items = match arg {
                    Value::List(items) => items,
                    other => return Err(type_failure(self, other)),
                };
                let mut total = Value::Int(0);
                for item in items.borrow().iter() {
                    total = ops::add(&total, item)?;
                }
                Ok(total)
            }
            Self::Push => {
                let [list, item] = expect_args::<2>(self, args)?;
                match list {
                    Value::List(items) => {
                        items.borrow_mut().push(item.clone());
                        Ok(list.clone())
                    }
                    other => Err(type_failure(self, other)),
                }
            }
            Self::Pop => builtin_pop(args),
            Self::Keys => {
                let [arg] = expect_args::<1>(self, args)?;
                match arg {
                    Value::Map(entries) => Ok(Value::list(
                        sorted_keys(entries).iter().map(MapKey::to_value).collect(),
                    )),
                    other => Err(type_failure(self, other)),
                }
            }
            Self::Values => {
                let [arg] = expect_args::<1>(self, args)?;
                match arg {
                    Value::Map(entries) => {
                        let map = entries.borrow();
                        Ok(Value::list(
                            sorted_keys(entries)
                                .iter()
                                .map(|k| map[k].clone())
                                .collect(),
                        ))
                    }
                    other => Err(type_failure(self, other)),
                }
            }
            Self::Contains => {
                let [container, item] = expect_args::<2>(self, args)?;
                ops::contains(container, item)
            }
        }
    }
}

// =============================================================================
// Individual Builtins
// =============================================================================

fn builtin_range(args: &[Value]) -> Result<Value, Failure> {
    let (start, stop, step) = match args {
        [stop] => (0, require_int(stop)?, 1),
        [start, stop] => (require_int(start)?, require_int(stop)?, 1),
        [start, stop, step] => (require_int(start)?, require_int(stop)?, require_int(step)?),
        _ => {
            return Err(arity_failure(Builtin::Range, "1 to 3", args.len()));
        }
    };
    if step == 0 {
        return Err(Failure::new(
            FailureKind::TypeMismatch,
            "range step must not be zero",
        ));
    }
    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::list(items))
}

fn builtin_int(arg: &Value) -> Result<Value, Failure> {
    match arg {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => {
            let truncated = f.trunc();
            if !truncated.is_finite()
                || truncated < i64::MIN as f64
                || truncated >= i64::MAX as f64
            {
                return Err(Failure::overflow());
            }
            Ok(Value::Int(truncated as i64))
        }
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            Failure::new(
                FailureKind::TypeMismatch,
                format!("cannot convert '{s}' to int"),
            )
        }),
        other => Err(type_failure(Builtin::Int, other)),
    }
}

/// `min`/`max` over a single list argument or over the arguments themselves.
fn builtin_extreme(
    builtin: Builtin,
    args: &[Value],
    beats: fn(&Value, &Value) -> Result<Value, Failure>,
) -> Result<Value, Failure> {
    let candidates: Vec<Value> = match args {
        [Value::List(items)] => items.borrow().clone(),
        [] => {
            return Err(arity_failure(builtin, "at least 1", 0));
        }
        _ => args.to_vec(),
    };
    let mut iter = candidates.into_iter();
    let mut best = iter.next().ok_or_else(|| {
        Failure::new(
            FailureKind::TypeMismatch,
            format!("{}() of an empty list", builtin.name()),
        )
    })?;
    for candidate in iter {
        if ops::truthy(&beats(&candidate, &best)?) {
            best = candidate;
        }
    }
    Ok(best)
}

fn builtin_pop(args: &[Value]) -> Result<Value, Failure> {
    let (list, index) = match args {
        [list] => (list, None),
        [list, index] => (list, Some(require_int(index)?)),
        _ => {
            return Err(arity_failure(Builtin::Pop, "1 or 2", args.len()));
        }
    };
    let items = match list {
        Value::List(items) => items,
        other => return Err(type_failure(Builtin::Pop, other)),
    };
    let mut items = items.borrow_mut();
    let len = items.len();
    let raw = index.unwrap_or(-1);
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved as usize >= len {
        return Err(Failure::index_out_of_range(raw, len));
    }
    Ok(items.remove(resolved as usize))
}

// =============================================================================
// Helpers
// =============================================================================

fn write_joined(out: &mut dyn Write, args: &[Value]) {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            let _ = write!(out, " ");
        }
        let _ = write!(out, "{arg}");
    }
}

fn sorted_keys(entries: &crate::value::MapRef) -> Vec<MapKey> {
    let mut keys: Vec<MapKey> = entries.borrow().keys().cloned().collect();
    keys.sort();
    keys
}

fn require_int(v: &Value) -> Result<i64, Failure> {
    v.as_int().ok_or_else(|| {
        Failure::new(
            FailureKind::TypeMismatch,
            format!("expected int, got {}", v.type_name()),
        )
    })
}

fn expect_args<const N: usize>(builtin: Builtin, args: &[Value]) -> Result<&[Value; N], Failure> {
    args.try_into()
        .map_err(|_| arity_failure(builtin, &N.to_string(), args.len()))
}

fn arity_failure(builtin: Builtin, expected: &str, got: usize) -> Failure {
    Failure::new(
        FailureKind::ArityMismatch,
        format!(
            "{}() takes {expected} argument(s), got {got}",
            builtin.name()
        ),
    )
}

fn type_failure(builtin: Builtin, got: &Value) -> Failure {
    Failure::new(
        FailureKind::TypeMismatch,
        format!("{}() does not accept {}", builtin.name(), got.type_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(builtin: Builtin, args: &[Value]) -> Result<Value, Failure> {
        let mut sink = Vec::new();
        builtin.invoke(args, &mut sink)
    }

    #[test]
    fn test_lookup_round_trip() {
        for builtin in BUILTINS {
            assert_eq!(Builtin::lookup(builtin.name()), Some(builtin));
            assert_eq!(Builtin::from_index(builtin.index()), Some(builtin));
        }
        assert_eq!(Builtin::lookup("no_such"), None);
    }

    #[test]
    fn test_print_output() {
        let mut sink = Vec::new();
        Builtin::Println
            .invoke(&[Value::Int(1), Value::str("two")], &mut sink)
            .unwrap();
        assert_eq!(String::from_utf8(sink).unwrap(), "1 two\n");
    }

    #[test]
    fn test_len() {
        assert!(matches!(
            call(Builtin::Len, &[Value::str("abc")]).unwrap(),
            Value::Int(3)
        ));
        assert!(matches!(
            call(Builtin::Len, &[Value::list(vec![Value::Void])]).unwrap(),
            Value::Int(1)
        ));
        assert!(call(Builtin::Len, &[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_range_forms() {
        let v = call(Builtin::Range, &[Value::Int(3)]).unwrap();
        assert_eq!(v.to_string(), "[0, 1, 2]");

        let v = call(Builtin::Range, &[Value::Int(2), Value::Int(5)]).unwrap();
        assert_eq!(v.to_string(), "[2, 3, 4]");

        let v = call(
            Builtin::Range,
            &[Value::Int(5), Value::Int(0), Value::Int(-2)],
        )
        .unwrap();
        assert_eq!(v.to_string(), "[5, 3, 1]");

        assert!(call(Builtin::Range, &[Value::Int(1), Value::Int(5), Value::Int(0)]).is_err());
    }

    #[test]
    fn test_conversions() {
        assert!(matches!(
            call(Builtin::Int, &[Value::str(" 42 ")]).unwrap(),
            Value::Int(42)
        ));
        assert!(matches!(
            call(Builtin::Int, &[Value::Float(3.9)]).unwrap(),
            Value::Int(3)
        ));
        assert!(call(Builtin::Int, &[Value::str("x")]).is_err());
        assert!(matches!(
            call(Builtin::Float, &[Value::Int(2)]).unwrap(),
            Value::Float(x) if x == 2.0
        ));
        assert!(matches!(
            call(Builtin::Str, &[Value::Int(7)]).unwrap(),
            Value::Str(s) if &*s == "7"
        ));
    }

    #[test]
    fn test_abs_overflow() {
        let err = call(Builtin::Abs, &[Value::Int(i64::MIN)]).unwrap_err();
        assert_eq!(err.kind, FailureKind::Overflow);
    }

    #[test]
    fn test_min_max_sum() {
        let list = Value::list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert!(matches!(call(Builtin::Min, &[list.clone()]).unwrap(), Value::Int(1)));
        assert!(matches!(call(Builtin::Max, &[list.clone()]).unwrap(), Value::Int(3)));
        assert!(matches!(call(Builtin::Sum, &[list]).unwrap(), Value::Int(6)));

        assert!(matches!(
            call(Builtin::Max, &[Value::Int(1), Value::Int(9), Value::Int(4)]).unwrap(),
            Value::Int(9)
        ));
        assert!(call(Builtin::Min, &[Value::list(vec![])]).is_err());
    }

    #[test]
    fn test_sum_overflow() {
        let list = Value::list(vec![Value::Int(i64::MAX), Value::Int(1)]);
        let err = call(Builtin::Sum, &[list]).unwrap_err();
        assert_eq!(err.kind, FailureKind::Overflow);
    }

    #[test]
    fn test_push_pop() {
        let list = Value::list(vec![Value::Int(1)]);
        call(Builtin::Push, &[list.clone(), Value::Int(2)]).unwrap();
        assert_eq!(list.to_string(), "[1, 2]");

        let popped = call(Builtin::Pop, &[list.clone()]).unwrap();
        assert!(matches!(popped, Value::Int(2)));

        let popped = call(Builtin::Pop, &[list.clone(), Value::Int(0)]).unwrap();
        assert!(matches!(popped, Value::Int(1)));

        assert!(call(Builtin::Pop, &[list]).is_err());
    }

    #[test]
    fn test_keys_values_sorted() {
        let map = Value::map();
        ops::index_set(&map, &Value::str("b"), Value::Int(2)).unwrap();
        ops::index_set(&map, &Value::str("a"), Value::Int(1)).unwrap();
        assert_eq!(call(Builtin::Keys, &[map.clone()]).unwrap().to_string(), "[a, b]");
        assert_eq!(call(Builtin::Values, &[map]).unwrap().to_string(), "[1, 2]");
    }
}
