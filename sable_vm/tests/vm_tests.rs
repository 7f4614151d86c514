//! End-to-end VM execution tests: source through compiler through machine.

mod common;

use common::{eval, eval_failure, run_vm, run_vm_capture, run_vm_with_machine};
use sable_compiler::{format, Compiler};
use sable_core::error::{FailureKind, SableError};
use sable_core::Value;
use sable_vm::Machine;

fn assert_int(source: &str, expected: i64) {
    match eval(source) {
        Value::Int(actual) => assert_eq!(actual, expected, "for {source}"),
        other => panic!("expected Int({expected}), got {other:?} for {source}"),
    }
}

// =============================================================================
// Basics
// =============================================================================

#[test]
fn test_let_binding_and_arithmetic() {
    assert_int("let x = 5; let y = x + 3; y", 8);
}

#[test]
fn test_declaration_result_is_void() {
    assert!(eval("let x = 1").is_void());
    assert!(eval("").is_void());
}

#[test]
fn test_numeric_semantics() {
    assert_int("7 % 3", 1);
    assert_int("-7 % 3", 2); // Euclidean
    assert_int("2 ** 10", 1024);
    assert!(matches!(eval("10 / 4"), Value::Float(x) if x == 2.5));
    assert!(matches!(eval("1 + 0.5"), Value::Float(x) if x == 1.5));
    assert_int("(1 << 4) | 3", 19);
    assert_int("~0", -1);
}

#[test]
fn test_string_and_list_concat() {
    assert!(matches!(eval("\"ab\" + \"cd\""), Value::Str(s) if &*s == "abcd"));
    assert_int("len([1, 2] + [3])", 3);
}

#[test]
fn test_comparisons_and_logic() {
    assert!(matches!(eval("1 < 2 and 2 < 3"), Value::Bool(true)));
    assert!(matches!(eval("not (1 == 1.0)"), Value::Bool(false)));
    // Short-circuit keeps the deciding operand's value.
    assert_int("0 or 5", 5);
    assert_int("0 and 5", 0);
    assert!(matches!(eval("\"\" or \"x\""), Value::Str(s) if &*s == "x"));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_integer_overflow_fails() {
    let failure = eval_failure(&format!("{} + 1", i64::MAX));
    assert_eq!(failure.kind, FailureKind::Overflow);

    let failure = eval_failure(&format!("{} * 2", i64::MIN));
    assert_eq!(failure.kind, FailureKind::Overflow);

    // Overflow is enforced inside loops too, not just at entry points.
    let failure = eval_failure("let x = 1\nwhile true { x = x * 3 }");
    assert_eq!(failure.kind, FailureKind::Overflow);
}

#[test]
fn test_division_by_zero_carries_line() {
    let failure = eval_failure("let a = 1\nlet b = a / 0\nb");
    assert_eq!(failure.kind, FailureKind::DivisionByZero);
    assert_eq!(failure.line, Some(2));
}

#[test]
fn test_index_out_of_range() {
    let failure = eval_failure("let xs = [1, 2]\nxs[5]");
    assert_eq!(failure.kind, FailureKind::IndexOutOfRange);
}

#[test]
fn test_type_mismatch() {
    let failure = eval_failure("1 + \"x\"");
    assert_eq!(failure.kind, FailureKind::TypeMismatch);
}

#[test]
fn test_not_callable() {
    let failure = eval_failure("let x = 3\nx()");
    assert_eq!(failure.kind, FailureKind::NotCallable);
}

#[test]
fn test_runtime_arity_mismatch_through_binding() {
    // Calling through a rebound name defeats the static check; the frame
    // setup still refuses.
    let failure = eval_failure("fn f(a, b) { return a }\nlet g = f\ng(1)");
    assert_eq!(failure.kind, FailureKind::ArityMismatch);
}

#[test]
fn test_deep_recursion_fails_cleanly() {
    let failure = eval_failure("fn f(n) { return f(n + 1) }\nf(0)");
    assert_eq!(failure.kind, FailureKind::StackOverflow);
}

// =============================================================================
// Control Flow
// =============================================================================

#[test]
fn test_if_elif_else() {
    let source = "fn grade(n) {\n if n >= 90 { return \"a\" }\n elif n >= 80 { return \"b\" }\n else { return \"c\" }\n}\ngrade(85)";
    assert!(matches!(eval(source), Value::Str(s) if &*s == "b"));
}

#[test]
fn test_while_with_break_continue() {
    let source = "let total = 0\nlet i = 0\nwhile true {\n i += 1\n if i > 10 { break }\n if i % 2 == 0 { continue }\n total += i\n}\ntotal";
    assert_int(source, 25); // 1 + 3 + 5 + 7 + 9
}

#[test]
fn test_for_over_range_and_list() {
    assert_int("let t = 0\nfor i in range(5) { t += i }\nt", 10);
    assert_int("let t = 0\nfor x in [2, 4, 6] { t += x }\nt", 12);
}

#[test]
fn test_for_over_string() {
    assert_int("let n = 0\nfor c in \"abc\" { n += 1 }\nn", 3);
}

#[test]
fn test_nested_loops() {
    let source = "let t = 0\nfor i in range(3) {\n for j in range(3) {\n  if j == 2 { break }\n  t += 1\n }\n}\nt";
    assert_int(source, 6);
}

// =============================================================================
// Functions & Closures
// =============================================================================

#[test]
fn test_recursive_factorial() {
    assert_int(
        "fn f(n) { if n == 0 { return 1 } return n * f(n - 1) }\nf(5)",
        120,
    );
}

#[test]
fn test_mutual_recursion() {
    let source = "fn is_even(n) { if n == 0 { return true } return is_odd(n - 1) }\nfn is_odd(n) { if n == 0 { return false } return is_even(n - 1) }\nis_even(10)";
    assert!(matches!(eval(source), Value::Bool(true)));
}

#[test]
fn test_closure_captures_parameter() {
    let source = "fn adder(n) {\n fn add(x) { return x + n }\n return add\n}\nlet add2 = adder(2)\nadd2(40)";
    assert_int(source, 42);
}

#[test]
fn test_closures_share_captured_cell() {
    let source = "fn counter() {\n let n = 0\n fn bump() { n = n + 1; return n }\n fn peek() { return n }\n return [bump, peek]\n}\nlet fns = counter()\nfns[0]()\nfns[0]()\nfns[1]()";
    assert_int(source, 2);
}

#[test]
fn test_two_independent_counters() {
    let source = "fn counter() {\n let n = 0\n fn bump() { n = n + 1; return n }\n return bump\n}\nlet a = counter()\nlet b = counter()\na()\na()\nb()";
    assert_int(source, 1);
}

#[test]
fn test_two_level_capture() {
    let source = "fn a() {\n let v = 10\n fn b() {\n  fn c() { return v + 1 }\n  return c\n }\n return b\n}\na()()()";
    assert_int(source, 11);
}

#[test]
fn test_implicit_return_is_void() {
    assert!(eval("fn f() { let x = 1 }\nf()").is_void());
}

// =============================================================================
// Structs, Contracts & Events
// =============================================================================

#[test]
fn test_struct_field_read_by_declared_order() {
    // Named-argument binding is compile-time: reading `b` returns the value
    // passed for `b` regardless of source argument order.
    let source = "struct T { a: int, b: int, c: int }\nlet t = T(c: 3, a: 1, b: 2)\nt.b";
    assert_int(source, 2);
    let source = "struct T { a: int, b: int, c: int }\nlet t = T(1, 2, 3)\nt.b";
    assert_int(source, 2);
}

#[test]
fn test_struct_field_mutation() {
    let source = "struct P { x: int, y: int }\nlet p = P(1, 2)\np.x = 10\np.y += 5\np.x + p.y";
    assert_int(source, 17);
}

#[test]
fn test_field_access_through_parameter() {
    // Receiver type unknown statically: the name-resolved path.
    let source = "struct P { x: int, y: int }\nfn get_x(p) { return p.x }\nget_x(P(7, 8))";
    assert_int(source, 7);
}

#[test]
fn test_unknown_field_on_dynamic_receiver() {
    let source = "struct P { x: int }\nfn get(p) { return p.nope }\nget(P(1))";
    let failure = eval_failure(source);
    assert_eq!(failure.kind, FailureKind::UnknownField);
}

#[test]
fn test_contract_is_struct_shaped() {
    let source = "contract Vault { owner: string, balance: int }\nlet v = Vault(\"ann\", 100)\nv.balance -= 30\nv.balance";
    assert_int(source, 70);
}

#[test]
fn test_events_are_logged_in_order() {
    let source = "event Ping(n: int)\nfor i in range(3) { emit Ping(i) }\n\"done\"";
    let (result, machine) = run_vm_with_machine(source);
    result.unwrap();
    let events = machine.events();
    assert_eq!(events.len(), 3);
    assert_eq!(&*events[0].name, "Ping");
    assert!(matches!(events[2].values[0], Value::Int(2)));
}

// =============================================================================
// Containers
// =============================================================================

#[test]
fn test_list_operations() {
    assert_int("let xs = [1, 2, 3]\nxs[1] = 20\nxs[0] + xs[1] + xs[-1]", 24);
    assert_int("let xs = []\npush(xs, 5)\npush(xs, 6)\npop(xs) + len(xs)", 7);
}

#[test]
fn test_map_operations() {
    assert_int("let m = {a: 1, \"b\": 2}\nm[\"c\"] = 3\nm[\"a\"] + m[\"b\"] + m[\"c\"]", 6);
    assert_int("let m = {x: 10}\nm.x + len(m)", 11);
    let failure = eval_failure("let m = {a: 1}\nm[\"zz\"]");
    assert_eq!(failure.kind, FailureKind::UnknownKey);
}

#[test]
fn test_map_field_sugar_assignment() {
    assert_int("let m = {count: 1}\nm.count += 4\nm.count", 5);
}

#[test]
fn test_compound_index_assignment() {
    assert_int("let xs = [10, 20]\nxs[1] += 5\nxs[1]", 25);
}

// =============================================================================
// Builtins & Output
// =============================================================================

#[test]
fn test_print_and_println() {
    let (result, output) = run_vm_capture("print(\"a\", 1)\nprintln(\"!\")\nprintln(2)");
    result.unwrap();
    assert_eq!(output, "a 1!\n2\n");
}

#[test]
fn test_builtin_conversions_and_aggregates() {
    assert_int("int(\"42\") + int(2.9)", 44);
    assert!(matches!(eval("str(12) + str(true)"), Value::Str(s) if &*s == "12true"));
    assert_int("min([4, 2, 9]) + max(1, 7, 3)", 9);
    assert_int("sum(range(1, 11))", 55);
    assert!(matches!(eval("contains([1, 2], 2)"), Value::Bool(true)));
    assert!(matches!(eval("type([])"), Value::Str(s) if &*s == "list"));
}

// =============================================================================
// Serialized Bytecode
// =============================================================================

#[test]
fn test_run_from_decoded_container() {
    let source = "struct P { x: int, y: int }\nfn dist2(p) { return p.x * p.x + p.y * p.y }\ndist2(P(3, 4))";
    let code = Compiler::compile_source(source).unwrap();
    let decoded = format::decode(&format::encode(&code)).unwrap();

    let direct = Machine::with_output(std::io::sink()).run(code).unwrap();
    let loaded = Machine::with_output(std::io::sink()).run(decoded).unwrap();
    assert!(matches!(direct, Value::Int(25)));
    assert!(matches!(loaded, Value::Int(25)));
}

#[test]
fn test_machine_rejects_corrupt_code() {
    let code = Compiler::compile_source("while true { break }").unwrap();
    let mut bad = (*code).clone();
    let mut instructions = bad.instructions.to_vec();
    instructions
        .iter_mut()
        .find(|i| i.opcode.is_jump())
        .expect("loop compiles to a jump")
        .a = 500;
    bad.instructions = instructions.into_boxed_slice();

    let result = Machine::with_output(std::io::sink()).run(std::rc::Rc::new(bad));
    assert!(matches!(result, Err(SableError::Bytecode(_))));
}

#[test]
fn test_shared_list_between_bindings() {
    // Lists are shared by reference.
    assert_int("let a = [1]\nlet b = a\npush(b, 2)\nlen(a)", 2);
}

#[test]
fn test_result_of_expression_statement_only() {
    // The program result is the last statement's value.
    assert_int("let x = 41\nx + 1", 42);
    assert!(run_vm("let x = 41\nlet y = x").unwrap().is_void());
}
