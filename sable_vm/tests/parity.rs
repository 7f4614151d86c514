//! Backend parity: the interpreter and the VM must produce identical
//! observable results - values, failure kinds, captured output, event
//! logs - for the same program.

mod common;

use common::SharedBuf;
use proptest::prelude::*;
use sable_compiler::Compiler;
use sable_core::error::SableError;
use sable_core::{ops, Value};
use sable_interp::Interpreter;
use sable_vm::Machine;

/// Both backends' observable outcome: result (or failure kind), captured
/// output, and the event log as rendered strings.
struct Observed {
    result: Result<Value, SableError>,
    output: String,
    events: Vec<String>,
}

fn observe_vm(source: &str) -> Observed {
    let buf = SharedBuf::new();
    let code = Compiler::compile_source(source).expect("parity corpus compiles");
    let mut machine = Machine::with_output(buf.clone());
    let result = machine.run(code);
    let events = machine
        .events()
        .iter()
        .map(|e| format!("{}:{}", e.name, Value::list(e.values.clone())))
        .collect();
    Observed {
        result,
        output: buf.contents(),
        events,
    }
}

fn observe_interp(source: &str) -> Observed {
    let buf = SharedBuf::new();
    let program = sable_parser::parse(source).expect("parity corpus parses");
    let mut interp = Interpreter::with_output(buf.clone());
    let result = interp.run(&program);
    let events = interp
        .events()
        .iter()
        .map(|e| format!("{}:{}", e.name, Value::list(e.values.clone())))
        .collect();
    Observed {
        result,
        output: buf.contents(),
        events,
    }
}

/// Assert both backends observe the same thing for `source`.
fn assert_parity(source: &str) {
    let vm = observe_vm(source);
    let interp = observe_interp(source);

    match (&vm.result, &interp.result) {
        (Ok(a), Ok(b)) => {
            assert!(
                ops::value_eq(a, b),
                "value mismatch for {source:?}: vm={a:?} interp={b:?}"
            );
        }
        (Err(SableError::Runtime(a)), Err(SableError::Runtime(b))) => {
            assert_eq!(
                a.kind, b.kind,
                "failure kind mismatch for {source:?}: vm={a:?} interp={b:?}"
            );
        }
        (a, b) => panic!("outcome mismatch for {source:?}: vm={a:?} interp={b:?}"),
    }
    assert_eq!(vm.output, interp.output, "output mismatch for {source:?}");
    assert_eq!(vm.events, interp.events, "event mismatch for {source:?}");
}

// =============================================================================
// Fixed Corpus
// =============================================================================

#[test]
fn test_parity_arithmetic() {
    assert_parity("let x = 5; let y = x + 3; y");
    assert_parity("10 / 4 + 2 ** 8 - 7 % 3");
    assert_parity("1.5 * 4 + int(\"10\") - abs(-3)");
    assert_parity("(1 << 10) ^ 255 & 129");
    assert_parity("-(2 ** 62) * 2");
}

#[test]
fn test_parity_overflow() {
    assert_parity(&format!("{} + 1", i64::MAX));
    assert_parity(&format!("{} - 1", i64::MIN));
    assert_parity("let x = 1\nwhile x < 100 { x = x * 10 }\nx * x * x * x * x * x * x * x * x * x");
}

#[test]
fn test_parity_division_by_zero() {
    assert_parity("1 / 0");
    assert_parity("1 % 0");
    assert_parity("1.0 / 0.0");
}

#[test]
fn test_parity_comparisons_and_logic() {
    assert_parity("1 == 1.0");
    assert_parity("\"abc\" < \"abd\"");
    assert_parity("0 or \"fallback\"");
    assert_parity("[] and 1");
    assert_parity("not void");
}

#[test]
fn test_parity_recursion() {
    assert_parity("fn f(n) { if n == 0 { return 1 } return n * f(n - 1) }\nf(5)");
    assert_parity(
        "fn fib(n) { if n < 2 { return n } return fib(n - 1) + fib(n - 2) }\nfib(15)",
    );
}

#[test]
fn test_parity_closures() {
    assert_parity(
        "fn counter() {\n let n = 0\n fn bump() { n = n + 1; return n }\n return bump\n}\nlet c = counter()\nc()\nc()\nc()",
    );
    assert_parity(
        "fn adder(n) {\n fn add(x) { return x + n }\n return add\n}\nadder(4)(38)",
    );
}

#[test]
fn test_parity_loops() {
    assert_parity("let t = 0\nfor i in range(100) { t += i }\nt");
    assert_parity(
        "let t = 0\nlet i = 0\nwhile i < 20 {\n i += 1\n if i % 3 == 0 { continue }\n if i > 15 { break }\n t += i\n}\nt",
    );
}

#[test]
fn test_parity_structs() {
    assert_parity(
        "struct Point { x: int, y: int }\nlet p = Point(y: 2, x: 1)\np.x * 10 + p.y",
    );
    assert_parity(
        "struct Acc { total: int }\nfn feed(a, n) { a.total += n; return a.total }\nlet a = Acc(0)\nfeed(a, 3)\nfeed(a, 4)\na.total",
    );
}

#[test]
fn test_parity_containers() {
    assert_parity("let xs = [3, 1, 2]\nxs[0] + xs[-1] * 10");
    assert_parity("let m = {a: 1, b: 2}\nm[\"a\"] + m.b + len(m)");
    assert_parity("let xs = [1]\npush(xs, 2)\npush(xs, 3)\nsum(xs)");
    assert_parity("str(keys({b: 1, a: 2})) + str(values({b: 1, a: 2}))");
    assert_parity("let xs = [5]\nxs[9]");
}

#[test]
fn test_parity_output() {
    assert_parity("print(\"x\", 1)\nprintln(\"\")\nprintln([1, 2], {a: 3})\nvoid");
    assert_parity("for i in range(3) { println(i) }");
}

#[test]
fn test_parity_events() {
    assert_parity(
        "event Moved(dx: int, dy: int)\nemit Moved(1, 2)\nemit Moved(3, 4)\nvoid",
    );
}

#[test]
fn test_parity_async_completed_before_await() {
    // The corpus where the interpreter's eager tasks and the VM scheduler
    // agree observably.
    assert_parity("async fn f() { return 7 }\nawait f()");
    assert_parity("async fn f(n) { return n * 2 }\nawait f(3) + await f(4)");
    assert_parity("async fn boom() { return 1 / 0 }\nawait boom()");
    assert_parity("await 5");
}

// =============================================================================
// Property: random arithmetic programs agree
// =============================================================================

/// A small arithmetic expression AST rendered to source text.
#[derive(Debug, Clone)]
enum ArithExpr {
    Int(i64),
    Add(Box<ArithExpr>, Box<ArithExpr>),
    Sub(Box<ArithExpr>, Box<ArithExpr>),
    Mul(Box<ArithExpr>, Box<ArithExpr>),
    Neg(Box<ArithExpr>),
}

impl ArithExpr {
    fn render(&self, out: &mut String) {
        match self {
            Self::Int(v) => out.push_str(&v.to_string()),
            Self::Add(a, b) => Self::render_binary(out, a, "+", b),
            Self::Sub(a, b) => Self::render_binary(out, a, "-", b),
            Self::Mul(a, b) => Self::render_binary(out, a, "*", b),
            Self::Neg(a) => {
                out.push_str("-(");
                a.render(out);
                out.push(')');
            }
        }
    }

    fn render_binary(out: &mut String, a: &ArithExpr, op: &str, b: &ArithExpr) {
        out.push('(');
        a.render(out);
        out.push_str(&format!(" {op} "));
        b.render(out);
        out.push(')');
    }
}

fn arb_arith() -> impl Strategy<Value = ArithExpr> {
    // Coefficients large enough that deep products overflow sometimes, so
    // the property also covers identical Overflow behavior.
    let leaf = (-1_000_000i64..1_000_000).prop_map(ArithExpr::Int);
    leaf.prop_recursive(5, 64, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| ArithExpr::Add(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| ArithExpr::Sub(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| ArithExpr::Mul(Box::new(a), Box::new(b))),
            inner.prop_map(|a| ArithExpr::Neg(Box::new(a))),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// interpret(P) == run_vm(P) for arithmetic-only programs, including
    /// programs whose true result overflows: both must fail identically.
    #[test]
    fn prop_arithmetic_parity(expr in arb_arith()) {
        let mut source = String::new();
        expr.render(&mut source);
        assert_parity(&source);
    }
}
