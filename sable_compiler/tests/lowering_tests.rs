//! Shape-level checks on compiled output: opcode selection, metadata, and
//! the compile/encode/decode pipeline.

use sable_compiler::{format, Compiler};
use sable_core::bytecode::{disassemble, validate_tree, CodeObject, Opcode};
use std::rc::Rc;

fn compile(source: &str) -> Rc<CodeObject> {
    let code = Compiler::compile_source(source).unwrap();
    validate_tree(&code).unwrap();
    code
}

fn count_ops(code: &CodeObject, opcode: Opcode) -> usize {
    code.instructions
        .iter()
        .filter(|i| i.opcode == opcode)
        .count()
}

#[test]
fn test_module_ends_with_halt() {
    let code = compile("let x = 1\nx");
    assert_eq!(code.instructions.last().unwrap().opcode, Opcode::Halt);
    // `x` feeds Halt directly; only the let is popped into its slot.
    assert_eq!(count_ops(&code, Opcode::StoreLocal), 1);
}

#[test]
fn test_functions_end_with_implicit_return() {
    let code = compile("fn f() { 1 }\nf()");
    let f = &code.functions[0];
    let tail: Vec<Opcode> = f.instructions[f.instructions.len() - 2..]
        .iter()
        .map(|i| i.opcode)
        .collect();
    assert_eq!(tail, vec![Opcode::LoadVoid, Opcode::Return]);
}

#[test]
fn test_await_compiles_to_await_opcode() {
    let code = compile("async fn f() { return 1 }\nawait f()");
    assert_eq!(count_ops(&code, Opcode::Await), 1);
    assert!(code.functions[0].is_async);
}

#[test]
fn test_short_circuit_uses_jump_or_pop() {
    let code = compile("let a = 1\nlet b = 2\na and b or a");
    assert_eq!(count_ops(&code, Opcode::JumpIfFalseOrPop), 1);
    assert_eq!(count_ops(&code, Opcode::JumpIfTrueOrPop), 1);
}

#[test]
fn test_loop_has_single_back_edge() {
    let code = compile("let i = 0\nwhile i < 3 { i += 1 }");
    // One unconditional back jump, one conditional exit.
    assert_eq!(count_ops(&code, Opcode::Jump), 1);
    assert_eq!(count_ops(&code, Opcode::JumpIfFalse), 1);
    let back = code
        .instructions
        .iter()
        .enumerate()
        .find(|(_, i)| i.opcode == Opcode::Jump)
        .unwrap();
    assert!((back.1.a as usize) < back.0, "back edge jumps backward");
}

#[test]
fn test_constants_deduplicated_across_statements() {
    let code = compile("let a = 42\nlet b = 42\nlet c = 42\na + b + c");
    let forty_twos = code
        .constants
        .iter()
        .filter(|c| matches!(c, sable_core::bytecode::Constant::Int(42)))
        .count();
    assert_eq!(forty_twos, 1);
}

#[test]
fn test_capture_metadata_survives_round_trip() {
    let code = compile(
        "fn outer(n) {\n fn inner(x) { return x + n }\n return inner\n}\nouter(1)(2)",
    );
    let decoded = format::decode(&format::encode(&code)).unwrap();
    let outer = &decoded.functions[0];
    assert_eq!(outer.cell_slots, 1);
    assert_eq!(outer.cell_params.len(), 1);
    assert_eq!(outer.functions[0].captures.len(), 1);
}

#[test]
fn test_line_table_tracks_statements() {
    let code = compile("let a = 1\nlet b = 2\n\n\na + b");
    // The add on line 5 maps back to line 5.
    let add_pc = code
        .instructions
        .iter()
        .position(|i| i.opcode == Opcode::Add)
        .unwrap() as u32;
    assert_eq!(code.line_for_pc(add_pc), Some(5));
}

#[test]
fn test_disassembly_lists_nested_functions() {
    let code = compile("fn twice(n) { return n * 2 }\ntwice(4)");
    let listing = disassemble(&code);
    assert!(listing.contains("<module>"));
    assert!(listing.contains("twice"));
    assert!(listing.contains("Call"));
}

#[test]
fn test_struct_table_only_on_root() {
    let code = compile(
        "struct P { x: int }\nfn mk(v) { return P(v) }\nmk(1).x",
    );
    assert_eq!(code.structs.len(), 1);
    assert!(code.functions[0].structs.is_empty());
    // Construction inside the nested function still indexes the root table.
    assert_eq!(count_ops(&code.functions[0], Opcode::NewStruct), 1);
}
