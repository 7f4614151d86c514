//! Bytecode data model.
//!
//! A compiled function is a [`CodeObject`]: a linear instruction sequence, a
//! constant pool, and metadata (arity, slot counts, capture list, nested
//! function table). Instructions are a fixed-format opcode plus up to two
//! `u16` operands; every opcode has a fixed stack effect, so runtime stack
//! depth is bounded by source nesting depth.
//!
//! [`validate_tree`] is the load-time gate: the VM refuses to execute a code
//! object whose jump targets or indices fall outside their tables, so the
//! hot dispatch loop never re-checks them.

use crate::error::MalformedBytecode;
use crate::value::{EventType, StructType, Value};
use std::fmt;
use std::rc::Rc;

// =============================================================================
// Opcodes
// =============================================================================

/// Bytecode operations for the stack machine.
///
/// Operand meanings are noted per opcode; `a`/`b` refer to the two
/// instruction operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// No effect.
    Nop,
    /// Discard the top of stack.
    Pop,
    /// Duplicate the top of stack.
    Dup,
    /// Duplicate the top two values, preserving order.
    Dup2,

    /// Push constant `a`.
    LoadConst,
    /// Push `void`.
    LoadVoid,
    /// Push `true`.
    LoadTrue,
    /// Push `false`.
    LoadFalse,

    /// Push local slot `a`.
    LoadLocal,
    /// Pop into local slot `a`.
    StoreLocal,
    /// Push the value of cell slot `a`.
    LoadCell,
    /// Pop into cell slot `a`.
    StoreCell,
    /// Push the value of upvalue `a`.
    LoadUpvalue,
    /// Pop into upvalue `a`.
    StoreUpvalue,
    /// Push builtin `a`.
    LoadBuiltin,

    /// Pop two, push sum.
    Add,
    /// Pop two, push difference.
    Sub,
    /// Pop two, push product.
    Mul,
    /// Pop two, push true-division quotient.
    Div,
    /// Pop two, push modulo.
    Mod,
    /// Pop two, push power.
    Pow,
    /// Pop one, push arithmetic negation.
    Neg,
    /// Pop one, push logical negation.
    Not,

    /// Pop two, push equality.
    Eq,
    /// Pop two, push inequality.
    Ne,
    /// Pop two, push less-than.
    Lt,
    /// Pop two, push less-or-equal.
    Le,
    /// Pop two, push greater-than.
    Gt,
    /// Pop two, push greater-or-equal.
    Ge,

    /// Pop two, push bitwise and.
    BitAnd,
    /// Pop two, push bitwise or.
    BitOr,
    /// Pop two, push bitwise xor.
    BitXor,
    /// Pop one, push bitwise complement.
    BitNot,
    /// Pop two, push left shift.
    Shl,
    /// Pop two, push right shift.
    Shr,

    /// Jump to instruction `a`.
    Jump,
    /// Pop; jump to `a` if falsy.
    JumpIfFalse,
    /// Pop; jump to `a` if truthy.
    JumpIfTrue,
    /// If top is falsy jump to `a` keeping it, else pop (short-circuit and).
    JumpIfFalseOrPop,
    /// If top is truthy jump to `a` keeping it, else pop (short-circuit or).
    JumpIfTrueOrPop,

    /// Push a closure over function table entry `a`, capturing per its list.
    MakeClosure,
    /// Pop `a` arguments and a callee; invoke.
    Call,
    /// Pop the return value, pop the frame.
    Return,

    /// Pop `a` elements, push a list.
    BuildList,
    /// Pop `a` key/value pairs, push a map.
    BuildMap,
    /// Pop index and object, push `obj[index]`.
    Index,
    /// Pop value, index and object; `obj[index] = value`.
    StoreIndex,

    /// Pop `b` field values; push an instance of struct table entry `a`.
    NewStruct,
    /// Pop a struct instance, push field slot `a`.
    GetField,
    /// Pop value and instance; write field slot `a`.
    SetField,
    /// Pop an object, push the field named by string constant `a`.
    GetFieldNamed,
    /// Pop value and object; write the field named by string constant `a`.
    SetFieldNamed,

    /// Pop an awaitable; push its result, or suspend the task.
    Await,
    /// Pop `b` values; append an event table entry `a` record to the log.
    EmitEvent,

    /// Stop the task, completing it with the top of stack (or `void`).
    Halt,
}

/// Opcode table in discriminant order; used by the decoder.
const OPCODES: &[Opcode] = &[
    Opcode::Nop,
    Opcode::Pop,
    Opcode::Dup,
    Opcode::Dup2,
    Opcode::LoadConst,
    Opcode::LoadVoid,
    Opcode::LoadTrue,
    Opcode::LoadFalse,
    Opcode::LoadLocal,
    Opcode::StoreLocal,
    Opcode::LoadCell,
    Opcode::StoreCell,
    Opcode::LoadUpvalue,
    Opcode::StoreUpvalue,
    Opcode::LoadBuiltin,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Mod,
    Opcode::Pow,
    Opcode::Neg,
    Opcode::Not,
    Opcode::Eq,
    Opcode::Ne,
    Opcode::Lt,
    Opcode::Le,
    Opcode::Gt,
    Opcode::Ge,
    Opcode::BitAnd,
    Opcode::BitOr,
    Opcode::BitXor,
    Opcode::BitNot,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Jump,
    Opcode::JumpIfFalse,
    Opcode::JumpIfTrue,
    Opcode::JumpIfFalseOrPop,
    Opcode::JumpIfTrueOrPop,
    Opcode::MakeClosure,
    Opcode::Call,
    Opcode::Return,
    Opcode::BuildList,
    Opcode::BuildMap,
    Opcode::Index,
    Opcode::StoreIndex,
    Opcode::NewStruct,
    Opcode::GetField,
    Opcode::SetField,
    Opcode::GetFieldNamed,
    Opcode::SetFieldNamed,
    Opcode::Await,
    Opcode::EmitEvent,
    Opcode::Halt,
];

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        OPCODES.get(byte as usize).copied()
    }

    /// Encode as a byte.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True if operand `a` is an instruction index.
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jump
                | Self::JumpIfFalse
                | Self::JumpIfTrue
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
        )
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// One fixed-format instruction: an opcode and two operands.
///
/// Unused operands are zero. Operand meaning is per-opcode (constant index,
/// absolute jump target, slot index, argument count).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// The operation.
    pub opcode: Opcode,
    /// First operand.
    pub a: u16,
    /// Second operand.
    pub b: u16,
}

impl Instruction {
    /// Operand-less instruction.
    #[inline]
    pub fn op(opcode: Opcode) -> Self {
        Self { opcode, a: 0, b: 0 }
    }

    /// Instruction with one operand.
    #[inline]
    pub fn op_a(opcode: Opcode, a: u16) -> Self {
        Self { opcode, a, b: 0 }
    }

    /// Instruction with two operands.
    #[inline]
    pub fn op_ab(opcode: Opcode, a: u16, b: u16) -> Self {
        Self { opcode, a, b }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.a, self.b) {
            (0, 0) => write!(f, "{:?}", self.opcode),
            (a, 0) => write!(f, "{:?} {a}", self.opcode),
            (a, b) => write!(f, "{:?} {a}, {b}", self.opcode),
        }
    }
}

// =============================================================================
// Constants
// =============================================================================

/// A constant-pool entry. Only immutable scalar values are constants;
/// functions live in the function table, aggregates are built at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `void`.
    Void,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// String.
    Str(Rc<str>),
}

impl Constant {
    /// Materialize as a runtime value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Void => Value::Void,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(f) => Value::Float(*f),
            Self::Str(s) => Value::Str(s.clone()),
        }
    }

    /// String payload, if this is a string constant.
    pub fn as_str(&self) -> Option<&Rc<str>> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

// =============================================================================
// Captures
// =============================================================================

/// How the enclosing frame supplies one upvalue when building a closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Share cell slot `n` of the enclosing frame.
    Cell(u16),
    /// Re-share upvalue `n` of the enclosing closure.
    Upvalue(u16),
}

/// A parameter that inner functions capture: its value is copied from its
/// local slot into a cell on frame entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellParam {
    /// Local slot the argument was bound to.
    pub param_slot: u16,
    /// Cell slot the value is copied into.
    pub cell_slot: u16,
}

// =============================================================================
// Line Table
// =============================================================================

/// Maps an instruction range to a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTableEntry {
    /// Starting instruction index (inclusive).
    pub start_pc: u32,
    /// Ending instruction index (exclusive).
    pub end_pc: u32,
    /// 1-indexed source line.
    pub line: u32,
}

// =============================================================================
// Code Objects
// =============================================================================

/// A compiled function (or the module body, for the root object).
///
/// Immutable once built; shared via `Rc` between the function table of its
/// parent, closures over it, and live frames.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    /// Function name, or `<module>` for the root.
    pub name: Rc<str>,
    /// Declared parameter count; arguments bind to local slots `0..arity`.
    pub arity: u16,
    /// Number of local variable slots (parameters included).
    pub local_slots: u16,
    /// Number of cell slots (locals captured by inner functions).
    pub cell_slots: u16,
    /// True for `async fn` bodies (and a module body containing `await`).
    pub is_async: bool,
    /// The instruction sequence.
    pub instructions: Box<[Instruction]>,
    /// Constant pool.
    pub constants: Box<[Constant]>,
    /// How the enclosing frame builds this function's upvalues. The
    /// upvalue count of this function is `captures.len()`.
    pub captures: Box<[Capture]>,
    /// Parameters copied into cells on entry.
    pub cell_params: Box<[CellParam]>,
    /// Nested function table (operand of `MakeClosure`).
    pub functions: Box<[Rc<CodeObject>]>,
    /// Struct/contract table. Populated on the root object only; nested
    /// functions index the root's table.
    pub structs: Box<[Rc<StructType>]>,
    /// Event table. Root object only, like `structs`.
    pub events: Box<[Rc<EventType>]>,
    /// Instruction-range to source-line map.
    pub line_table: Box<[LineTableEntry]>,
}

impl CodeObject {
    /// Source line for an instruction index, if mapped.
    pub fn line_for_pc(&self, pc: u32) -> Option<u32> {
        self.line_table
            .iter()
            .find(|entry| entry.start_pc <= pc && pc < entry.end_pc)
            .map(|entry| entry.line)
    }
}

// =============================================================================
// Load-Time Validation
// =============================================================================

/// Validate a root code object and every nested function.
///
/// Checks every jump target, constant/slot/builtin/function index, struct
/// and event reference, and the internal consistency of capture lists. A
/// code object that passes needs no bounds re-checks in the dispatch loop.
pub fn validate_tree(root: &CodeObject) -> Result<(), MalformedBytecode> {
    validate_object(root, root, None)
}

fn validate_object(
    code: &CodeObject,
    root: &CodeObject,
    parent: Option<&CodeObject>,
) -> Result<(), MalformedBytecode> {
    let fail = |msg: String| Err(MalformedBytecode::new(format!("{}: {msg}", code.name)));

    if code.arity > code.local_slots {
        return fail(format!(
            "arity {} exceeds local slots {}",
            code.arity, code.local_slots
        ));
    }

    // Capture list indexes the *parent* frame.
    if let Some(parent) = parent {
        for capture in code.captures.iter() {
            match *capture {
                Capture::Cell(i) if i >= parent.cell_slots => {
                    return fail(format!("capture of cell {i} outside parent cells"));
                }
                Capture::Upvalue(i) if i as usize >= parent.captures.len() => {
                    return fail(format!("capture of upvalue {i} outside parent upvalues"));
                }
                _ => {}
            }
        }
    } else if !code.captures.is_empty() {
        return fail("root object cannot capture".to_string());
    }

    for cp in code.cell_params.iter() {
        if cp.param_slot >= code.arity || cp.cell_slot >= code.cell_slots {
            return fail(format!(
                "cell parameter ({}, {}) out of range",
                cp.param_slot, cp.cell_slot
            ));
        }
    }

    let len = code.instructions.len();
    for (pc, inst) in code.instructions.iter().enumerate() {
        let a = inst.a as usize;
        match inst.opcode {
            op if op.is_jump() => {
                if a >= len {
                    return fail(format!("jump target {a} at pc {pc} outside code of length {len}"));
                }
            }
            Opcode::LoadConst => {
                if a >= code.constants.len() {
                    return fail(format!("constant index {a} at pc {pc} out of range"));
                }
            }
            Opcode::GetFieldNamed | Opcode::SetFieldNamed => {
                match code.constants.get(a) {
                    Some(Constant::Str(_)) => {}
                    _ => return fail(format!("field-name constant {a} at pc {pc} invalid")),
                }
            }
            Opcode::LoadLocal | Opcode::StoreLocal => {
                if a >= code.local_slots as usize {
                    return fail(format!("local slot {a} at pc {pc} out of range"));
                }
            }
            Opcode::LoadCell | Opcode::StoreCell => {
                if a >= code.cell_slots as usize {
                    return fail(format!("cell slot {a} at pc {pc} out of range"));
                }
            }
            Opcode::LoadUpvalue | Opcode::StoreUpvalue => {
                if a >= code.captures.len() {
                    return fail(format!("upvalue {a} at pc {pc} out of range"));
                }
            }
            Opcode::LoadBuiltin => {
                if crate::Builtin::from_index(inst.a).is_none() {
                    return fail(format!("unknown builtin {a} at pc {pc}"));
                }
            }
            Opcode::MakeClosure => {
                if a >= code.functions.len() {
                    return fail(format!("function index {a} at pc {pc} out of range"));
                }
            }
            Opcode::NewStruct => match root.structs.get(a) {
                Some(ty) if ty.fields.len() == inst.b as usize => {}
                Some(ty) => {
                    return fail(format!(
                        "struct {} constructed with {} values, declares {}",
                        ty.name,
                        inst.b,
                        ty.fields.len()
                    ));
                }
                None => return fail(format!("struct index {a} at pc {pc} out of range")),
            },
            Opcode::EmitEvent => {
                if a >= root.events.len() {
                    return fail(format!("event index {a} at pc {pc} out of range"));
                }
            }
            _ => {}
        }
    }

    for function in code.functions.iter() {
        validate_object(function, root, Some(code))?;
    }
    Ok(())
}

// =============================================================================
// Disassembly
// =============================================================================

/// Render a code object (and nested functions) for `--disasm`.
pub fn disassemble(code: &CodeObject) -> String {
    use std::fmt::Write;

    let mut output = String::new();
    let _ = writeln!(output, "code object: {}", code.name);
    let _ = writeln!(
        output,
        "  arity: {}  locals: {}  cells: {}  upvalues: {}{}",
        code.arity,
        code.local_slots,
        code.cell_slots,
        code.captures.len(),
        if code.is_async { "  async" } else { "" },
    );

    if !code.constants.is_empty() {
        let _ = writeln!(output, "constants:");
        for (i, c) in code.constants.iter().enumerate() {
            let _ = writeln!(output, "  {i:4}: {c}");
        }
    }

    let _ = writeln!(output, "disassembly:");
    for (i, inst) in code.instructions.iter().enumerate() {
        let line = code
            .line_for_pc(i as u32)
            .map_or("    ".to_string(), |l| format!("{l:4}"));
        let _ = writeln!(output, "{line} {i:4}: {inst}");
    }

    for function in code.functions.iter() {
        output.push('\n');
        output.push_str(&disassemble(function));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_code(instructions: Vec<Instruction>) -> CodeObject {
        CodeObject {
            name: "test".into(),
            arity: 0,
            local_slots: 0,
            cell_slots: 0,
            is_async: false,
            instructions: instructions.into_boxed_slice(),
            constants: Box::new([]),
            captures: Box::new([]),
            cell_params: Box::new([]),
            functions: Box::new([]),
            structs: Box::new([]),
            events: Box::new([]),
            line_table: Box::new([]),
        }
    }

    #[test]
    fn test_opcode_round_trip() {
        for (i, op) in OPCODES.iter().enumerate() {
            assert_eq!(op.as_u8() as usize, i);
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(*op));
        }
        assert_eq!(Opcode::from_u8(200), None);
    }

    #[test]
    fn test_validate_accepts_simple() {
        let code = empty_code(vec![
            Instruction::op(Opcode::LoadVoid),
            Instruction::op(Opcode::Halt),
        ]);
        assert!(validate_tree(&code).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_jump() {
        let code = empty_code(vec![
            Instruction::op_a(Opcode::Jump, 9),
            Instruction::op(Opcode::Halt),
        ]);
        let err = validate_tree(&code).unwrap_err();
        assert!(err.message.contains("jump target"));
    }

    #[test]
    fn test_validate_rejects_bad_constant() {
        let code = empty_code(vec![Instruction::op_a(Opcode::LoadConst, 0)]);
        assert!(validate_tree(&code).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_local() {
        let code = empty_code(vec![Instruction::op_a(Opcode::LoadLocal, 2)]);
        assert!(validate_tree(&code).is_err());
    }

    #[test]
    fn test_validate_rejects_root_captures() {
        let mut code = empty_code(vec![Instruction::op(Opcode::Halt)]);
        code.captures = vec![Capture::Cell(0)].into_boxed_slice();
        assert!(validate_tree(&code).is_err());
    }

    #[test]
    fn test_line_lookup() {
        let mut code = empty_code(vec![
            Instruction::op(Opcode::Nop),
            Instruction::op(Opcode::Nop),
            Instruction::op(Opcode::Halt),
        ]);
        code.line_table = vec![
            LineTableEntry {
                start_pc: 0,
                end_pc: 2,
                line: 1,
            },
            LineTableEntry {
                start_pc: 2,
                end_pc: 3,
                line: 2,
            },
        ]
        .into_boxed_slice();
        assert_eq!(code.line_for_pc(0), Some(1));
        assert_eq!(code.line_for_pc(2), Some(2));
        assert_eq!(code.line_for_pc(3), None);
    }
}
