//! Code builder: instruction emission, labels and constant pooling.

use rustc_hash::FxHashMap;
use sable_core::bytecode::{
    Capture, CellParam, CodeObject, Constant, Instruction, LineTableEntry, Opcode,
};
use smallvec::SmallVec;
use sable_core::error::{CompileError, CompileErrorKind, CompileResult};
use sable_core::value::{EventType, StructType};
use sable_core::Span;
use std::rc::Rc;

/// A jump target that may be bound after the jumps referencing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Key type for constant deduplication. Floats dedup by bit pattern so
/// `0.0` and `-0.0` stay distinct constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Void,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Rc<str>),
}

impl ConstKey {
    fn of(constant: &Constant) -> Self {
        match constant {
            Constant::Void => Self::Void,
            Constant::Bool(b) => Self::Bool(*b),
            Constant::Int(i) => Self::Int(*i),
            Constant::Float(f) => Self::Float(f.to_bits()),
            Constant::Str(s) => Self::Str(s.clone()),
        }
    }
}

/// Builder for one code object.
///
/// Owns the instruction vector, constant pool and line table while the
/// compiler walks a function body; [`CodeBuilder::finish`] resolves forward
/// jumps and seals the object.
pub struct CodeBuilder {
    name: Rc<str>,
    instructions: Vec<Instruction>,
    constants: Vec<Constant>,
    const_map: FxHashMap<ConstKey, u16>,

    labels: Vec<Option<u32>>,
    patches: SmallVec<[(usize, Label); 8]>,

    line_table: Vec<LineTableEntry>,
    current_line: u32,
    line_start_pc: u32,
}

impl CodeBuilder {
    /// Create a builder for a function named `name`.
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
            constants: Vec::new(),
            const_map: FxHashMap::default(),
            labels: Vec::new(),
            patches: SmallVec::new(),
            line_table: Vec::new(),
            current_line: 1,
            line_start_pc: 0,
        }
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Emit an operand-less instruction.
    pub fn emit(&mut self, opcode: Opcode) {
        self.instructions.push(Instruction::op(opcode));
    }

    /// Emit an instruction with one operand.
    pub fn emit_a(&mut self, opcode: Opcode, a: u16) {
        self.instructions.push(Instruction::op_a(opcode, a));
    }

    /// Emit an instruction with two operands.
    pub fn emit_ab(&mut self, opcode: Opcode, a: u16, b: u16) {
        self.instructions.push(Instruction::op_ab(opcode, a, b));
    }

    /// Current instruction count (the pc of the next emitted instruction).
    pub fn here(&self) -> usize {
        self.instructions.len()
    }

    // =========================================================================
    // Constants
    // =========================================================================

    /// Intern a constant, returning its pool index.
    pub fn add_constant(&mut self, constant: Constant, span: Span) -> CompileResult<u16> {
        let key = ConstKey::of(&constant);
        if let Some(&idx) = self.const_map.get(&key) {
            return Ok(idx);
        }
        let idx = u16::try_from(self.constants.len()).map_err(|_| {
            CompileError::new(
                CompileErrorKind::LimitExceeded,
                "too many constants in one function",
                span,
            )
        })?;
        self.constants.push(constant);
        self.const_map.insert(key, idx);
        Ok(idx)
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// Create an unbound label.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Bind a label to the current position.
    pub fn bind_label(&mut self, label: Label) {
        debug_assert!(
            self.labels[label.0 as usize].is_none(),
            "label bound twice"
        );
        self.labels[label.0 as usize] = Some(self.instructions.len() as u32);
    }

    /// Emit a jump instruction targeting `label`; patched in `finish`.
    pub fn emit_jump(&mut self, opcode: Opcode, label: Label) {
        debug_assert!(opcode.is_jump());
        let index = self.instructions.len();
        self.instructions.push(Instruction::op(opcode));
        self.patches.push((index, label));
    }

    // =========================================================================
    // Line Table
    // =========================================================================

    /// Record that subsequent instructions come from source line `line`.
    pub fn set_line(&mut self, line: u32) {
        if line != self.current_line {
            self.flush_line_entry();
            self.current_line = line;
        }
    }

    fn flush_line_entry(&mut self) {
        let pc = self.instructions.len() as u32;
        if pc > self.line_start_pc {
            self.line_table.push(LineTableEntry {
                start_pc: self.line_start_pc,
                end_pc: pc,
                line: self.current_line,
            });
        }
        self.line_start_pc = pc;
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Resolve all label references and build the code object.
    ///
    /// Metadata that only the enclosing compiler knows (slot counts,
    /// captures, nested tables) is passed in here.
    #[allow(clippy::too_many_arguments)]
    pub fn finish(
        mut self,
        arity: u16,
        local_slots: u16,
        cell_slots: u16,
        is_async: bool,
        captures: Vec<Capture>,
        cell_params: Vec<CellParam>,
        functions: Vec<Rc<CodeObject>>,
        structs: Vec<Rc<StructType>>,
        events: Vec<Rc<EventType>>,
        span: Span,
    ) -> CompileResult<CodeObject> {
        self.flush_line_entry();

        if self.instructions.len() > u16::MAX as usize {
            return Err(CompileError::new(
                CompileErrorKind::LimitExceeded,
                "function body exceeds the instruction limit",
                span,
            ));
        }

        for (index, label) in self.patches.drain(..) {
            let target = self.labels[label.0 as usize].expect("unbound label");
            self.instructions[index].a = target as u16;
        }

        Ok(CodeObject {
            name: self.name,
            arity,
            local_slots,
            cell_slots,
            is_async,
            instructions: self.instructions.into_boxed_slice(),
            constants: self.constants.into_boxed_slice(),
            captures: captures.into_boxed_slice(),
            cell_params: cell_params.into_boxed_slice(),
            functions: functions.into_boxed_slice(),
            structs: structs.into_boxed_slice(),
            events: events.into_boxed_slice(),
            line_table: self.line_table.into_boxed_slice(),
        })
    }
}
