//! Call frames and bytecode closures.

use sable_core::bytecode::CodeObject;
use sable_core::value::{Callable, CellRef, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Maximum call depth before a task fails rather than exhausting memory.
pub const MAX_CALL_DEPTH: usize = 1000;

/// A closure over a compiled function: the code and the captured upvalue
/// cells, shared with every other closure capturing the same variables.
pub struct Closure {
    /// The compiled function.
    pub code: Rc<CodeObject>,
    /// Captured cells, in the order of the code object's capture list.
    pub upvalues: Rc<[CellRef]>,
}

impl Callable for Closure {
    fn name(&self) -> &str {
        &self.code.name
    }

    fn arity(&self) -> usize {
        self.code.arity as usize
    }

    fn is_async(&self) -> bool {
        self.code.is_async
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.code.name)
            .field("arity", &self.code.arity)
            .field("upvalues", &self.upvalues.len())
            .finish()
    }
}

/// One function activation.
///
/// The frame owns its local and cell slots; its operand-stack region is the
/// suffix of the task's value stack starting at `stack_base`, released when
/// the frame returns or unwinds.
pub struct Frame {
    /// Code being executed.
    pub code: Rc<CodeObject>,
    /// Next instruction index.
    pub pc: u32,
    /// Start of this frame's operand-stack region in the task stack.
    pub stack_base: usize,
    /// Local variable slots; parameters occupy `0..arity`.
    pub locals: Vec<Value>,
    /// Cells for locals captured by inner functions.
    pub cells: Vec<CellRef>,
    /// Upvalues supplied by the closure this frame was called through.
    pub upvalues: Rc<[CellRef]>,
}

impl Frame {
    /// Create a frame, binding `args` to the first local slots.
    ///
    /// Fresh cells are allocated for every cell slot; captured parameters
    /// are then copied into their cells per the code object's `cell_params`.
    pub fn new(
        code: Rc<CodeObject>,
        upvalues: Rc<[CellRef]>,
        args: Vec<Value>,
        stack_base: usize,
    ) -> Self {
        debug_assert_eq!(args.len(), code.arity as usize);

        let mut locals = vec![Value::Void; code.local_slots as usize];
        for (slot, arg) in args.into_iter().enumerate() {
            locals[slot] = arg;
        }

        let cells: Vec<CellRef> = (0..code.cell_slots)
            .map(|_| Rc::new(RefCell::new(Value::Void)))
            .collect();
        for cp in code.cell_params.iter() {
            *cells[cp.cell_slot as usize].borrow_mut() = locals[cp.param_slot as usize].clone();
        }

        Self {
            code,
            pc: 0,
            stack_base,
            locals,
            cells,
            upvalues,
        }
    }

    /// Source line of the instruction at `pc`, if mapped.
    pub fn current_line(&self, pc: u32) -> Option<u32> {
        self.code.line_for_pc(pc)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("code", &self.code.name)
            .field("pc", &self.pc)
            .field("stack_base", &self.stack_base)
            .finish()
    }
}
