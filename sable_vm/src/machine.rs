//! The fetch-decode-execute loop.
//!
//! [`Machine::run`] validates a root code object, spawns it as the root
//! task, and drives the scheduler until the root resolves. Each task batch
//! runs until the task awaits a pending value, completes, or fails; there
//! is no other preemption point.
//!
//! Failure discipline: recoverable failures ([`Failure`]) unwind the
//! failing task and propagate to its waiters; conditions that indicate a
//! compiler or loader bug (operand-stack underflow, a field slot outside an
//! instance's shape) abort the run as [`SableError::Internal`] and are
//! never swallowed.

use crate::frame::{Closure, Frame, MAX_CALL_DEPTH};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::task::Task;
use sable_core::bytecode::{validate_tree, CodeObject, Opcode};
use sable_core::error::{Failure, FailureKind, SableError};
use sable_core::value::{
    EventType, MapKey, StructInstance, StructType, TaskHandle, TaskStatus, Value,
};
use sable_core::{ops, Builtin};
use rustc_hash::FxHashMap;
use std::io::Write;
use std::rc::Rc;

/// One `emit` record: event name plus field values in declaration order.
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    /// Event name.
    pub name: Rc<str>,
    /// Field values.
    pub values: Vec<Value>,
}

/// Result of one task batch.
enum StepOutcome {
    /// Task finished with a value.
    Completed(Value),
    /// Task must park on this pending handle.
    Suspended(TaskHandle),
    /// Task failed; unwind and propagate.
    Failed(Failure),
    /// Internal invariant violation; abort the whole run.
    Fatal(String),
}

/// The virtual machine.
pub struct Machine {
    scheduler: Scheduler,
    structs: Vec<Rc<StructType>>,
    events: Vec<Rc<EventType>>,
    event_log: Vec<EmittedEvent>,
    out: Box<dyn Write>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    /// Machine writing builtin output to stdout.
    pub fn new() -> Self {
        Self::with_output(std::io::stdout())
    }

    /// Machine writing builtin output to `out` (tests, hosts).
    pub fn with_output<W: Write + 'static>(out: W) -> Self {
        Self {
            scheduler: Scheduler::new(),
            structs: Vec::new(),
            events: Vec::new(),
            event_log: Vec::new(),
            out: Box::new(out),
        }
    }

    /// Fail tasks still incomplete after this many scheduling rounds.
    pub fn set_round_limit(&mut self, limit: Option<u64>) {
        self.scheduler.set_round_limit(limit);
    }

    /// Scheduler instrumentation counters.
    pub fn stats(&self) -> &SchedulerStats {
        self.scheduler.stats()
    }

    /// Events emitted so far, in emission order.
    pub fn events(&self) -> &[EmittedEvent] {
        &self.event_log
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// Execute a root code object to completion.
    ///
    /// The object is validated first; a malformed one is rejected before
    /// any instruction runs. The scheduler is drained even after the root
    /// completes so detached tasks finish deterministically.
    pub fn run(&mut self, root: Rc<CodeObject>) -> Result<Value, SableError> {
        validate_tree(&root)?;
        self.structs = root.structs.to_vec();
        self.events = root.events.to_vec();

        let frame = Frame::new(root, empty_upvalues(), Vec::new(), 0);
        let root_id = self.scheduler.spawn(frame);
        let root_handle = self.scheduler.handle_of(root_id);

        loop {
            let snapshot = self.scheduler.queued();
            let mut ran = 0;
            for _ in 0..snapshot.max(1) {
                let Some(id) = self.scheduler.pop_runnable() else {
                    break;
                };
                let mut task = self.scheduler.take(id).expect("runnable task in slot");
                let outcome = self.execute(&mut task);
                match outcome {
                    StepOutcome::Completed(value) => self.scheduler.complete(task, value),
                    StepOutcome::Suspended(on) => self.scheduler.suspend(task, on),
                    StepOutcome::Failed(failure) => self.scheduler.fail(task, failure),
                    StepOutcome::Fatal(message) => return Err(SableError::Internal(message)),
                }
                ran += 1;
            }
            if !self.scheduler.finish_round() {
                break; // round limit fired; every incomplete task now failed
            }
            if ran == 0 {
                break; // run queue drained
            }
        }

        // A drained queue with suspended tasks left over is a dependency
        // cycle: nothing can ever wake them.
        if self.scheduler.has_incomplete() {
            self.scheduler
                .fail_all_incomplete(FailureKind::Deadlock, "tasks deadlocked awaiting each other");
        }

        let status = (*root_handle.status()).clone();
        match status {
            TaskStatus::Completed(value) => Ok(value),
            TaskStatus::Failed(failure) => Err(SableError::Runtime(failure)),
            TaskStatus::Pending(_) => {
                Err(SableError::Internal("root task never resolved".to_string()))
            }
        }
    }

    // =========================================================================
    // Task Execution
    // =========================================================================

    /// Run one task until it suspends, completes, or fails.
    fn execute(&mut self, task: &mut Task) -> StepOutcome {
        // Deliver the awaited result for a resuming task.
        if let Some(handle) = task.pending_await.take() {
            let status = (*handle.status()).clone();
            match status {
                TaskStatus::Completed(value) => task.stack.push(value),
                TaskStatus::Failed(failure) => return StepOutcome::Failed(failure),
                TaskStatus::Pending(_) => {
                    return StepOutcome::Fatal("task resumed with pending await".to_string());
                }
            }
        }

        macro_rules! fatal {
            ($msg:expr) => {
                return StepOutcome::Fatal(format!("{} (in {})", $msg, task_name(task)))
            };
        }
        macro_rules! pop {
            () => {
                match task.stack.pop() {
                    Some(value) => value,
                    None => fatal!("operand stack underflow"),
                }
            };
        }

        loop {
            let Some(frame) = task.frames.last_mut() else {
                fatal!("empty call-frame stack");
            };
            let pc = frame.pc;
            let Some(&inst) = frame.code.instructions.get(pc as usize) else {
                // Linear flow ran off the end: the function lacks its
                // terminating Return/Halt. Loader bug, not a user error.
                fatal!("program counter out of range");
            };
            frame.pc += 1;

            macro_rules! throw {
                ($failure:expr) => {{
                    let failure: Failure = $failure;
                    let line = task
                        .frames
                        .last()
                        .and_then(|frame| frame.code.line_for_pc(pc));
                    return StepOutcome::Failed(match line {
                        Some(line) => failure.at_line(line),
                        None => failure,
                    });
                }};
            }
            macro_rules! push_or_throw {
                ($result:expr) => {
                    match $result {
                        Ok(value) => task.stack.push(value),
                        Err(failure) => throw!(failure),
                    }
                };
            }
            macro_rules! binary {
                ($op:path) => {{
                    let rhs = pop!();
                    let lhs = pop!();
                    push_or_throw!($op(&lhs, &rhs));
                }};
            }

            match inst.opcode {
                Opcode::Nop => {}
                Opcode::Pop => {
                    pop!();
                }
                Opcode::Dup => {
                    let Some(top) = task.stack.last().cloned() else {
                        fatal!("operand stack underflow");
                    };
                    task.stack.push(top);
                }
                Opcode::Dup2 => {
                    let len = task.stack.len();
                    if len < 2 {
                        fatal!("operand stack underflow");
                    }
                    let a = task.stack[len - 2].clone();
                    let b = task.stack[len - 1].clone();
                    task.stack.push(a);
                    task.stack.push(b);
                }

                // === Loads & Stores ===
                Opcode::LoadConst => {
                    let frame = task.frames.last().expect("frame checked above");
                    let value = frame.code.constants[inst.a as usize].to_value();
                    task.stack.push(value);
                }
                Opcode::LoadVoid => task.stack.push(Value::Void),
                Opcode::LoadTrue => task.stack.push(Value::Bool(true)),
                Opcode::LoadFalse => task.stack.push(Value::Bool(false)),
                Opcode::LoadLocal => {
                    let frame = task.frames.last().expect("frame checked above");
                    task.stack.push(frame.locals[inst.a as usize].clone());
                }
                Opcode::StoreLocal => {
                    let value = pop!();
                    let frame = task.frames.last_mut().expect("frame checked above");
                    frame.locals[inst.a as usize] = value;
                }
                Opcode::LoadCell => {
                    let frame = task.frames.last().expect("frame checked above");
                    let value = frame.cells[inst.a as usize].borrow().clone();
                    task.stack.push(value);
                }
                Opcode::StoreCell => {
                    let value = pop!();
                    let frame = task.frames.last().expect("frame checked above");
                    *frame.cells[inst.a as usize].borrow_mut() = value;
                }
                Opcode::LoadUpvalue => {
                    let frame = task.frames.last().expect("frame checked above");
                    let value = frame.upvalues[inst.a as usize].borrow().clone();
                    task.stack.push(value);
                }
                Opcode::StoreUpvalue => {
                    let value = pop!();
                    let frame = task.frames.last().expect("frame checked above");
                    *frame.upvalues[inst.a as usize].borrow_mut() = value;
                }
                Opcode::LoadBuiltin => {
                    let Some(builtin) = Builtin::from_index(inst.a) else {
                        fatal!("unknown builtin index");
                    };
                    task.stack.push(Value::Builtin(builtin));
                }

                // === Arithmetic ===
                Opcode::Add => binary!(ops::add),
                Opcode::Sub => binary!(ops::sub),
                Opcode::Mul => binary!(ops::mul),
                Opcode::Div => binary!(ops::div),
                Opcode::Mod => binary!(ops::rem),
                Opcode::Pow => binary!(ops::pow),
                Opcode::Neg => {
                    let value = pop!();
                    push_or_throw!(ops::neg(&value));
                }
                Opcode::Not => {
                    let value = pop!();
                    task.stack.push(ops::not(&value));
                }

                // === Comparison ===
                Opcode::Eq => binary!(ops::eq),
                Opcode::Ne => binary!(ops::ne),
                Opcode::Lt => binary!(ops::lt),
                Opcode::Le => binary!(ops::le),
                Opcode::Gt => binary!(ops::gt),
                Opcode::Ge => binary!(ops::ge),

                // === Bitwise ===
                Opcode::BitAnd => binary!(ops::bit_and),
                Opcode::BitOr => binary!(ops::bit_or),
                Opcode::BitXor => binary!(ops::bit_xor),
                Opcode::BitNot => {
                    let value = pop!();
                    push_or_throw!(ops::bit_not(&value));
                }
                Opcode::Shl => binary!(ops::shl),
                Opcode::Shr => binary!(ops::shr),

                // === Control Flow ===
                Opcode::Jump => {
                    let frame = task.frames.last_mut().expect("frame checked above");
                    frame.pc = inst.a as u32;
                }
                Opcode::JumpIfFalse => {
                    let value = pop!();
                    if !ops::truthy(&value) {
                        let frame = task.frames.last_mut().expect("frame checked above");
                        frame.pc = inst.a as u32;
                    }
                }
                Opcode::JumpIfTrue => {
                    let value = pop!();
                    if ops::truthy(&value) {
                        let frame = task.frames.last_mut().expect("frame checked above");
                        frame.pc = inst.a as u32;
                    }
                }
                Opcode::JumpIfFalseOrPop => {
                    let Some(top) = task.stack.last() else {
                        fatal!("operand stack underflow");
                    };
                    if !ops::truthy(top) {
                        let frame = task.frames.last_mut().expect("frame checked above");
                        frame.pc = inst.a as u32;
                    } else {
                        task.stack.pop();
                    }
                }
                Opcode::JumpIfTrueOrPop => {
                    let Some(top) = task.stack.last() else {
                        fatal!("operand stack underflow");
                    };
                    if ops::truthy(top) {
                        let frame = task.frames.last_mut().expect("frame checked above");
                        frame.pc = inst.a as u32;
                    } else {
                        task.stack.pop();
                    }
                }

                // === Functions ===
                Opcode::MakeClosure => {
                    let frame = task.frames.last().expect("frame checked above");
                    let proto = frame.code.functions[inst.a as usize].clone();
                    let upvalues: Vec<_> = proto
                        .captures
                        .iter()
                        .map(|capture| match *capture {
                            sable_core::bytecode::Capture::Cell(i) => {
                                frame.cells[i as usize].clone()
                            }
                            sable_core::bytecode::Capture::Upvalue(i) => {
                                frame.upvalues[i as usize].clone()
                            }
                        })
                        .collect();
                    task.stack.push(Value::Closure(Rc::new(Closure {
                        code: proto,
                        upvalues: Rc::from(upvalues.into_boxed_slice()),
                    })));
                }
                Opcode::Call => {
                    let argc = inst.a as usize;
                    if task.stack.len() < argc + 1 {
                        fatal!("operand stack underflow");
                    }
                    let args = task.stack.split_off(task.stack.len() - argc);
                    let callee = pop!();
                    match callee {
                        Value::Builtin(builtin) => {
                            push_or_throw!(builtin.invoke(&args, &mut *self.out));
                        }
                        Value::Closure(callable) => {
                            let Some(closure) = callable.as_any().downcast_ref::<Closure>()
                            else {
                                throw!(Failure::new(
                                    FailureKind::NotCallable,
                                    "cannot call a foreign function value",
                                ));
                            };
                            if args.len() != closure.code.arity as usize {
                                throw!(Failure::new(
                                    FailureKind::ArityMismatch,
                                    format!(
                                        "{}() takes {} argument(s), got {}",
                                        closure.code.name,
                                        closure.code.arity,
                                        args.len()
                                    ),
                                ));
                            }
                            if closure.code.is_async {
                                // Calling an async function spawns a task and
                                // yields its handle; the body runs when the
                                // scheduler reaches it.
                                let spawned = Frame::new(
                                    closure.code.clone(),
                                    closure.upvalues.clone(),
                                    args,
                                    0,
                                );
                                let id = self.scheduler.spawn(spawned);
                                task.stack.push(Value::Task(self.scheduler.handle_of(id)));
                            } else {
                                if task.frames.len() >= MAX_CALL_DEPTH {
                                    throw!(Failure::new(
                                        FailureKind::StackOverflow,
                                        format!("call depth exceeds {MAX_CALL_DEPTH}"),
                                    ));
                                }
                                let callee_frame = Frame::new(
                                    closure.code.clone(),
                                    closure.upvalues.clone(),
                                    args,
                                    task.stack.len(),
                                );
                                task.frames.push(callee_frame);
                            }
                        }
                        other => throw!(Failure::new(
                            FailureKind::NotCallable,
                            format!("{} is not callable", other.type_name()),
                        )),
                    }
                }
                Opcode::Return => {
                    let result = pop!();
                    let frame = task.frames.pop().expect("frame checked above");
                    task.stack.truncate(frame.stack_base);
                    if task.frames.is_empty() {
                        return StepOutcome::Completed(result);
                    }
                    task.stack.push(result);
                }

                // === Containers ===
                Opcode::BuildList => {
                    let count = inst.a as usize;
                    if task.stack.len() < count {
                        fatal!("operand stack underflow");
                    }
                    let items = task.stack.split_off(task.stack.len() - count);
                    task.stack.push(Value::list(items));
                }
                Opcode::BuildMap => {
                    let count = inst.a as usize;
                    if task.stack.len() < count * 2 {
                        fatal!("operand stack underflow");
                    }
                    let flat = task.stack.split_off(task.stack.len() - count * 2);
                    let mut entries = FxHashMap::default();
                    let mut failure = None;
                    for pair in flat.chunks_exact(2) {
                        match MapKey::from_value(&pair[0]) {
                            Ok(key) => {
                                entries.insert(key, pair[1].clone());
                            }
                            Err(f) => {
                                failure = Some(f);
                                break;
                            }
                        }
                    }
                    if let Some(f) = failure {
                        throw!(f);
                    }
                    task.stack
                        .push(Value::Map(Rc::new(std::cell::RefCell::new(entries))));
                }
                Opcode::Index => {
                    let index = pop!();
                    let obj = pop!();
                    push_or_throw!(ops::index_get(&obj, &index));
                }
                Opcode::StoreIndex => {
                    let value = pop!();
                    let index = pop!();
                    let obj = pop!();
                    if let Err(f) = ops::index_set(&obj, &index, value) {
                        throw!(f);
                    }
                }

                // === Structs & Contracts ===
                Opcode::NewStruct => {
                    let count = inst.b as usize;
                    if task.stack.len() < count {
                        fatal!("operand stack underflow");
                    }
                    let slots = task.stack.split_off(task.stack.len() - count);
                    let ty = self.structs[inst.a as usize].clone();
                    task.stack
                        .push(Value::Struct(Rc::new(StructInstance::new(ty, slots))));
                }
                Opcode::GetField => {
                    let obj = pop!();
                    match obj {
                        Value::Struct(instance) => match instance.get(inst.a as usize) {
                            Some(value) => task.stack.push(value),
                            // The compiler only emits slot-indexed access
                            // for statically typed receivers; a miss means
                            // corrupted type metadata.
                            None => fatal!("field slot outside instance shape"),
                        },
                        other => throw!(Failure::new(
                            FailureKind::TypeMismatch,
                            format!("{} has no fields", other.type_name()),
                        )),
                    }
                }
                Opcode::SetField => {
                    let value = pop!();
                    let obj = pop!();
                    match obj {
                        Value::Struct(instance) => {
                            if !instance.set(inst.a as usize, value) {
                                fatal!("field slot outside instance shape");
                            }
                        }
                        other => throw!(Failure::new(
                            FailureKind::TypeMismatch,
                            format!("{} has no fields", other.type_name()),
                        )),
                    }
                }
                Opcode::GetFieldNamed => {
                    let obj = pop!();
                    let frame = task.frames.last().expect("frame checked above");
                    let name = frame.code.constants[inst.a as usize]
                        .as_str()
                        .expect("validated field-name constant")
                        .clone();
                    push_or_throw!(ops::field_get(&obj, &name));
                }
                Opcode::SetFieldNamed => {
                    let value = pop!();
                    let obj = pop!();
                    let frame = task.frames.last().expect("frame checked above");
                    let name = frame.code.constants[inst.a as usize]
                        .as_str()
                        .expect("validated field-name constant")
                        .clone();
                    if let Err(f) = ops::field_set(&obj, &name, value) {
                        throw!(f);
                    }
                }

                // === Async ===
                Opcode::Await => {
                    let value = pop!();
                    match value {
                        Value::Task(handle) => {
                            let status = (*handle.status()).clone();
                            match status {
                                // Zero-yield fast path: an already-completed
                                // task delivers its value without suspending.
                                TaskStatus::Completed(result) => task.stack.push(result),
                                TaskStatus::Failed(failure) => throw!(failure),
                                TaskStatus::Pending(_) => {
                                    return StepOutcome::Suspended(handle);
                                }
                            }
                        }
                        // Awaiting a plain value is the identity.
                        other => task.stack.push(other),
                    }
                }
                Opcode::EmitEvent => {
                    let count = inst.b as usize;
                    if task.stack.len() < count {
                        fatal!("operand stack underflow");
                    }
                    let values = task.stack.split_off(task.stack.len() - count);
                    let event = self.events[inst.a as usize].clone();
                    self.event_log.push(EmittedEvent {
                        name: event.name.clone(),
                        values,
                    });
                }

                Opcode::Halt => {
                    let result = task.stack.pop().unwrap_or(Value::Void);
                    return StepOutcome::Completed(result);
                }
            }
        }
    }
}

fn empty_upvalues() -> Rc<[sable_core::value::CellRef]> {
    Rc::from(Vec::new().into_boxed_slice())
}

fn task_name(task: &Task) -> String {
    task.frames
        .last()
        .map_or_else(|| "<no frame>".to_string(), |f| f.code.name.to_string())
}
