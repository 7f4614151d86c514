//! The async task model.

use crate::frame::Frame;
use sable_core::value::{TaskHandle, TaskId, Value};

/// Scheduler-visible lifecycle state.
///
/// Transitions: `Runnable -> {Runnable, Suspended, Completed, Failed}`;
/// `Suspended -> Runnable` when the awaited task resolves. Completed and
/// Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// In (or eligible for) the run queue.
    Runnable,
    /// Parked on a pending awaited task.
    Suspended,
    /// Finished with a value.
    Completed,
    /// Finished with a failure.
    Failed,
}

/// One unit of async execution: a whole call-frame stack plus the operand
/// stack it runs on, owned exclusively by the scheduler while suspended and
/// by the machine while executing.
#[derive(Debug)]
pub struct Task {
    /// Scheduler-local identity.
    pub id: TaskId,
    /// Shared completion cell observed by awaiting tasks and the host.
    pub handle: TaskHandle,
    /// Call-frame stack; the last entry is the active frame.
    pub frames: Vec<Frame>,
    /// Operand stack, partitioned into per-frame regions by `stack_base`.
    pub stack: Vec<Value>,
    /// Tasks suspended awaiting this one, in suspension order.
    pub waiters: Vec<TaskId>,
    /// Lifecycle state.
    pub state: TaskState,
    /// The handle this task is suspended on; its value (or failure) is
    /// delivered onto the operand stack when the task resumes.
    pub pending_await: Option<TaskHandle>,
}

impl Task {
    /// Create a runnable task with a single root frame.
    pub fn new(id: TaskId, frame: Frame) -> Self {
        Self {
            id,
            handle: TaskHandle::pending(id),
            frames: vec![frame],
            stack: Vec::new(),
            waiters: Vec::new(),
            state: TaskState::Runnable,
            pending_await: None,
        }
    }

    /// Drop all execution state, releasing frames and operands.
    ///
    /// Values still reachable from other tasks (through shared cells,
    /// aggregates or the completion handle) are unaffected.
    pub fn unwind(&mut self) {
        self.frames.clear();
        self.stack.clear();
        self.pending_await = None;
    }
}
