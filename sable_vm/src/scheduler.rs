//! Cooperative task scheduler.
//!
//! A single FIFO run queue, no priorities, no preemption. A task runs until
//! it awaits a pending value, completes, or fails; waiters are re-enqueued
//! in the order their dependency completed, so execution is deterministic
//! given deterministic inputs.
//!
//! Cancellation and failure propagate to awaiting tasks transitively in one
//! pass: failing a task immediately fails every task suspended on it.

use crate::frame::Frame;
use crate::task::{Task, TaskState};
use sable_core::error::{Failure, FailureKind};
use sable_core::value::{TaskHandle, TaskId, Value};
use std::collections::VecDeque;

/// Instrumentation counters, readable by the host.
///
/// `suspensions` in particular backs the zero-yield guarantee: awaiting an
/// already-completed task must not increase it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks ever spawned.
    pub spawned: u64,
    /// Times a task parked on a pending await.
    pub suspensions: u64,
    /// Times a parked task was re-enqueued.
    pub resumptions: u64,
    /// Tasks completed with a value.
    pub completions: u64,
    /// Tasks finished with a failure (cancellations included).
    pub failures: u64,
    /// Tasks failed with `Cancelled`.
    pub cancellations: u64,
    /// Scheduling rounds executed.
    pub rounds: u64,
}

/// The scheduler: task slots plus the run queue.
pub struct Scheduler {
    tasks: Vec<Option<Task>>,
    queue: VecDeque<TaskId>,
    stats: SchedulerStats,
    round_limit: Option<u64>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            queue: VecDeque::new(),
            stats: SchedulerStats::default(),
            round_limit: None,
        }
    }

    /// Fail tasks still incomplete after this many scheduling rounds.
    pub fn set_round_limit(&mut self, limit: Option<u64>) {
        self.round_limit = limit;
    }

    /// Instrumentation counters.
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    // =========================================================================
    // Task Lifecycle
    // =========================================================================

    /// Spawn a runnable task executing `frame`; returns its id.
    pub fn spawn(&mut self, frame: Frame) -> TaskId {
        let id = TaskId(self.tasks.len() as u32);
        let task = Task::new(id, frame);
        self.tasks.push(Some(task));
        self.queue.push_back(id);
        self.stats.spawned += 1;
        id
    }

    /// The completion handle of a task.
    pub fn handle_of(&self, id: TaskId) -> TaskHandle {
        self.tasks[id.0 as usize]
            .as_ref()
            .expect("task executing elsewhere")
            .handle
            .clone()
    }

    /// Number of entries currently in the run queue (stale ones included);
    /// used by the machine to bound one scheduling round.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Pop the next runnable task id, skipping entries invalidated by
    /// cancellation while queued.
    pub fn pop_runnable(&mut self) -> Option<TaskId> {
        while let Some(id) = self.queue.pop_front() {
            if self.tasks[id.0 as usize]
                .as_ref()
                .is_some_and(|t| t.state == TaskState::Runnable)
            {
                return Some(id);
            }
        }
        None
    }

    /// Take a task out of its slot for execution.
    pub fn take(&mut self, id: TaskId) -> Option<Task> {
        self.tasks[id.0 as usize].take()
    }

    /// Return a task to its slot.
    pub fn restore(&mut self, task: Task) {
        let slot = task.id.0 as usize;
        debug_assert!(self.tasks[slot].is_none(), "task slot occupied");
        self.tasks[slot] = Some(task);
    }

    /// Park `task` until `on` resolves.
    ///
    /// The task leaves the run queue (it is simply not re-enqueued) and is
    /// recorded in the awaited task's waiter list.
    pub fn suspend(&mut self, mut task: Task, on: TaskHandle) {
        let dep = on
            .pending_id()
            .expect("suspending on a resolved handle");
        task.state = TaskState::Suspended;
        task.pending_await = Some(on);
        self.stats.suspensions += 1;

        let waiter = task.id;
        self.restore(task);
        self.tasks[dep.0 as usize]
            .as_mut()
            .expect("awaited task exists")
            .waiters
            .push(waiter);
    }

    /// Complete `task` with `value`, waking its waiters in order.
    pub fn complete(&mut self, mut task: Task, value: Value) {
        task.state = TaskState::Completed;
        task.handle.complete(value);
        task.unwind();
        self.stats.completions += 1;

        let waiters = std::mem::take(&mut task.waiters);
        self.restore(task);
        for waiter in waiters {
            self.wake(waiter);
        }
    }

    /// Fail `task`, propagating the failure to every waiter transitively.
    pub fn fail(&mut self, mut task: Task, failure: Failure) {
        task.state = TaskState::Failed;
        task.handle.fail(failure.clone());
        task.unwind();
        self.stats.failures += 1;
        if failure.kind == FailureKind::Cancelled {
            self.stats.cancellations += 1;
        }

        let waiters = std::mem::take(&mut task.waiters);
        self.restore(task);
        for waiter in waiters {
            if let Some(dependent) = self.take(waiter) {
                self.fail(dependent, failure.clone());
            }
        }
    }

    /// Cancel a task: it fails with `Cancelled`, as does - in this same
    /// pass - every task transitively awaiting it. A terminal task is left
    /// untouched.
    pub fn cancel(&mut self, id: TaskId) {
        let Some(task) = self.take(id) else {
            return;
        };
        match task.state {
            TaskState::Completed | TaskState::Failed => self.restore(task),
            _ => self.fail(task, Failure::cancelled()),
        }
    }

    fn wake(&mut self, id: TaskId) {
        let task = self.tasks[id.0 as usize]
            .as_mut()
            .expect("waiter slot occupied");
        debug_assert_eq!(task.state, TaskState::Suspended);
        task.state = TaskState::Runnable;
        self.stats.resumptions += 1;
        self.queue.push_back(id);
    }

    // =========================================================================
    // Rounds & Global Failure
    // =========================================================================

    /// Record a completed scheduling round. Returns `false` once the round
    /// limit is exceeded, after failing every incomplete task with
    /// `Timeout`.
    pub fn finish_round(&mut self) -> bool {
        self.stats.rounds += 1;
        if let Some(limit) = self.round_limit {
            if self.stats.rounds >= limit && self.has_incomplete() {
                self.fail_all_incomplete(FailureKind::Timeout, "scheduler round limit exceeded");
                return false;
            }
        }
        true
    }

    /// True while any task is runnable or suspended.
    pub fn has_incomplete(&self) -> bool {
        self.tasks.iter().any(|slot| {
            slot.as_ref().is_some_and(|t| {
                matches!(t.state, TaskState::Runnable | TaskState::Suspended)
            })
        })
    }

    /// Fail every incomplete task. Used for timeouts and for deadlock
    /// detection when the run queue drains with suspended tasks left over.
    pub fn fail_all_incomplete(&mut self, kind: FailureKind, message: &str) {
        for index in 0..self.tasks.len() {
            let incomplete = self.tasks[index].as_ref().is_some_and(|t| {
                matches!(t.state, TaskState::Runnable | TaskState::Suspended)
            });
            if incomplete {
                let task = self.tasks[index].take().expect("slot checked above");
                self.fail(task, Failure::new(kind, message));
            }
        }
    }
}
