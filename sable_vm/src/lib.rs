//! Bytecode virtual machine for Sable.
//!
//! [`Machine`] executes validated code objects over a per-task operand
//! stack and call-frame stack, cooperating with the [`scheduler`] for
//! async tasks: a task runs until it awaits a pending value, completes, or
//! fails. Execution is single-threaded; concurrency is interleaving, never
//! parallelism, and ordering is determined solely by completion order of
//! awaited values.

pub mod frame;
pub mod machine;
pub mod scheduler;
pub mod task;

pub use machine::{EmittedEvent, Machine};
pub use scheduler::SchedulerStats;
