//! Shared helpers for the VM integration suites.
#![allow(dead_code)]

use sable_compiler::Compiler;
use sable_core::error::SableError;
use sable_core::Value;
use sable_vm::Machine;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// A clonable in-memory sink so tests can keep reading what a machine (or
/// interpreter) that owns the other clone has written.
#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("utf-8 output")
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Compile and run on a fresh machine, discarding output.
pub fn run_vm(source: &str) -> Result<Value, SableError> {
    let code = Compiler::compile_source(source)?;
    Machine::with_output(std::io::sink()).run(code)
}

/// Compile and run, returning the machine for stats/event inspection.
pub fn run_vm_with_machine(source: &str) -> (Result<Value, SableError>, Machine) {
    let code = match Compiler::compile_source(source) {
        Ok(code) => code,
        Err(error) => return (Err(error), Machine::with_output(std::io::sink())),
    };
    let mut machine = Machine::with_output(std::io::sink());
    let result = machine.run(code);
    (result, machine)
}

/// Compile and run, capturing builtin output.
pub fn run_vm_capture(source: &str) -> (Result<Value, SableError>, String) {
    let buf = SharedBuf::new();
    let code = match Compiler::compile_source(source) {
        Ok(code) => code,
        Err(error) => return (Err(error), String::new()),
    };
    let mut machine = Machine::with_output(buf.clone());
    let result = machine.run(code);
    (result, buf.contents())
}

/// Unwrap a successful run.
pub fn eval(source: &str) -> Value {
    run_vm(source).expect("program runs")
}

/// Unwrap a runtime failure.
pub fn eval_failure(source: &str) -> sable_core::error::Failure {
    match run_vm(source) {
        Err(SableError::Runtime(failure)) => failure,
        other => panic!("expected runtime failure, got {other:?}"),
    }
}
