//! Sable command-line entry point.

mod args;
mod diagnostics;
mod repl;

use args::{Args, Backend, Mode};
use sable_compiler::{format, Compiler};
use sable_core::{SableError, Value};
use sable_interp::Interpreter;
use sable_vm::Machine;
use std::path::Path;
use std::process::ExitCode;

/// Successful execution.
const EXIT_SUCCESS: u8 = 0;
/// The program failed to compile or run.
const EXIT_ERROR: u8 = 1;
/// Bad command-line usage.
const EXIT_USAGE: u8 = 2;
/// Toolchain bug (internal invariant violation).
const EXIT_INTERNAL: u8 = 120;

fn main() -> ExitCode {
    let args = match Args::parse(std::env::args_os().skip(1)) {
        Ok(args) => args,
        Err(error) => {
            eprintln!("sable: {}", error.0);
            eprint!("{}", args::USAGE);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match args.mode {
        Mode::Help => {
            print!("{}", args::USAGE);
            ExitCode::from(EXIT_SUCCESS)
        }
        Mode::Version => {
            println!("sable {}", sable_core::VERSION);
            ExitCode::from(EXIT_SUCCESS)
        }
        Mode::Disasm | Mode::Run => match &args.file {
            Some(path) => run_file(&args, path),
            None => repl::run(),
        },
    }
}

fn run_file(args: &Args, path: &Path) -> ExitCode {
    let filename = path.display().to_string();

    // A compiled container runs directly on the VM; everything else is
    // source text.
    let is_container = path.extension().is_some_and(|ext| ext == "sbc");
    if is_container {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) => {
                eprintln!("sable: cannot read {filename}: {error}");
                return ExitCode::from(EXIT_USAGE);
            }
        };
        let code = match format::decode(&bytes) {
            Ok(code) => code,
            Err(error) => return report(&error.into(), None, &filename),
        };
        if args.mode == Mode::Disasm {
            print!("{}", sable_core::bytecode::disassemble(&code));
            return ExitCode::from(EXIT_SUCCESS);
        }
        let mut machine = Machine::new();
        machine.set_round_limit(args.round_limit);
        return finish(machine.run(code), None, &filename);
    }

    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("sable: cannot read {filename}: {error}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if args.backend == Backend::Interp && args.mode == Mode::Run && args.emit.is_none() {
        let program = match sable_parser::parse(&source) {
            Ok(program) => program,
            Err(error) => return report(&error.into(), Some(&source), &filename),
        };
        let mut interp = Interpreter::new();
        return finish(interp.run(&program), Some(&source), &filename);
    }

    let code = match Compiler::compile_source(&source) {
        Ok(code) => code,
        Err(error) => return report(&error, Some(&source), &filename),
    };

    if args.mode == Mode::Disasm {
        print!("{}", sable_core::bytecode::disassemble(&code));
        return ExitCode::from(EXIT_SUCCESS);
    }

    if let Some(emit_path) = &args.emit {
        let bytes = format::encode(&code);
        return match std::fs::write(emit_path, bytes) {
            Ok(()) => ExitCode::from(EXIT_SUCCESS),
            Err(error) => {
                eprintln!("sable: cannot write {}: {error}", emit_path.display());
                ExitCode::from(EXIT_USAGE)
            }
        };
    }

    let mut machine = Machine::new();
    machine.set_round_limit(args.round_limit);
    finish(machine.run(code), Some(&source), &filename)
}

/// Print a program result (non-void only) and map the outcome to an exit
/// code.
fn finish(
    result: Result<Value, SableError>,
    source: Option<&str>,
    filename: &str,
) -> ExitCode {
    match result {
        Ok(value) => {
            if !value.is_void() {
                println!("{value}");
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(error) => report(&error, source, filename),
    }
}

fn report(error: &SableError, source: Option<&str>, filename: &str) -> ExitCode {
    eprint!("{}", diagnostics::render(error, source, filename));
    match error {
        SableError::Internal(_) => ExitCode::from(EXIT_INTERNAL),
        _ => ExitCode::from(EXIT_ERROR),
    }
}
