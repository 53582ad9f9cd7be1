//! The `pyrt` binary: loads a decoded code object and runs it.
//!
//! Decoding on-disk bytecode is out of scope for this workspace (spec.md
//! §1); `pyrt_vm::load_code_object` is the documented seam for that
//! collaborator, and its only implementation here is a stub. This binary
//! exists to exercise the seam and the CLI surface, not to run real
//! `.pyc` files.

use pyrt_vm::config::VmConfig;
use pyrt_vm::interpreter::Interpreter;
use std::process::ExitCode;

struct Args {
    path: String,
    recursion_limit: usize,
    max_stack_per_frame: u32,
    debug_trace: bool,
}

fn parse_args() -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let mut path = None;
    let mut recursion_limit = VmConfig::default().recursion_limit;
    let mut max_stack_per_frame = VmConfig::default().max_stack_per_frame;
    let mut debug_trace = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Long("recursion-limit") => recursion_limit = parser.value()?.parse()?,
            Long("max-stack") => max_stack_per_frame = parser.value()?.parse()?,
            Long("trace") => debug_trace = true,
            Value(v) if path.is_none() => path = Some(v.string()?),
            _ => return Err(arg.unexpected()),
        }
    }

    Ok(Args {
        path: path.ok_or_else(|| lexopt::Error::MissingValue { option: Some("path".into()) })?,
        recursion_limit,
        max_stack_per_frame,
        debug_trace,
    })
}

pub fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("pyrt: {err}");
            eprintln!("usage: pyrt [--recursion-limit N] [--max-stack N] [--trace] <code-object-file>");
            return ExitCode::FAILURE;
        }
    };

    // `--trace` (spec.md §6) must emit its per-instruction lines on its
    // own, independent of whatever `RUST_LOG` happens to be set to.
    let mut logger = env_logger::Builder::from_default_env();
    if args.debug_trace {
        logger.filter_level(log::LevelFilter::Trace);
    }
    logger.init();

    let bytes = match std::fs::read(&args.path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("pyrt: couldn't read '{}': {err}", args.path);
            return ExitCode::FAILURE;
        }
    };

    let code = match pyrt_vm::load_code_object(&bytes) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("pyrt: {err}");
            eprintln!("pyrt: this workspace has no bytecode decoder; construct a CodeObject via pyrt_vm::codeobj::CodeObjectBuilder instead");
            return ExitCode::FAILURE;
        }
    };

    let config = VmConfig {
        recursion_limit: args.recursion_limit,
        max_stack_per_frame: args.max_stack_per_frame,
        debug_trace: args.debug_trace,
    };
    log::info!("loaded module '{}', starting evaluator", code.codename);

    let mut vm = Interpreter::new(config);
    match vm.run_module(code, "__main__") {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
