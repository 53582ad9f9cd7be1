//! Hand-assembly API for [`crate::bytecode::CodeObject`] values, standing
//! in for the out-of-scope marshal decoder (spec.md §1, SPEC_FULL.md §1).
//! The CLI's stub `load_code_object` and this workspace's tests both build
//! programs through here rather than through a real bytecode reader.

use crate::bytecode::{CodeFlags, CodeObject, CodeObjectRef, Instruction};
use crate::object::PyObjectRef;
use std::rc::Rc;

/// Builds one [`CodeObject`] at a time. Every pool (`consts`, `names`,
/// `varnames`, `cellvars`, `freevars`) is append-only and returns the index
/// just inserted, so callers can wire up `Instruction` operands as they go.
pub struct CodeObjectBuilder {
    instructions: Vec<Instruction>,
    lines: Vec<u32>,
    consts: Vec<PyObjectRef>,
    names: Vec<String>,
    varnames: Vec<String>,
    cellvars: Vec<String>,
    freevars: Vec<String>,
    arg_count: u32,
    kwonlyarg_count: u32,
    flags: CodeFlags,
    stack_size: u32,
    filename: String,
    codename: String,
    first_line: u32,
    current_line: u32,
}

impl CodeObjectBuilder {
    pub fn new(filename: impl Into<String>, codename: impl Into<String>, first_line: u32) -> Self {
        Self {
            instructions: Vec::new(),
            lines: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            arg_count: 0,
            kwonlyarg_count: 0,
            flags: CodeFlags::empty(),
            stack_size: 16,
            filename: filename.into(),
            codename: codename.into(),
            first_line,
            current_line: first_line,
        }
    }

    pub fn arg_count(&mut self, n: u32) -> &mut Self {
        self.arg_count = n;
        self
    }

    pub fn kwonlyarg_count(&mut self, n: u32) -> &mut Self {
        self.kwonlyarg_count = n;
        self
    }

    pub fn flags(&mut self, flags: CodeFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    pub fn stack_size(&mut self, n: u32) -> &mut Self {
        self.stack_size = n;
        self
    }

    /// Sets the source line attributed to every instruction emitted after
    /// this call, until the next `at_line`.
    pub fn at_line(&mut self, line: u32) -> &mut Self {
        self.current_line = line;
        self
    }

    pub fn add_const(&mut self, value: PyObjectRef) -> u32 {
        self.consts.push(value);
        (self.consts.len() - 1) as u32
    }

    pub fn add_name(&mut self, name: impl Into<String>) -> u32 {
        intern(&mut self.names, name.into())
    }

    pub fn add_varname(&mut self, name: impl Into<String>) -> u32 {
        intern(&mut self.varnames, name.into())
    }

    pub fn add_cellvar(&mut self, name: impl Into<String>) -> u32 {
        intern(&mut self.cellvars, name.into())
    }

    pub fn add_freevar(&mut self, name: impl Into<String>) -> u32 {
        intern(&mut self.freevars, name.into())
    }

    /// Appends one instruction and returns its logical index, usable as a
    /// jump `Label` for instructions emitted before it know where to land
    /// (back-patch by constructing the jump after its target, or see
    /// [`CodeObjectBuilder::next_label`] to forward-patch).
    pub fn emit(&mut self, instr: Instruction) -> u32 {
        self.instructions.push(instr);
        self.lines.push(self.current_line);
        (self.instructions.len() - 1) as u32
    }

    /// The label a not-yet-emitted instruction will receive, for forward
    /// jumps: `let l = builder.next_label(); ...; builder.patch_jump(j, l)`.
    pub fn next_label(&self) -> u32 {
        self.instructions.len() as u32
    }

    /// Rewrites a previously emitted jump/branch/setup instruction's
    /// target in place — used for forward jumps whose destination wasn't
    /// known yet when the jump was emitted.
    pub fn patch_jump(&mut self, at: u32, target: u32) {
        use Instruction::*;
        let slot = &mut self.instructions[at as usize];
        match slot {
            Jump { target: t }
            | JumpIfTrue { target: t }
            | JumpIfFalse { target: t }
            | JumpIfTruePopped { target: t }
            | JumpIfFalsePopped { target: t }
            | JumpIfTrueOrPop { target: t }
            | JumpIfFalseOrPop { target: t }
            | ForIter { target: t }
            | SetupLoop { handler: t }
            | SetupExcept { handler: t }
            | SetupFinally { handler: t }
            | SetupWith { handler: t } => *t = target,
            other => panic!("patch_jump called on non-jump instruction {other:?}"),
        }
    }

    pub fn build(self) -> CodeObjectRef {
        Rc::new(CodeObject {
            instructions: self.instructions,
            consts: self.consts,
            names: self.names,
            varnames: self.varnames,
            cellvars: self.cellvars,
            freevars: self.freevars,
            arg_count: self.arg_count,
            kwonlyarg_count: self.kwonlyarg_count,
            flags: self.flags,
            stack_size: self.stack_size,
            filename: self.filename,
            codename: self.codename,
            first_line: self.first_line,
            lines: self.lines,
        })
    }
}

fn intern(pool: &mut Vec<String>, name: String) -> u32 {
    if let Some(i) = pool.iter().position(|n| *n == name) {
        return i as u32;
    }
    pool.push(name);
    (pool.len() - 1) as u32
}
