//! Code object & instruction model (component B).
//!
//! Purely data: the evaluator reads it, it is never mutated after
//! construction. A real marshal/decoder would build these directly; in this
//! workspace they're assembled through [`crate::codeobj::CodeObjectBuilder`].

use crate::object::PyObjectRef;
use bitflags::bitflags;
use std::fmt;
use std::rc::Rc;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct CodeFlags: u16 {
        /// Accepts a trailing `*args` parameter.
        const VARARGS   = 0x0001;
        /// Accepts a trailing `**kwargs` parameter.
        const VARKWARGS = 0x0002;
        /// Calling this code creates a generator instead of executing immediately.
        const GENERATOR = 0x0004;
        /// Declared `async def` (generator-like suspension, not scheduled here).
        const ASYNC     = 0x0008;
        /// Nested inside another function (may reference freevars).
        const NESTED    = 0x0010;
    }
}

/// A jump/branch target, expressed as a logical instruction index (not a
/// byte offset — mapping raw offsets to indices is the decoder's concern).
pub type Label = u32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    And,
    Or,
    Xor,
    MatMul,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Not,
    Invert,
    Positive,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

/// Kind of a block-stack entry (spec.md §4.D "Block stack").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Loop,
    Except,
    Finally,
    With,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RaiseKind {
    /// `raise` with no operands: re-raise the currently-handled exception.
    Reraise,
    /// `raise X`.
    Raise,
    /// `raise X from Y`.
    RaiseCause,
}

/// One decoded bytecode instruction. Operand indices (`idx`) are validated
/// against the owning code object's pools at construction time by
/// [`crate::codeobj::CodeObjectBuilder`]; the evaluator trusts them (an
/// out-of-range index found at runtime is an interpreter-fatal bug, never a
/// user-level exception — spec.md §4.D "Fetch-execute invariants").
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    // -- constant & name loads --------------------------------------------
    LoadConst { idx: u32 },
    LoadFast { idx: u32 },
    LoadGlobal { idx: u32 },
    LoadDeref { idx: u32 },
    LoadClosure { idx: u32 },

    // -- stores -------------------------------------------------------------
    StoreFast { idx: u32 },
    StoreGlobal { idx: u32 },
    StoreDeref { idx: u32 },

    // -- deletes --------------------------------------------------------------
    DeleteFast { idx: u32 },
    DeleteGlobal { idx: u32 },

    // -- stack manipulation ---------------------------------------------------
    DupTop,
    PopTop,
    RotN { n: u32 },
    Swap,

    // -- arithmetic / comparison / unary --------------------------------------
    BinaryOp { op: BinaryOperator },
    UnaryOp { op: UnaryOperator },
    CompareOp { op: ComparisonOperator },

    // -- container construction ------------------------------------------------
    BuildTuple { size: u32 },
    BuildList { size: u32 },
    BuildSet { size: u32 },
    BuildMap { size: u32 },
    BuildSlice { has_step: bool },

    // -- attribute & subscription -----------------------------------------------
    LoadAttr { idx: u32 },
    StoreAttr { idx: u32 },
    DeleteAttr { idx: u32 },
    BinarySubscr,
    StoreSubscr,
    DeleteSubscr,

    // -- control flow -----------------------------------------------------------
    Jump { target: Label },
    JumpIfTrue { target: Label },
    JumpIfFalse { target: Label },
    JumpIfTruePopped { target: Label },
    JumpIfFalsePopped { target: Label },
    JumpIfTrueOrPop { target: Label },
    JumpIfFalseOrPop { target: Label },

    // -- iteration ----------------------------------------------------------------
    GetIter,
    ForIter { target: Label },

    // -- block stack --------------------------------------------------------------
    SetupLoop { handler: Label },
    SetupExcept { handler: Label },
    SetupFinally { handler: Label },
    SetupWith { handler: Label },
    PopBlock,
    PopExcept,

    // -- call / return --------------------------------------------------------------
    CallFunction { argc: u32, has_kwargs: bool },
    ReturnValue,
    YieldValue,
    Raise { kind: RaiseKind },

    // -- function construction ----------------------------------------------------
    MakeFunction { idx: u32 },

    // -- import (out of scope; signals NotImplementedError if reached) ------------
    ImportName { idx: u32 },

    /// No-op, used as a jump landing pad in tests.
    Nop,
}

/// Immutable program representation for one function or module body.
///
/// Field meanings follow spec.md §3 "Code object" exactly.
#[derive(Debug)]
pub struct CodeObject {
    pub instructions: Vec<Instruction>,
    pub consts: Vec<PyObjectRef>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub arg_count: u32,
    pub kwonlyarg_count: u32,
    pub flags: CodeFlags,
    pub stack_size: u32,
    pub filename: String,
    pub codename: String,
    pub first_line: u32,
    /// logical-index -> source line, parallel to `instructions`.
    pub lines: Vec<u32>,
}

pub type CodeObjectRef = Rc<CodeObject>;

impl CodeObject {
    pub fn varname_index(&self, name: &str) -> Option<usize> {
        self.varnames.iter().position(|n| n == name)
    }

    pub fn cellvar_index(&self, name: &str) -> Option<usize> {
        self.cellvars.iter().position(|n| n == name)
    }

    pub fn freevar_index(&self, name: &str) -> Option<usize> {
        self.freevars.iter().position(|n| n == name)
    }

    pub fn line_for(&self, ip: usize) -> u32 {
        self.lines.get(ip).copied().unwrap_or(self.first_line)
    }
}

impl fmt::Display for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<code {} at {}:{}>", self.codename, self.filename, self.first_line)
    }
}
