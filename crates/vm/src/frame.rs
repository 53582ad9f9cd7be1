//! Per-invocation execution context (component C, spec.md §3/§4.C).

use crate::bytecode::{BlockKind, CodeObjectRef, Label};
use crate::function::PyCell;
use crate::object::{PyModule, PyObjectRef};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// An entry on the frame's block stack (spec.md glossary "Block").
#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    pub handler: Label,
    /// Value-stack depth to restore to when this block is entered for
    /// unwinding.
    pub stack_level: usize,
    /// The context manager a `With` block unwinds through (spec.md §4.G
    /// "On WITH: call the context-manager `__exit__`"); unused by the
    /// other block kinds.
    pub context_manager: Option<PyObjectRef>,
}

#[derive(Debug)]
pub struct Frame {
    pub back: RefCell<Option<FrameRef>>,
    pub code: CodeObjectRef,
    pub func_name: String,
    /// One slot per varname; `None` means "empty" (reading it is an
    /// `UnboundLocalError`, spec.md §4.C).
    pub locals: RefCell<Vec<Option<PyObjectRef>>>,
    pub cells: RefCell<Vec<PyCell>>,
    pub globals: Rc<PyModule>,
    pub builtins: Rc<PyModule>,
    pub stack: RefCell<Vec<PyObjectRef>>,
    pub blocks: RefCell<Vec<Block>>,
    pub ip: Cell<usize>,
    pub last_line: Cell<u32>,
    pub pending_exception: RefCell<Option<PyObjectRef>>,
}

pub type FrameRef = Rc<Frame>;

impl Frame {
    pub fn new(
        code: CodeObjectRef,
        func_name: String,
        cells: Vec<PyCell>,
        globals: Rc<PyModule>,
        builtins: Rc<PyModule>,
    ) -> FrameRef {
        let n = code.varnames.len();
        Rc::new(Self {
            back: RefCell::new(None),
            stack: RefCell::new(Vec::with_capacity(code.stack_size as usize)),
            locals: RefCell::new(vec![None; n]),
            cells: RefCell::new(cells),
            globals,
            builtins,
            blocks: RefCell::new(Vec::new()),
            ip: Cell::new(0),
            last_line: Cell::new(code.first_line),
            pending_exception: RefCell::new(None),
            code,
            func_name,
        })
    }

    pub fn push(&self, value: PyObjectRef) {
        self.stack.borrow_mut().push(value);
    }

    pub fn pop(&self) -> Option<PyObjectRef> {
        self.stack.borrow_mut().pop()
    }

    pub fn top(&self) -> Option<PyObjectRef> {
        self.stack.borrow().last().cloned()
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    pub fn truncate_stack(&self, level: usize) {
        self.stack.borrow_mut().truncate(level);
    }
}
