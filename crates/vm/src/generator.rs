//! Generators & iteration (component F, spec.md §4.F).
//!
//! A generator is an explicit suspended-frame value — no host-language
//! coroutine machinery is used (spec.md §9 design note). Re-entering a
//! generator is just resuming the evaluator loop with the saved frame.

use crate::frame::FrameRef;
use crate::interpreter::Interpreter;
use crate::object::PyObjectRef;
use crate::PyResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenState {
    Created,
    Running,
    Suspended,
    Exhausted,
}

#[derive(Debug)]
pub struct GeneratorState {
    pub frame: FrameRef,
    pub state: GenState,
}

/// Outcome of driving one step of the evaluator over a generator's frame.
pub enum GenStep {
    Yielded(PyObjectRef),
    Returned(PyObjectRef),
}

impl GeneratorState {
    pub fn new(frame: FrameRef) -> Self {
        Self {
            frame,
            state: GenState::Created,
        }
    }

    /// Implements the `next` hook contract of spec.md §4.F.
    pub fn next(&mut self, vm: &mut Interpreter) -> PyResult<PyObjectRef> {
        if self.state == GenState::Exhausted {
            return Err(vm.new_stop_iteration(None));
        }
        if self.state == GenState::Running {
            return Err(vm.new_value_error("generator already executing"));
        }
        self.state = GenState::Running;
        let result = vm.resume_frame(self.frame.clone());
        match result {
            Ok(GenStep::Yielded(value)) => {
                self.state = GenState::Suspended;
                Ok(value)
            }
            Ok(GenStep::Returned(value)) => {
                self.state = GenState::Exhausted;
                let payload = if vm.is_none(&value) { None } else { Some(value) };
                Err(vm.new_stop_iteration(payload))
            }
            Err(exc) => {
                self.state = GenState::Exhausted;
                Err(exc)
            }
        }
    }
}
