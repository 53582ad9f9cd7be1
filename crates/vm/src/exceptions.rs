//! Exception machinery (component G, spec.md §4.G) and the exception type
//! hierarchy (spec.md §7).

use crate::object::PyObjectRef;
use crate::types::{BuiltinKind, PyType, PyTypeRef};
use std::rc::Rc;

/// One frame's worth of context recorded when an exception passes through
/// it. Deliberately holds only code/line/name, not the frame itself, to
/// break the frame<->exception reference cycle (spec.md §9).
#[derive(Debug, Clone)]
pub struct TracebackRecord {
    pub filename: String,
    pub line: u32,
    pub funcname: String,
}

/// Payload for an exception-instance value (spec.md §3 "Exception
/// instance").
#[derive(Debug, Clone)]
pub struct PyExceptionData {
    pub message: String,
    pub args: Vec<PyObjectRef>,
    pub cause: Option<PyObjectRef>,
    pub context: Option<PyObjectRef>,
    pub traceback: Vec<TracebackRecord>,
}

impl PyExceptionData {
    pub fn new(message: impl Into<String>, args: Vec<PyObjectRef>) -> Self {
        Self {
            message: message.into(),
            args,
            cause: None,
            context: None,
            traceback: Vec::new(),
        }
    }
}

/// Process-wide, read-only-after-init exception type hierarchy
/// (spec.md §9 "Global mutable state"). `non_exhaustive` exception kinds
/// named in spec.md §7 §1.
pub struct ExceptionZoo {
    pub base_exception: PyTypeRef,
    pub exception: PyTypeRef,
    pub type_error: PyTypeRef,
    pub value_error: PyTypeRef,
    pub name_error: PyTypeRef,
    pub unbound_local_error: PyTypeRef,
    pub attribute_error: PyTypeRef,
    pub lookup_error: PyTypeRef,
    pub key_error: PyTypeRef,
    pub index_error: PyTypeRef,
    pub stop_iteration: PyTypeRef,
    pub arithmetic_error: PyTypeRef,
    pub zero_division_error: PyTypeRef,
    pub recursion_error: PyTypeRef,
    pub not_implemented_error: PyTypeRef,
    pub runtime_error: PyTypeRef,
}

impl ExceptionZoo {
    pub fn init(object_type: &PyTypeRef) -> Self {
        let mk = |name: &str, base: &PyTypeRef| PyType::new(name, Some(base.clone()), BuiltinKind::Exception);

        let base_exception = mk("BaseException", object_type);
        let exception = mk("Exception", &base_exception);
        let type_error = mk("TypeError", &exception);
        let value_error = mk("ValueError", &exception);
        let lookup_error = mk("LookupError", &exception);
        let name_error = mk("NameError", &exception);
        let unbound_local_error = mk("UnboundLocalError", &name_error);
        let attribute_error = mk("AttributeError", &exception);
        let key_error = mk("KeyError", &lookup_error);
        let index_error = mk("IndexError", &lookup_error);
        let stop_iteration = mk("StopIteration", &exception);
        let arithmetic_error = mk("ArithmeticError", &exception);
        let zero_division_error = mk("ZeroDivisionError", &arithmetic_error);
        let runtime_error = mk("RuntimeError", &exception);
        let recursion_error = mk("RecursionError", &runtime_error);
        let not_implemented_error = mk("NotImplementedError", &runtime_error);

        Self {
            base_exception,
            exception,
            type_error,
            value_error,
            name_error,
            unbound_local_error,
            attribute_error,
            lookup_error,
            key_error,
            index_error,
            stop_iteration,
            arithmetic_error,
            zero_division_error,
            recursion_error,
            not_implemented_error,
            runtime_error,
        }
    }

    pub fn all(&self) -> Vec<(&'static str, PyTypeRef)> {
        vec![
            ("BaseException", self.base_exception.clone()),
            ("Exception", self.exception.clone()),
            ("TypeError", self.type_error.clone()),
            ("ValueError", self.value_error.clone()),
            ("NameError", self.name_error.clone()),
            ("UnboundLocalError", self.unbound_local_error.clone()),
            ("AttributeError", self.attribute_error.clone()),
            ("LookupError", self.lookup_error.clone()),
            ("KeyError", self.key_error.clone()),
            ("IndexError", self.index_error.clone()),
            ("StopIteration", self.stop_iteration.clone()),
            ("ArithmeticError", self.arithmetic_error.clone()),
            ("ZeroDivisionError", self.zero_division_error.clone()),
            ("RuntimeError", self.runtime_error.clone()),
            ("RecursionError", self.recursion_error.clone()),
            ("NotImplementedError", self.not_implemented_error.clone()),
        ]
    }
}

/// Render a traceback in the canonical multi-line form (spec.md §6
/// "Output"): header, one frame line per record outermost-to-innermost,
/// then `<Type>: <message>`.
pub fn format_traceback(type_name: &str, data: &PyExceptionData) -> String {
    let mut out = String::from("Traceback (most recent call last):\n");
    for rec in &data.traceback {
        out.push_str(&format!(
            "  File \"{}\", line {}, in {}\n",
            rec.filename, rec.line, rec.funcname
        ));
    }
    out.push_str(&format!("{type_name}: {}", data.message));
    out
}

/// Shared singleton root; created alongside `ExceptionZoo` but defined here
/// because the exception hierarchy's `base_exception` ultimately chains to
/// it.
pub fn new_object_type() -> PyTypeRef {
    PyType::new("object", None, BuiltinKind::Object)
}
