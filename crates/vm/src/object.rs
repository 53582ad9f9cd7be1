//! Universal value representation (component A, spec.md §3 "PyObject").
//!
//! Dynamic dispatch here is a tagged sum of value kinds rather than a deep
//! subtype hierarchy or trait-object vtable, per the explicit design note in
//! spec.md §9 ("Prefer this over deep subtype hierarchies"). Every kind's
//! operation table lives in [`crate::dispatch`], keyed off this enum.

use crate::bytecode::CodeObjectRef;
use crate::exceptions::PyExceptionData;
use crate::frame::FrameRef;
use crate::function::{PyBoundMethod, PyBuiltinFunction, PyCell, PyFunction};
use crate::generator::GeneratorState;
use crate::types::PyTypeRef;
use indexmap::IndexMap;
use malachite_bigint::BigInt;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type PyObjectRef = Rc<PyObject>;

/// Insertion-ordered, unique-key mapping used for `dict` and `set` values,
/// keyed by arbitrary hashable `PyObjectRef`s (spec.md §3 invariant).
pub type PyDict = IndexMap<DictKey, PyObjectRef>;

/// Insertion-ordered mapping keyed by identifier strings: instance
/// attribute dicts and module namespaces never take non-string keys, unlike
/// a user-level `dict` value.
pub type AttrDict = IndexMap<String, PyObjectRef>;

/// A value's type descriptor is fixed for its lifetime; the instance
/// dictionary is absent ("dictless") for built-in scalar/sequence kinds.
pub struct PyObject {
    pub class: RefCell<PyTypeRef>,
    pub dict: Option<RefCell<AttrDict>>,
    pub payload: RefCell<PyObjectPayload>,
}

impl fmt::Debug for PyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PyObject({:?})", self.payload.borrow())
    }
}

/// Hashable wrapper around a [`PyObjectRef`] for use as a dict/set key.
/// Hash and equality are computed through [`crate::dispatch`] so that
/// hashable kinds (numbers, text, tuples-of-hashables, `None`, `type`) stay
/// consistent with Python equality (spec.md §3 invariant).
#[derive(Clone)]
pub struct DictKey(pub PyObjectRef);

impl std::hash::Hash for DictKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        let h = crate::dispatch::hash_value(&self.0).unwrap_or(0);
        h.hash(state);
    }
}

impl PartialEq for DictKey {
    fn eq(&self, other: &Self) -> bool {
        crate::dispatch::eq_value_unchecked(&self.0, &other.0)
    }
}
impl Eq for DictKey {}

impl fmt::Debug for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.payload.borrow())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyRange {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl PyRange {
    /// Number of elements; tests the sign of the step rather than the
    /// source's buggy half-open `>=` comparison (spec.md §9 open question).
    pub fn len(&self) -> i64 {
        if self.step > 0 {
            if self.stop <= self.start {
                0
            } else {
                (self.stop - self.start + self.step - 1) / self.step
            }
        } else if self.step < 0 {
            if self.stop >= self.start {
                0
            } else {
                (self.start - self.stop - self.step - 1) / (-self.step)
            }
        } else {
            0
        }
    }

    pub fn nth(&self, i: i64) -> Option<i64> {
        if i < 0 || i >= self.len() {
            None
        } else {
            Some(self.start + i * self.step)
        }
    }
}

/// Mutable iterator state over a sequence-like value (list, tuple, range,
/// string, dict, set). Produced by the `iter` hook; consumed by `next`.
#[derive(Debug)]
pub enum PyIteratorPayload {
    Sequence { source: PyObjectRef, index: usize },
    Range { range: PyRange, index: i64 },
}

/// A module is a named mapping serving as a function's globals
/// (spec.md §3 "Module").
#[derive(Debug)]
pub struct PyModule {
    pub name: String,
    pub dict: RefCell<AttrDict>,
}

/// The tagged sum of runtime value kinds (spec.md §4.A "Built-in kinds").
pub enum PyObjectPayload {
    None,
    NotImplemented,
    Bool(bool),
    Int(BigInt),
    Str(String),
    Tuple(Vec<PyObjectRef>),
    List(RefCell<Vec<PyObjectRef>>),
    Dict(RefCell<PyDict>),
    Set(RefCell<IndexMap<DictKey, ()>>),
    Range(PyRange),
    Iterator(RefCell<PyIteratorPayload>),
    Function(PyFunction),
    BuiltinFunction(PyBuiltinFunction),
    BoundMethod(PyBoundMethod),
    Type(PyTypeRef),
    Code(CodeObjectRef),
    Cell(PyCell),
    Module(Rc<PyModule>),
    Generator(RefCell<GeneratorState>),
    Exception(PyExceptionData),
    /// A plain instance of a user-defined (or exception) class; all of its
    /// state lives in the instance dictionary.
    Instance,
}

impl fmt::Debug for PyObjectPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::NotImplemented => write!(f, "NotImplemented"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Tuple(t) => write!(f, "tuple[{}]", t.len()),
            Self::List(l) => write!(f, "list[{}]", l.borrow().len()),
            Self::Dict(d) => write!(f, "dict[{}]", d.borrow().len()),
            Self::Set(s) => write!(f, "set[{}]", s.borrow().len()),
            Self::Range(r) => write!(f, "range({}, {}, {})", r.start, r.stop, r.step),
            Self::Iterator(_) => write!(f, "iterator"),
            Self::Function(func) => write!(f, "function {}", func.code.codename),
            Self::BuiltinFunction(b) => write!(f, "builtin_function {}", b.name),
            Self::BoundMethod(_) => write!(f, "bound_method"),
            Self::Type(t) => write!(f, "type {}", t.name),
            Self::Code(c) => write!(f, "{c}"),
            Self::Cell(_) => write!(f, "cell"),
            Self::Module(m) => write!(f, "module {}", m.name),
            Self::Generator(_) => write!(f, "generator"),
            Self::Exception(e) => write!(f, "exception {}", e.message),
            Self::Instance => write!(f, "instance"),
        }
    }
}

impl PyObject {
    pub fn new(class: PyTypeRef, payload: PyObjectPayload, dictful: bool) -> PyObjectRef {
        Rc::new(Self {
            class: RefCell::new(class),
            dict: dictful.then(|| RefCell::new(AttrDict::new())),
            payload: RefCell::new(payload),
        })
    }

    pub fn class(&self) -> PyTypeRef {
        self.class.borrow().clone()
    }

    pub fn is_truthy_payload(&self) -> Option<bool> {
        match &*self.payload.borrow() {
            PyObjectPayload::None => Some(false),
            PyObjectPayload::NotImplemented => Some(true),
            PyObjectPayload::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Two PyObjects are identical iff they're the same allocation — this is
/// what `is`/`is not` and the canonical singletons rely on.
pub fn is_same(a: &PyObjectRef, b: &PyObjectRef) -> bool {
    Rc::ptr_eq(a, b)
}
