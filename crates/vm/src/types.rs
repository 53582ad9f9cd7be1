//! Type descriptors (spec.md §3 "PyType") and attribute dispatch
//! (spec.md §4.A).

use crate::object::PyObjectRef;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type PyTypeRef = Rc<PyType>;

/// Tag distinguishing the handful of built-in kinds the evaluator's native
/// operation tables care about from plain user-defined classes. Not part of
/// spec.md's data model directly, but the cheapest way to let
/// [`crate::dispatch`] short-circuit to a native implementation before
/// falling back to attribute lookup, matching spec.md §4.A: "either
/// supplies a native implementation or names a magic method".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Object,
    NoneType,
    NotImplementedType,
    Bool,
    Int,
    Str,
    Tuple,
    List,
    Dict,
    Set,
    Range,
    Iterator,
    Function,
    BuiltinFunction,
    BoundMethod,
    Type,
    Code,
    Cell,
    Module,
    Generator,
    Exception,
    /// Plain user-defined class (includes user exception subclasses).
    User,
}

/// Represents a class. The root type ("object") is its own parent
/// (spec.md §3 invariant); we encode that by giving the root a `None`
/// `base` and treating that as "terminates here" rather than creating a
/// self-referential `Rc` cycle.
pub struct PyType {
    pub name: String,
    pub base: Option<PyTypeRef>,
    /// Attribute dictionary: magic methods and other class-level
    /// attributes, keyed by plain attribute name.
    pub attrs: RefCell<IndexMap<String, PyObjectRef>>,
    pub kind: BuiltinKind,
}

impl fmt::Debug for PyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name)
    }
}

impl PyType {
    pub fn new(name: impl Into<String>, base: Option<PyTypeRef>, kind: BuiltinKind) -> PyTypeRef {
        Rc::new(Self {
            name: name.into(),
            base,
            attrs: RefCell::new(IndexMap::new()),
            kind,
        })
    }

    /// Walk this type's parent chain, `self` first, terminating at the root
    /// (spec.md §3 invariant: "every other type's parent chain terminates
    /// at the root").
    pub fn mro(self: &PyTypeRef) -> Vec<PyTypeRef> {
        let mut chain = vec![self.clone()];
        let mut cur = self.clone();
        while let Some(base) = cur.base.clone() {
            chain.push(base.clone());
            cur = base;
        }
        chain
    }

    pub fn is_subclass_of(self: &PyTypeRef, other: &PyTypeRef) -> bool {
        self.mro().iter().any(|t| Rc::ptr_eq(t, other))
    }

    /// Look up `name` along the parent chain only (does not consult any
    /// instance dict) — this is what spec.md §4.A calls "walk v's type's
    /// parent chain, returning the first hit".
    pub fn lookup(self: &PyTypeRef, name: &str) -> Option<PyObjectRef> {
        for t in self.mro() {
            if let Some(v) = t.attrs.borrow().get(name) {
                return Some(v.clone());
            }
        }
        None
    }

    pub fn set_attr(&self, name: &str, value: PyObjectRef) {
        self.attrs.borrow_mut().insert(name.to_string(), value);
    }
}
