//! Call protocol (component E, spec.md §4.E): signature binding, the
//! user/builtin function payloads, closures, and bound methods.

use crate::bytecode::CodeObjectRef;
use crate::object::{PyModule, PyObjectRef};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// A single mutable indirection box (spec.md §3 "Cell"). Shared by
/// reference between the defining frame and every inner function's
/// closure array.
#[derive(Debug, Clone)]
pub struct PyCell(pub Rc<RefCell<Option<PyObjectRef>>>);

impl PyCell {
    pub fn empty() -> Self {
        Self(Rc::new(RefCell::new(None)))
    }

    pub fn new(value: PyObjectRef) -> Self {
        Self(Rc::new(RefCell::new(Some(value))))
    }

    pub fn get(&self) -> Option<PyObjectRef> {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: PyObjectRef) {
        *self.0.borrow_mut() = Some(value);
    }
}

/// Arguments as actually supplied at a call site, before binding.
#[derive(Debug, Default, Clone)]
pub struct FuncArgs {
    pub positional: Vec<PyObjectRef>,
    pub keywords: IndexMap<String, PyObjectRef>,
}

impl FuncArgs {
    pub fn new(positional: Vec<PyObjectRef>, keywords: IndexMap<String, PyObjectRef>) -> Self {
        Self { positional, keywords }
    }
}

/// A user function pairs a code object with its defaults, closure and
/// defining module (spec.md §3 "Function (user)").
#[derive(Debug, Clone)]
pub struct PyFunction {
    pub code: CodeObjectRef,
    pub name: String,
    /// Positional-default tail, aligned to the *end* of the positional
    /// parameter list.
    pub defaults: Vec<PyObjectRef>,
    /// Keyword-only defaults, by parameter name.
    pub kwdefaults: IndexMap<String, PyObjectRef>,
    /// One cell per freevar, aligned by index with `code.freevars`.
    pub closure: Vec<PyCell>,
    pub module: Rc<PyModule>,
}

/// A bound-in-Rust builtin's signature declares what a parameter accepts
/// (spec.md §6 "Builtin-function contract").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    PositionalStar,
    Keyword,
    KeywordStar,
}

#[derive(Debug, Clone)]
pub struct BuiltinParam {
    pub name: &'static str,
    pub kind: ParamKind,
}

pub type BuiltinImpl = Rc<dyn Fn(&mut crate::interpreter::Interpreter, FuncArgs) -> crate::PyResult>;

#[derive(Clone)]
pub struct PyBuiltinFunction {
    pub name: &'static str,
    pub params: Vec<BuiltinParam>,
    pub implementation: BuiltinImpl,
}

impl std::fmt::Debug for PyBuiltinFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<builtin_function_or_method '{}'>", self.name)
    }
}

/// Produced by attribute lookup when a function-kind value is found on a
/// value's type and bound to that value (spec.md §4.A "Found descriptors
/// of type function bind to v as a bound method").
#[derive(Debug, Clone)]
pub struct PyBoundMethod {
    pub receiver: PyObjectRef,
    pub function: PyObjectRef,
}

/// Signature derived once from a code object and cached on the function
/// value it belongs to (spec.md §3: "derived once ... and cached"). Bare
/// data; no behavior beyond what [`bind`] needs.
#[derive(Debug, Clone)]
pub struct Signature {
    pub positional_names: Vec<String>,
    pub kwonly_names: Vec<String>,
    pub has_varargs: bool,
    pub has_varkwargs: bool,
}

impl Signature {
    pub fn from_code(code: &crate::bytecode::CodeObject) -> Self {
        let arg_count = code.arg_count as usize;
        let kwonly_count = code.kwonlyarg_count as usize;
        Self {
            positional_names: code.varnames[..arg_count].to_vec(),
            kwonly_names: code.varnames[arg_count..arg_count + kwonly_count].to_vec(),
            has_varargs: code.flags.contains(crate::bytecode::CodeFlags::VARARGS),
            has_varkwargs: code.flags.contains(crate::bytecode::CodeFlags::VARKWARGS),
        }
    }
}

/// Outcome of binding one call against a [`PyFunction`]: values for every
/// local slot that the signature covers (not `locals` generally, just the
/// parameter prefix of `varnames`), matching spec.md §4.E steps 1-5.
pub struct BoundArgs {
    pub slots: Vec<Option<PyObjectRef>>,
}

/// Bind a call `f(args..., kw=...)` against `func`'s signature, per the
/// five-step algorithm in spec.md §4.E.
pub fn bind_call(
    vm: &mut crate::interpreter::Interpreter,
    func: &PyFunction,
    mut args: FuncArgs,
) -> crate::PyResult<BoundArgs> {
    let sig = Signature::from_code(&func.code);
    let n_positional = sig.positional_names.len();
    let n_slots = func.code.varnames.len();
    let mut slots: Vec<Option<PyObjectRef>> = vec![None; n_slots];

    // Step 1/2: reject (or collect) positionals beyond declared capacity.
    if args.positional.len() > n_positional {
        if sig.has_varargs {
            let tail: Vec<_> = args.positional.split_off(n_positional);
            slots[n_positional] = Some(vm.new_tuple(tail));
            // shift varargs into its slot index: varnames layout is
            // [positional..., *varargs?, keyword-only...]; varargs occupies
            // the slot right after positionals when present.
        } else {
            return Err(vm.new_type_error(format!(
                "{}() takes {} positional argument{} but {} were given",
                func.name,
                n_positional,
                if n_positional == 1 { "" } else { "s" },
                args.positional.len() + args.keywords.len()
            )));
        }
    }
    for (i, value) in args.positional.into_iter().take(n_positional).enumerate() {
        slots[i] = Some(value);
    }

    // Step 3: keyword arguments.
    let mut extra_kwargs = IndexMap::new();
    for (name, value) in args.keywords.into_iter() {
        if let Some(i) = sig.positional_names.iter().position(|n| *n == name) {
            if slots[i].is_some() {
                return Err(vm.new_type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    func.name, name
                )));
            }
            slots[i] = Some(value);
        } else if let Some(j) = sig.kwonly_names.iter().position(|n| *n == name) {
            let idx = n_positional + (sig.has_varargs as usize) + j;
            slots[idx] = Some(value);
        } else if sig.has_varkwargs {
            extra_kwargs.insert(name, value);
        } else {
            return Err(vm.new_type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                func.name, name
            )));
        }
    }
    if sig.has_varkwargs {
        let idx = n_positional + (sig.has_varargs as usize) + sig.kwonly_names.len();
        let dict = vm.new_dict_from_str_keys(extra_kwargs);
        slots[idx] = Some(dict);
    }
    if sig.has_varargs && slots[n_positional].is_none() {
        slots[n_positional] = Some(vm.new_tuple(vec![]));
    }

    // Step 4: fill defaults.
    let n_defaults = func.defaults.len();
    for (i, default) in func.defaults.iter().enumerate() {
        let slot = n_positional - n_defaults + i;
        if slots[slot].is_none() {
            slots[slot] = Some(default.clone());
        }
    }
    for (j, name) in sig.kwonly_names.iter().enumerate() {
        let idx = n_positional + (sig.has_varargs as usize) + j;
        if slots[idx].is_none() {
            if let Some(default) = func.kwdefaults.get(name) {
                slots[idx] = Some(default.clone());
            }
        }
    }

    let missing: Vec<&str> = sig
        .positional_names
        .iter()
        .chain(sig.kwonly_names.iter())
        .enumerate()
        .filter_map(|(i, name)| {
            let idx = if i < n_positional {
                i
            } else {
                n_positional + (sig.has_varargs as usize) + (i - n_positional)
            };
            if slots[idx].is_none() {
                Some(name.as_str())
            } else {
                None
            }
        })
        .collect();
    if !missing.is_empty() {
        return Err(vm.new_type_error(format!(
            "{}() missing required argument(s): {}",
            func.name,
            missing.join(", ")
        )));
    }

    Ok(BoundArgs { slots })
}

/// Bind a call against a builtin's declared parameter list, returning the
/// `name -> value` map the implementation receives (spec.md §6).
pub fn bind_builtin(
    vm: &mut crate::interpreter::Interpreter,
    builtin: &PyBuiltinFunction,
    args: FuncArgs,
) -> crate::PyResult<FuncArgs> {
    // Builtins in this workspace accept args verbatim; positional/star
    // validation mirrors user-function binding but most builtins here are
    // simple enough that we only check arity when no star params exist.
    let has_star = builtin
        .params
        .iter()
        .any(|p| matches!(p.kind, ParamKind::PositionalStar | ParamKind::KeywordStar));
    if !has_star {
        let max = builtin
            .params
            .iter()
            .filter(|p| matches!(p.kind, ParamKind::Positional | ParamKind::Keyword))
            .count();
        if args.positional.len() + args.keywords.len() > max {
            return Err(vm.new_type_error(format!(
                "{}() takes at most {} argument(s)",
                builtin.name, max
            )));
        }
    }
    Ok(args)
}
