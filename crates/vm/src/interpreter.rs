//! The `Interpreter`: owns the process-wide singletons (spec.md §9
//! "Global mutable state"), the call protocol entry points (component E),
//! and the top-level run/report loop (spec.md §6 "Output").

use crate::bytecode::CodeObjectRef;
use crate::config::VmConfig;
use crate::dispatch;
use crate::eval::{self, EvalOutcome, FrameExit};
use crate::exceptions::{format_traceback, ExceptionZoo, PyExceptionData, TracebackRecord};
use crate::frame::{Frame, FrameRef};
use crate::function::{
    bind_builtin, bind_call, BuiltinImpl, BuiltinParam, FuncArgs, ParamKind, PyBoundMethod,
    PyBuiltinFunction, PyCell, PyFunction,
};
use crate::generator::{GenStep, GeneratorState};
use crate::object::{PyDict, PyIteratorPayload, PyModule, PyObject, PyObjectPayload, PyObjectRef};
use crate::types::{BuiltinKind, PyType, PyTypeRef};
use crate::PyResult;
use indexmap::IndexMap;
use malachite_bigint::BigInt;
use std::cell::RefCell;
use std::rc::Rc;

/// Process-wide type descriptors, created once per `Interpreter` (tests
/// want independent interpreters, spec.md §9: "Test suites must be able to
/// construct a fresh interpreter instance ... without reinitializing
/// singletons" — here "singletons" are per-`Interpreter`, which is the
/// granularity at which this workspace creates separate VMs).
pub struct TypeContext {
    pub object_type: PyTypeRef,
    pub none_type: PyTypeRef,
    pub not_implemented_type: PyTypeRef,
    pub bool_type: PyTypeRef,
    pub int_type: PyTypeRef,
    pub str_type: PyTypeRef,
    pub tuple_type: PyTypeRef,
    pub list_type: PyTypeRef,
    pub dict_type: PyTypeRef,
    pub set_type: PyTypeRef,
    pub range_type: PyTypeRef,
    pub iterator_type: PyTypeRef,
    pub function_type: PyTypeRef,
    pub builtin_function_type: PyTypeRef,
    pub bound_method_type: PyTypeRef,
    pub type_type: PyTypeRef,
    pub code_type: PyTypeRef,
    pub cell_type: PyTypeRef,
    pub module_type: PyTypeRef,
    pub generator_type: PyTypeRef,
    pub exceptions: ExceptionZoo,
}

impl TypeContext {
    fn new() -> Self {
        let object_type = crate::exceptions::new_object_type();
        let mk = |name: &str, kind: BuiltinKind| PyType::new(name, Some(object_type.clone()), kind);
        let exceptions = ExceptionZoo::init(&object_type);
        let int_type = mk("int", BuiltinKind::Int);
        // bool is an int subtype (spec.md §3 "Built-in kinds"), not a direct
        // child of object like the other scalar kinds.
        let bool_type = PyType::new("bool", Some(int_type.clone()), BuiltinKind::Bool);
        Self {
            none_type: mk("NoneType", BuiltinKind::NoneType),
            not_implemented_type: mk("NotImplementedType", BuiltinKind::NotImplementedType),
            bool_type,
            int_type,
            str_type: mk("str", BuiltinKind::Str),
            tuple_type: mk("tuple", BuiltinKind::Tuple),
            list_type: mk("list", BuiltinKind::List),
            dict_type: mk("dict", BuiltinKind::Dict),
            set_type: mk("set", BuiltinKind::Set),
            range_type: mk("range", BuiltinKind::Range),
            iterator_type: mk("iterator", BuiltinKind::Iterator),
            function_type: mk("function", BuiltinKind::Function),
            builtin_function_type: mk("builtin_function_or_method", BuiltinKind::BuiltinFunction),
            bound_method_type: mk("method", BuiltinKind::BoundMethod),
            type_type: mk("type", BuiltinKind::Type),
            code_type: mk("code", BuiltinKind::Code),
            cell_type: mk("cell", BuiltinKind::Cell),
            module_type: mk("module", BuiltinKind::Module),
            generator_type: mk("generator", BuiltinKind::Generator),
            exceptions,
            object_type,
        }
    }
}

pub struct Interpreter {
    pub types: TypeContext,
    pub none: PyObjectRef,
    pub not_implemented: PyObjectRef,
    pub true_obj: PyObjectRef,
    pub false_obj: PyObjectRef,
    pub builtins_module: Rc<PyModule>,
    pub config: VmConfig,
    call_depth: usize,
}

impl Interpreter {
    pub fn new(config: VmConfig) -> Self {
        let types = TypeContext::new();
        let none = PyObject::new(types.none_type.clone(), PyObjectPayload::None, false);
        let not_implemented = PyObject::new(
            types.not_implemented_type.clone(),
            PyObjectPayload::NotImplemented,
            false,
        );
        let true_obj = PyObject::new(types.bool_type.clone(), PyObjectPayload::Bool(true), false);
        let false_obj = PyObject::new(types.bool_type.clone(), PyObjectPayload::Bool(false), false);
        let builtins_module = Rc::new(PyModule {
            name: "builtins".to_string(),
            dict: RefCell::new(crate::object::AttrDict::new()),
        });

        let mut vm = Self {
            types,
            none,
            not_implemented,
            true_obj,
            false_obj,
            builtins_module,
            config,
            call_depth: 0,
        };
        crate::builtins_fn::install(&mut vm);
        vm
    }

    // ---- singleton / constant constructors --------------------------------

    pub fn is_none(&self, obj: &PyObjectRef) -> bool {
        matches!(&*obj.payload.borrow(), PyObjectPayload::None)
    }

    pub fn new_bool(&self, value: bool) -> PyObjectRef {
        if value {
            self.true_obj.clone()
        } else {
            self.false_obj.clone()
        }
    }

    pub fn new_int(&self, value: BigInt) -> PyObjectRef {
        PyObject::new(self.types.int_type.clone(), PyObjectPayload::Int(value), false)
    }

    pub fn new_str(&self, value: impl Into<String>) -> PyObjectRef {
        PyObject::new(self.types.str_type.clone(), PyObjectPayload::Str(value.into()), false)
    }

    pub fn new_tuple(&self, items: Vec<PyObjectRef>) -> PyObjectRef {
        PyObject::new(self.types.tuple_type.clone(), PyObjectPayload::Tuple(items), false)
    }

    pub fn new_list(&self, items: Vec<PyObjectRef>) -> PyObjectRef {
        PyObject::new(
            self.types.list_type.clone(),
            PyObjectPayload::List(RefCell::new(items)),
            false,
        )
    }

    pub fn new_dict(&self, items: PyDict) -> PyObjectRef {
        PyObject::new(self.types.dict_type.clone(), PyObjectPayload::Dict(RefCell::new(items)), false)
    }

    pub fn new_dict_from_str_keys(&self, items: IndexMap<String, PyObjectRef>) -> PyObjectRef {
        let mut dict = PyDict::new();
        for (k, v) in items {
            dict.insert(crate::object::DictKey(self.new_str(k)), v);
        }
        self.new_dict(dict)
    }

    pub fn new_set(&self, items: IndexMap<crate::object::DictKey, ()>) -> PyObjectRef {
        PyObject::new(self.types.set_type.clone(), PyObjectPayload::Set(RefCell::new(items)), false)
    }

    pub fn new_range(&self, start: i64, stop: i64, step: i64) -> PyObjectRef {
        PyObject::new(
            self.types.range_type.clone(),
            PyObjectPayload::Range(crate::object::PyRange { start, stop, step }),
            false,
        )
    }

    pub fn new_iterator(&self, state: PyIteratorPayload) -> PyObjectRef {
        PyObject::new(
            self.types.iterator_type.clone(),
            PyObjectPayload::Iterator(RefCell::new(state)),
            false,
        )
    }

    pub fn new_bound_method(&self, receiver: PyObjectRef, function: PyObjectRef) -> PyObjectRef {
        PyObject::new(
            self.types.bound_method_type.clone(),
            PyObjectPayload::BoundMethod(PyBoundMethod { receiver, function }),
            false,
        )
    }

    pub fn new_function(&self, func: PyFunction) -> PyObjectRef {
        PyObject::new(self.types.function_type.clone(), PyObjectPayload::Function(func), false)
    }

    pub fn new_code_object(&self, code: CodeObjectRef) -> PyObjectRef {
        PyObject::new(self.types.code_type.clone(), PyObjectPayload::Code(code), false)
    }

    pub fn new_cell(&self, cell: PyCell) -> PyObjectRef {
        PyObject::new(self.types.cell_type.clone(), PyObjectPayload::Cell(cell), false)
    }

    pub fn new_module(&self, module: Rc<PyModule>) -> PyObjectRef {
        PyObject::new(self.types.module_type.clone(), PyObjectPayload::Module(module), false)
    }

    pub fn new_type_value(&self, ty: PyTypeRef) -> PyObjectRef {
        PyObject::new(self.types.type_type.clone(), PyObjectPayload::Type(ty), false)
    }

    pub fn register_builtin(
        &mut self,
        name: &'static str,
        params: Vec<(&'static str, ParamKind)>,
        implementation: BuiltinImpl,
    ) {
        let params = params
            .into_iter()
            .map(|(name, kind)| BuiltinParam { name, kind })
            .collect();
        let func = PyObject::new(
            self.types.builtin_function_type.clone(),
            PyObjectPayload::BuiltinFunction(PyBuiltinFunction {
                name,
                params,
                implementation,
            }),
            false,
        );
        self.builtins_module.dict.borrow_mut().insert(name.to_string(), func);
    }

    // ---- exception constructors (spec.md §7) -------------------------------

    fn new_exception_of(&self, ty: PyTypeRef, message: impl Into<String>) -> PyObjectRef {
        let message = message.into();
        let args = vec![self.new_str(message.clone())];
        PyObject::new(ty, PyObjectPayload::Exception(PyExceptionData::new(message, args)), true)
    }

    pub fn new_type_error(&self, msg: impl Into<String>) -> PyObjectRef {
        self.new_exception_of(self.types.exceptions.type_error.clone(), msg)
    }
    pub fn new_value_error(&self, msg: impl Into<String>) -> PyObjectRef {
        self.new_exception_of(self.types.exceptions.value_error.clone(), msg)
    }
    pub fn new_name_error(&self, msg: impl Into<String>) -> PyObjectRef {
        self.new_exception_of(self.types.exceptions.name_error.clone(), msg)
    }
    pub fn new_unbound_local_error(&self, msg: impl Into<String>) -> PyObjectRef {
        self.new_exception_of(self.types.exceptions.unbound_local_error.clone(), msg)
    }
    pub fn new_attribute_error(&self, msg: impl Into<String>) -> PyObjectRef {
        self.new_exception_of(self.types.exceptions.attribute_error.clone(), msg)
    }
    pub fn new_index_error(&self, msg: impl Into<String>) -> PyObjectRef {
        self.new_exception_of(self.types.exceptions.index_error.clone(), msg)
    }
    pub fn new_zero_division_error(&self, msg: impl Into<String>) -> PyObjectRef {
        self.new_exception_of(self.types.exceptions.zero_division_error.clone(), msg)
    }
    pub fn new_recursion_error(&self, msg: impl Into<String>) -> PyObjectRef {
        self.new_exception_of(self.types.exceptions.recursion_error.clone(), msg)
    }
    pub fn new_not_implemented_error(&self, msg: impl Into<String>) -> PyObjectRef {
        self.new_exception_of(self.types.exceptions.not_implemented_error.clone(), msg)
    }

    /// A bare `raise` outside any active exception handler (spec.md §4.G:
    /// not a real Python runtime state the block-stack model can reach
    /// under normal compilation, but the evaluator must still produce a
    /// `PyResult` rather than panic if it's ever hit).
    pub fn new_runtime_error_no_active_exception(&self) -> PyObjectRef {
        self.new_exception_of(
            self.types.exceptions.runtime_error.clone(),
            "No active exception to re-raise",
        )
    }

    pub fn new_key_error(&self, key: PyObjectRef) -> PyObjectRef {
        let message = format!("{key:?}");
        let ty = self.types.exceptions.key_error.clone();
        PyObject::new(
            ty,
            PyObjectPayload::Exception(PyExceptionData::new(message, vec![key])),
            true,
        )
    }

    /// `StopIteration`, optionally carrying a generator's return value
    /// (spec.md §4.F step 4).
    pub fn new_stop_iteration(&self, value: Option<PyObjectRef>) -> PyObjectRef {
        let ty = self.types.exceptions.stop_iteration.clone();
        let args = value.clone().into_iter().collect();
        let message = value.map(|v| format!("{v:?}")).unwrap_or_default();
        PyObject::new(ty, PyObjectPayload::Exception(PyExceptionData::new(message, args)), true)
    }

    /// Raise a caller-defined exception type with a message (used by
    /// `raise` and by builtin implementations that want a custom type,
    /// e.g. a user-declared subclass of `Exception`).
    pub fn new_exception(&self, ty: PyTypeRef, msg: impl Into<String>) -> PyObjectRef {
        self.new_exception_of(ty, msg)
    }

    pub fn exception_message(&self, exc: &PyObjectRef) -> String {
        match &*exc.payload.borrow() {
            PyObjectPayload::Exception(data) => data.message.clone(),
            _ => String::new(),
        }
    }

    pub fn exception_type_name(&self, exc: &PyObjectRef) -> String {
        exc.class().name.clone()
    }

    /// Record the current frame on an exception's traceback chain
    /// (spec.md §4.G: "pushes a frame+IP+line record"). Traceback records
    /// accumulate innermost-last as the exception is constructed and then
    /// propagated; `format_traceback` renders them outermost-first because
    /// records are pushed in call order (module frame first).
    pub fn record_traceback(&self, exc: &PyObjectRef, frame: &FrameRef) {
        if let PyObjectPayload::Exception(data) = &mut *exc.payload.borrow_mut() {
            data.traceback.insert(
                0,
                TracebackRecord {
                    filename: frame.code.filename.clone(),
                    line: frame.last_line.get(),
                    funcname: frame.func_name.clone(),
                },
            );
        }
    }

    pub fn print_unhandled(&self, exc: &PyObjectRef) {
        let type_name = self.exception_type_name(exc);
        if let PyObjectPayload::Exception(data) = &*exc.payload.borrow() {
            eprintln!("{}", format_traceback(&type_name, data));
        }
    }

    // ---- call protocol (component E) ---------------------------------------

    pub fn call_object(&mut self, callable: &PyObjectRef, args: FuncArgs) -> PyResult {
        match callable.payload.borrow().clone_kind() {
            CallKind::Function(func) => self.call_user_function(&func, args),
            CallKind::Builtin(builtin) => {
                let bound = bind_builtin(self, &builtin, args)?;
                (builtin.implementation)(self, bound)
            }
            CallKind::BoundMethod(bound) => {
                let mut full = FuncArgs::new(vec![bound.receiver.clone()], args.keywords);
                full.positional.extend(args.positional);
                self.call_object(&bound.function, full)
            }
            CallKind::Type(ty) => self.instantiate(&ty, args),
            CallKind::NotCallable => Err(self.new_type_error(format!(
                "'{}' object is not callable",
                callable.class().name
            ))),
        }
    }

    fn instantiate(&mut self, ty: &PyTypeRef, args: FuncArgs) -> PyResult {
        // Constructor hook: build a fresh instance and, if the type (or an
        // ancestor) declares `__init__`, call it with keyword/positional
        // arguments (spec.md §3 "a constructor hook mapping keyword
        // arguments to a new instance").
        if ty.is_subclass_of(&self.types.exceptions.base_exception) {
            let message = args
                .positional
                .first()
                .map(|v| dispatch::to_str(self, v))
                .transpose()?
                .unwrap_or_default();
            return Ok(self.new_exception_of(ty.clone(), message));
        }
        let instance = PyObject::new(ty.clone(), PyObjectPayload::Instance, true);
        if let Some(init) = ty.lookup("__init__") {
            let mut full = FuncArgs::new(vec![instance.clone()], args.keywords);
            full.positional.extend(args.positional);
            self.call_object(&init, full)?;
        }
        Ok(instance)
    }

    fn call_user_function(&mut self, func: &PyFunction, args: FuncArgs) -> PyResult {
        let bound = bind_call(self, func, args)?;
        // `frame.cells` is indexed as cellvars first, then freevars
        // (spec.md §4.C "Cell" / glossary), so a fresh per-call cell is
        // made for each of this code object's own cellvars, followed by
        // the inherited closure cells aligned to `code.freevars`.
        let mut cells: Vec<PyCell> = (0..func.code.cellvars.len()).map(|_| PyCell::empty()).collect();
        cells.extend(func.closure.iter().cloned());
        let frame = Frame::new(
            func.code.clone(),
            func.name.clone(),
            cells,
            func.module.clone(),
            self.builtins_module.clone(),
        );
        *frame.locals.borrow_mut() = bound.slots;

        if func.code.flags.contains(crate::bytecode::CodeFlags::GENERATOR) {
            let gen = GeneratorState::new(frame);
            return Ok(PyObject::new(
                self.types.generator_type.clone(),
                PyObjectPayload::Generator(RefCell::new(gen)),
                false,
            ));
        }

        self.call_depth += 1;
        if self.call_depth > self.config.recursion_limit {
            self.call_depth -= 1;
            log::debug!("recursion limit {} exceeded calling '{}'", self.config.recursion_limit, func.name);
            return Err(self.new_recursion_error("maximum recursion depth exceeded"));
        }
        log::trace!("entering frame '{}' (depth {})", func.name, self.call_depth);
        let result = self.drive(frame);
        log::trace!("leaving frame '{}' (depth {})", func.name, self.call_depth);
        self.call_depth -= 1;
        match result? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(_) => unreachable!("yield outside a generator-flagged frame"),
        }
    }

    /// Drive the evaluator over `frame` until it returns, yields, or
    /// raises; translates interpreter-fatal bugs into a Rust panic
    /// (spec.md §7: fatal errors "terminate the interpreter", they are
    /// never surfaced as `PyResult`).
    pub(crate) fn drive(&mut self, frame: FrameRef) -> PyResult<FrameExit> {
        match eval::run_frame(self, frame) {
            EvalOutcome::Ok(exit) => Ok(exit),
            EvalOutcome::Raise(exc) => Err(exc),
            EvalOutcome::Fatal(err) => panic!("interpreter-fatal error: {err}"),
        }
    }

    pub fn resume_frame(&mut self, frame: FrameRef) -> PyResult<GenStep> {
        match self.drive(frame) {
            Ok(FrameExit::Return(value)) => Ok(GenStep::Returned(value)),
            Ok(FrameExit::Yield(value)) => Ok(GenStep::Yielded(value)),
            Err(exc) => Err(exc),
        }
    }

    /// Run a top-level code object as a module body (spec.md §6
    /// "Output"). On success, returns the module's final namespace value
    /// (here: `None`, matching a module body's implicit return); on an
    /// unhandled exception, the traceback has already been printed and
    /// the exception is also returned so callers can distinguish success.
    pub fn run_module(&mut self, code: CodeObjectRef, module_name: &str) -> Result<(), PyObjectRef> {
        log::debug!("loading module '{module_name}' from code object '{}'", code.codename);
        let module = Rc::new(PyModule {
            name: module_name.to_string(),
            dict: RefCell::new(crate::object::AttrDict::new()),
        });
        let frame = Frame::new(code, "<module>".to_string(), Vec::new(), module, self.builtins_module.clone());
        match self.drive(frame) {
            Ok(_) => Ok(()),
            Err(exc) => {
                self.print_unhandled(&exc);
                Err(exc)
            }
        }
    }
}

/// Internal helper so `call_object` can match on the callable's kind
/// without holding the `RefCell` borrow across the call (the callee may
/// need to re-borrow the same object, e.g. a recursive function).
enum CallKind {
    Function(PyFunction),
    Builtin(PyBuiltinFunction),
    BoundMethod(PyBoundMethod),
    Type(PyTypeRef),
    NotCallable,
}

trait ClonePayloadKind {
    fn clone_kind(&self) -> CallKind;
}

impl ClonePayloadKind for PyObjectPayload {
    fn clone_kind(&self) -> CallKind {
        match self {
            PyObjectPayload::Function(f) => CallKind::Function(f.clone()),
            PyObjectPayload::BuiltinFunction(b) => CallKind::Builtin(b.clone()),
            PyObjectPayload::BoundMethod(b) => CallKind::BoundMethod(b.clone()),
            PyObjectPayload::Type(t) => CallKind::Type(t.clone()),
            _ => CallKind::NotCallable,
        }
    }
}
