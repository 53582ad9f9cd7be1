//! End-to-end scenarios and cross-cutting invariants for the evaluator,
//! hand-assembled through `CodeObjectBuilder` since this workspace has no
//! bytecode decoder. Every program here is built the way a real decoder's
//! output would look, then driven through the same `Interpreter` entry
//! points a CLI caller uses.

use pyrt_vm::bytecode::{BinaryOperator, CodeFlags, ComparisonOperator, Instruction};
use pyrt_vm::codeobj::CodeObjectBuilder;
use pyrt_vm::config::VmConfig;
use pyrt_vm::dispatch;
use pyrt_vm::exceptions::format_traceback;
use pyrt_vm::frame::Frame;
use pyrt_vm::function::{FuncArgs, PyFunction};
use pyrt_vm::interpreter::Interpreter;
use pyrt_vm::object::{PyModule, PyObject, PyObjectPayload, PyObjectRef};
use std::cell::RefCell;
use std::rc::Rc;

/// Builds an `int` value through the `int` builtin rather than reaching for
/// `malachite_bigint` directly — this crate's only dependency from a test's
/// point of view is `pyrt_vm` itself.
fn int_obj(vm: &mut Interpreter, n: i64) -> PyObjectRef {
    let int_fn = vm.builtins_module.dict.borrow().get("int").cloned().unwrap();
    vm.call_object(&int_fn, FuncArgs::new(vec![vm.new_str(n.to_string())], Default::default()))
        .unwrap()
}

fn repr(vm: &mut Interpreter, obj: &PyObjectRef) -> String {
    dispatch::to_repr(vm, obj).unwrap()
}

fn fresh_module(name: &str) -> Rc<PyModule> {
    Rc::new(PyModule {
        name: name.to_string(),
        dict: RefCell::new(Default::default()),
    })
}

/// Wraps a zero-dependency code object in a function and calls it with no
/// closure, no defaults, in a throwaway module.
fn call_standalone(vm: &mut Interpreter, code: pyrt_vm::bytecode::CodeObjectRef, args: Vec<PyObjectRef>) -> pyrt_vm::PyResult {
    let func = PyFunction {
        code,
        name: "<test>".to_string(),
        defaults: Vec::new(),
        kwdefaults: Default::default(),
        closure: Vec::new(),
        module: fresh_module("<test>"),
    };
    let func_obj = vm.new_function(func);
    vm.call_object(&func_obj, FuncArgs::new(args, Default::default()))
}

// ---- Scenario 1: print(1 + 2 * 3) -------------------------------------------

#[test]
fn scenario_arithmetic_precedence() {
    let mut vm = Interpreter::new(VmConfig::default());
    let one = int_obj(&mut vm, 1);
    let two = int_obj(&mut vm, 2);
    let three = int_obj(&mut vm, 3);

    let mut b = CodeObjectBuilder::new("<test>", "expr", 1);
    let c_one = b.add_const(one);
    let c_two = b.add_const(two);
    let c_three = b.add_const(three);
    b.emit(Instruction::LoadConst { idx: c_one });
    b.emit(Instruction::LoadConst { idx: c_two });
    b.emit(Instruction::LoadConst { idx: c_three });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Mul });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Add });
    b.emit(Instruction::ReturnValue);
    let code = b.build();

    let result = call_standalone(&mut vm, code, vec![]).unwrap();
    assert_eq!(repr(&mut vm, &result), "7");
}

/// `print` itself isn't capturable from an integration test (it writes
/// straight to stdout), but it must run one of the builtin-function paths
/// (component E) without raising.
#[test]
fn print_builtin_accepts_any_number_of_arguments() {
    let mut vm = Interpreter::new(VmConfig::default());
    let print_fn = vm.builtins_module.dict.borrow().get("print").cloned().unwrap();
    let a = vm.new_str("x");
    let b = int_obj(&mut vm, 7);
    let result = vm.call_object(&print_fn, FuncArgs::new(vec![a, b], Default::default()));
    assert!(vm.is_none(&result.unwrap()));
}

// ---- Scenario 2: for loop over a list -----------------------------------------

#[test]
fn scenario_for_loop_accumulates_list() {
    let mut vm = Interpreter::new(VmConfig::default());
    let items = vec![int_obj(&mut vm, 1), int_obj(&mut vm, 2), int_obj(&mut vm, 3), int_obj(&mut vm, 4)];
    let list_obj = vm.new_list(items);
    let zero = int_obj(&mut vm, 0);

    let mut b = CodeObjectBuilder::new("<test>", "sum_list", 1);
    let total = b.add_varname("total");
    let x = b.add_varname("x");
    let c_zero = b.add_const(zero);
    let c_list = b.add_const(list_obj);

    b.emit(Instruction::LoadConst { idx: c_zero });
    b.emit(Instruction::StoreFast { idx: total });
    b.emit(Instruction::LoadConst { idx: c_list });
    b.emit(Instruction::GetIter);
    let setup_at = b.emit(Instruction::SetupLoop { handler: 0 });
    let for_start = b.next_label();
    let foriter_at = b.emit(Instruction::ForIter { target: 0 });
    b.emit(Instruction::StoreFast { idx: x });
    b.emit(Instruction::LoadFast { idx: total });
    b.emit(Instruction::LoadFast { idx: x });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Add });
    b.emit(Instruction::StoreFast { idx: total });
    b.emit(Instruction::Jump { target: for_start });
    let end = b.next_label();
    b.emit(Instruction::PopBlock);
    b.emit(Instruction::LoadFast { idx: total });
    b.emit(Instruction::ReturnValue);
    b.patch_jump(setup_at, end);
    b.patch_jump(foriter_at, end);
    let code = b.build();

    let result = call_standalone(&mut vm, code, vec![]).unwrap();
    assert_eq!(repr(&mut vm, &result), "10");
}

// ---- Scenario 3: recursive fibonacci -------------------------------------------

#[test]
fn scenario_recursive_fibonacci() {
    let mut vm = Interpreter::new(VmConfig::default());
    let module = fresh_module("<test>");

    let mut b = CodeObjectBuilder::new("<test>", "fib", 1);
    b.arg_count(1);
    let n = b.add_varname("n");
    let fib_name = b.add_name("fib");
    let c_two = b.add_const(int_obj(&mut vm, 2));
    let c_one = b.add_const(int_obj(&mut vm, 1));

    b.emit(Instruction::LoadFast { idx: n });
    b.emit(Instruction::LoadConst { idx: c_two });
    b.emit(Instruction::CompareOp { op: ComparisonOperator::Lt });
    let jump_at = b.emit(Instruction::JumpIfFalse { target: 0 });
    b.emit(Instruction::LoadFast { idx: n });
    b.emit(Instruction::ReturnValue);
    let recurse = b.next_label();
    b.emit(Instruction::LoadGlobal { idx: fib_name });
    b.emit(Instruction::LoadFast { idx: n });
    b.emit(Instruction::LoadConst { idx: c_one });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Sub });
    b.emit(Instruction::CallFunction { argc: 1, has_kwargs: false });
    b.emit(Instruction::LoadGlobal { idx: fib_name });
    b.emit(Instruction::LoadFast { idx: n });
    b.emit(Instruction::LoadConst { idx: c_two });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Sub });
    b.emit(Instruction::CallFunction { argc: 1, has_kwargs: false });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Add });
    b.emit(Instruction::ReturnValue);
    b.patch_jump(jump_at, recurse);
    let code = b.build();

    let fib_func = PyFunction {
        code,
        name: "fib".to_string(),
        defaults: Vec::new(),
        kwdefaults: Default::default(),
        closure: Vec::new(),
        module: module.clone(),
    };
    let fib_obj = vm.new_function(fib_func);
    module.dict.borrow_mut().insert("fib".to_string(), fib_obj.clone());

    let ten = int_obj(&mut vm, 10);
    let result = vm.call_object(&fib_obj, FuncArgs::new(vec![ten], Default::default())).unwrap();
    assert_eq!(repr(&mut vm, &result), "55");
}

// ---- Scenario 4: generator consumed by a for loop -----------------------------

#[test]
fn scenario_generator_yields_then_stops() {
    let mut vm = Interpreter::new(VmConfig::default());
    let module = fresh_module("<test>");

    let mut gen_b = CodeObjectBuilder::new("<test>", "gen", 1);
    let c_one = gen_b.add_const(int_obj(&mut vm, 1));
    let c_two = gen_b.add_const(int_obj(&mut vm, 2));
    let c_none = gen_b.add_const(vm.none.clone());
    gen_b.emit(Instruction::LoadConst { idx: c_one });
    gen_b.emit(Instruction::YieldValue);
    gen_b.emit(Instruction::LoadConst { idx: c_two });
    gen_b.emit(Instruction::YieldValue);
    gen_b.emit(Instruction::LoadConst { idx: c_none });
    gen_b.emit(Instruction::ReturnValue);
    gen_b.flags(CodeFlags::GENERATOR);
    let gen_code = gen_b.build();

    let gen_func = PyFunction {
        code: gen_code,
        name: "gen".to_string(),
        defaults: Vec::new(),
        kwdefaults: Default::default(),
        closure: Vec::new(),
        module: module.clone(),
    };
    let gen_obj = vm.new_function(gen_func);
    module.dict.borrow_mut().insert("gen".to_string(), gen_obj.clone());

    // Drive the generator directly first: two yields, then StopIteration.
    let gen_instance = vm.call_object(&gen_obj, FuncArgs::default()).unwrap();
    assert_eq!(repr(&mut vm, &dispatch::iter_next(&mut vm, &gen_instance).unwrap()), "1");
    let second = dispatch::iter_next(&mut vm, &gen_instance).unwrap();
    assert_eq!(repr(&mut vm, &second), "2");
    let exhausted = dispatch::iter_next(&mut vm, &gen_instance).unwrap_err();
    assert!(exhausted.class().is_subclass_of(&vm.types.exceptions.stop_iteration));
    // Exhaustion persists (spec.md §8 invariant).
    let still_exhausted = dispatch::iter_next(&mut vm, &gen_instance).unwrap_err();
    assert!(still_exhausted.class().is_subclass_of(&vm.types.exceptions.stop_iteration));

    // Now drive it through an actual for-loop in bytecode.
    let mut driver = CodeObjectBuilder::new("<test>", "driver", 1);
    let total = driver.add_varname("total");
    let x = driver.add_varname("x");
    let gen_name = driver.add_name("gen");
    let c_zero = driver.add_const(int_obj(&mut vm, 0));

    driver.emit(Instruction::LoadConst { idx: c_zero });
    driver.emit(Instruction::StoreFast { idx: total });
    driver.emit(Instruction::LoadGlobal { idx: gen_name });
    driver.emit(Instruction::CallFunction { argc: 0, has_kwargs: false });
    driver.emit(Instruction::GetIter);
    let setup_at = driver.emit(Instruction::SetupLoop { handler: 0 });
    let for_start = driver.next_label();
    let foriter_at = driver.emit(Instruction::ForIter { target: 0 });
    driver.emit(Instruction::StoreFast { idx: x });
    driver.emit(Instruction::LoadFast { idx: total });
    driver.emit(Instruction::LoadFast { idx: x });
    driver.emit(Instruction::BinaryOp { op: BinaryOperator::Add });
    driver.emit(Instruction::StoreFast { idx: total });
    driver.emit(Instruction::Jump { target: for_start });
    let end = driver.next_label();
    driver.emit(Instruction::PopBlock);
    driver.emit(Instruction::LoadFast { idx: total });
    driver.emit(Instruction::ReturnValue);
    driver.patch_jump(setup_at, end);
    driver.patch_jump(foriter_at, end);
    let driver_code = driver.build();

    let driver_func = PyFunction {
        code: driver_code,
        name: "driver".to_string(),
        defaults: Vec::new(),
        kwdefaults: Default::default(),
        closure: Vec::new(),
        module: module.clone(),
    };
    let driver_obj = vm.new_function(driver_func);
    let result = vm.call_object(&driver_obj, FuncArgs::default()).unwrap();
    assert_eq!(repr(&mut vm, &result), "3");
}

// ---- Scenario 5: closure --------------------------------------------------------

#[test]
fn scenario_closure_over_outer_local() {
    let mut vm = Interpreter::new(VmConfig::default());
    let module = fresh_module("<test>");

    let mut inner_b = CodeObjectBuilder::new("<test>", "inner", 1);
    inner_b.add_freevar("x");
    inner_b.emit(Instruction::LoadDeref { idx: 0 });
    inner_b.emit(Instruction::ReturnValue);
    let inner_code = inner_b.build();

    let mut outer_b = CodeObjectBuilder::new("<test>", "outer", 1);
    let x_cell = outer_b.add_cellvar("x");
    let c_ten = outer_b.add_const(int_obj(&mut vm, 10));
    let c_inner = outer_b.add_const(vm.new_code_object(inner_code));
    outer_b.emit(Instruction::LoadConst { idx: c_ten });
    outer_b.emit(Instruction::StoreDeref { idx: x_cell });
    outer_b.emit(Instruction::MakeFunction { idx: c_inner });
    outer_b.emit(Instruction::ReturnValue);
    let outer_code = outer_b.build();

    let outer_func = PyFunction {
        code: outer_code,
        name: "outer".to_string(),
        defaults: Vec::new(),
        kwdefaults: Default::default(),
        closure: Vec::new(),
        module: module.clone(),
    };
    let outer_obj = vm.new_function(outer_func);
    module.dict.borrow_mut().insert("outer".to_string(), outer_obj.clone());

    let mut driver = CodeObjectBuilder::new("<test>", "driver", 1);
    let outer_name = driver.add_name("outer");
    driver.emit(Instruction::LoadGlobal { idx: outer_name });
    driver.emit(Instruction::CallFunction { argc: 0, has_kwargs: false });
    driver.emit(Instruction::CallFunction { argc: 0, has_kwargs: false });
    driver.emit(Instruction::ReturnValue);
    let driver_code = driver.build();

    let driver_func = PyFunction {
        code: driver_code,
        name: "driver".to_string(),
        defaults: Vec::new(),
        kwdefaults: Default::default(),
        closure: Vec::new(),
        module,
    };
    let driver_obj = vm.new_function(driver_func);
    let result = vm.call_object(&driver_obj, FuncArgs::default()).unwrap();
    assert_eq!(repr(&mut vm, &result), "10");
}

// ---- Scenario 6: try/except around a ZeroDivisionError ------------------------

#[test]
fn scenario_try_except_recovers_from_zero_division() {
    let mut vm = Interpreter::new(VmConfig::default());

    let mut b = CodeObjectBuilder::new("<test>", "recover", 1);
    let result = b.add_varname("result");
    let c_one = b.add_const(int_obj(&mut vm, 1));
    let c_zero = b.add_const(int_obj(&mut vm, 0));
    let c_ok = b.add_const(vm.new_str("ok"));

    let setup_at = b.emit(Instruction::SetupExcept { handler: 0 });
    b.emit(Instruction::LoadConst { idx: c_one });
    b.emit(Instruction::LoadConst { idx: c_zero });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Div });
    b.emit(Instruction::PopBlock);
    let jump_to_ret = b.emit(Instruction::Jump { target: 0 });
    let handler = b.next_label();
    b.emit(Instruction::PopTop);
    b.emit(Instruction::PopExcept);
    b.emit(Instruction::LoadConst { idx: c_ok });
    b.emit(Instruction::StoreFast { idx: result });
    let ret = b.next_label();
    b.emit(Instruction::LoadFast { idx: result });
    b.emit(Instruction::ReturnValue);
    b.patch_jump(setup_at, handler);
    b.patch_jump(jump_to_ret, ret);
    let code = b.build();

    let value = call_standalone(&mut vm, code, vec![]).unwrap();
    assert_eq!(repr(&mut vm, &value), "\"ok\"");
}

/// A class with native `__enter__`/`__exit__` methods, standing in for
/// what a compiled `with` statement's context-manager expression would
/// evaluate to. `__exit__` always returns `exit_returns`.
fn make_context_manager(vm: &mut Interpreter, exit_returns: bool) -> PyObjectRef {
    use pyrt_vm::function::{BuiltinParam, ParamKind, PyBuiltinFunction};
    use pyrt_vm::types::{BuiltinKind, PyType};

    let ty = PyType::new("Ctx", Some(vm.types.object_type.clone()), BuiltinKind::User);
    let enter: pyrt_vm::function::BuiltinImpl = Rc::new(|vm, _args| Ok(vm.none.clone()));
    ty.set_attr(
        "__enter__",
        PyObject::new(
            vm.types.builtin_function_type.clone(),
            PyObjectPayload::BuiltinFunction(PyBuiltinFunction {
                name: "__enter__",
                params: vec![BuiltinParam { name: "self", kind: ParamKind::Positional }],
                implementation: enter,
            }),
            false,
        ),
    );
    let exit_fn: pyrt_vm::function::BuiltinImpl = Rc::new(move |vm, _args| Ok(vm.new_bool(exit_returns)));
    ty.set_attr(
        "__exit__",
        PyObject::new(
            vm.types.builtin_function_type.clone(),
            PyObjectPayload::BuiltinFunction(PyBuiltinFunction {
                name: "__exit__",
                params: vec![
                    BuiltinParam { name: "self", kind: ParamKind::Positional },
                    BuiltinParam { name: "exc_type", kind: ParamKind::Positional },
                    BuiltinParam { name: "exc_value", kind: ParamKind::Positional },
                    BuiltinParam { name: "traceback", kind: ParamKind::Positional },
                ],
                implementation: exit_fn,
            }),
            false,
        ),
    );
    PyObject::new(ty, PyObjectPayload::Instance, true)
}

#[test]
fn scenario_with_suppresses_exception_when_exit_returns_truthy() {
    let mut vm = Interpreter::new(VmConfig::default());
    let cm = make_context_manager(&mut vm, true);

    let mut b = CodeObjectBuilder::new("<test>", "with_suppress", 1);
    let cm_idx = b.add_const(cm);
    let result = b.add_varname("result");
    let c_one = b.add_const(int_obj(&mut vm, 1));
    let c_zero = b.add_const(int_obj(&mut vm, 0));
    let c_ok = b.add_const(vm.new_str("ok"));

    b.emit(Instruction::LoadConst { idx: cm_idx });
    let setup_at = b.emit(Instruction::SetupWith { handler: 0 });
    b.emit(Instruction::PopTop); // discard __enter__'s result (no `as` target)
    b.emit(Instruction::LoadConst { idx: c_one });
    b.emit(Instruction::LoadConst { idx: c_zero });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Div });
    b.emit(Instruction::PopBlock);
    let jump_to_ret = b.emit(Instruction::Jump { target: 0 });
    let handler = b.next_label();
    b.emit(Instruction::PopTop);
    b.emit(Instruction::PopExcept);
    b.emit(Instruction::LoadConst { idx: c_ok });
    b.emit(Instruction::StoreFast { idx: result });
    let ret = b.next_label();
    b.emit(Instruction::LoadFast { idx: result });
    b.emit(Instruction::ReturnValue);
    b.patch_jump(setup_at, handler);
    b.patch_jump(jump_to_ret, ret);
    let code = b.build();

    let value = call_standalone(&mut vm, code, vec![]).unwrap();
    assert_eq!(repr(&mut vm, &value), "\"ok\"");
}

#[test]
fn scenario_with_propagates_exception_when_exit_returns_falsy() {
    let mut vm = Interpreter::new(VmConfig::default());
    let cm = make_context_manager(&mut vm, false);

    let mut b = CodeObjectBuilder::new("<test>", "with_propagate", 1);
    let cm_idx = b.add_const(cm);
    let c_one = b.add_const(int_obj(&mut vm, 1));
    let c_zero = b.add_const(int_obj(&mut vm, 0));

    b.emit(Instruction::LoadConst { idx: cm_idx });
    let setup_at = b.emit(Instruction::SetupWith { handler: 0 });
    b.emit(Instruction::PopTop);
    b.emit(Instruction::LoadConst { idx: c_one });
    b.emit(Instruction::LoadConst { idx: c_zero });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Div });
    b.emit(Instruction::PopBlock);
    b.emit(Instruction::ReturnValue);
    let handler = b.next_label();
    b.patch_jump(setup_at, handler);
    let code = b.build();

    let err = call_standalone(&mut vm, code, vec![]).unwrap_err();
    assert!(err.class().is_subclass_of(&vm.types.exceptions.zero_division_error));
}

/// `MakeFunction` can never populate `PyFunction::defaults` (DESIGN.md's
/// "Known simplification"), so this builds the `PyFunction` value directly
/// to exercise `bind_call`'s step-4 default-filling independently of that
/// instruction.
#[test]
fn scenario_positional_default_fills_missing_trailing_argument() {
    let mut vm = Interpreter::new(VmConfig::default());

    let mut b = CodeObjectBuilder::new("<test>", "add", 1);
    let a = b.add_varname("a");
    let bvar = b.add_varname("b");
    b.arg_count(2);
    b.emit(Instruction::LoadFast { idx: a });
    b.emit(Instruction::LoadFast { idx: bvar });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Add });
    b.emit(Instruction::ReturnValue);
    let code = b.build();

    let func = PyFunction {
        code,
        name: "add".to_string(),
        defaults: vec![int_obj(&mut vm, 5)],
        kwdefaults: Default::default(),
        closure: Vec::new(),
        module: fresh_module("<test>"),
    };
    let func_obj = vm.new_function(func);

    let only_a = vm
        .call_object(&func_obj, FuncArgs::new(vec![int_obj(&mut vm, 1)], Default::default()))
        .unwrap();
    assert_eq!(repr(&mut vm, &only_a), "6");

    let both = vm
        .call_object(&func_obj, FuncArgs::new(vec![int_obj(&mut vm, 1), int_obj(&mut vm, 2)], Default::default()))
        .unwrap();
    assert_eq!(repr(&mut vm, &both), "3");
}

// ---- Scenario 7: unhandled-exception traceback shape ---------------------------

#[test]
fn scenario_unhandled_exception_reports_module_and_function_frames() {
    let mut vm = Interpreter::new(VmConfig::default());

    let mut h_b = CodeObjectBuilder::new("mod.py", "h", 1);
    let c_one = h_b.add_const(int_obj(&mut vm, 1));
    let c_zero = h_b.add_const(int_obj(&mut vm, 0));
    h_b.emit(Instruction::LoadConst { idx: c_one });
    h_b.emit(Instruction::LoadConst { idx: c_zero });
    h_b.emit(Instruction::BinaryOp { op: BinaryOperator::Div });
    h_b.emit(Instruction::ReturnValue);
    let h_code = h_b.build();

    let mut module_b = CodeObjectBuilder::new("mod.py", "<module>", 1);
    let h_name = module_b.add_name("h");
    let c_h_code = module_b.add_const(vm.new_code_object(h_code));
    let c_none = module_b.add_const(vm.none.clone());
    module_b.emit(Instruction::MakeFunction { idx: c_h_code });
    module_b.emit(Instruction::StoreGlobal { idx: h_name });
    module_b.emit(Instruction::LoadGlobal { idx: h_name });
    module_b.emit(Instruction::CallFunction { argc: 0, has_kwargs: false });
    module_b.emit(Instruction::PopTop);
    module_b.emit(Instruction::LoadConst { idx: c_none });
    module_b.emit(Instruction::ReturnValue);
    let module_code = module_b.build();

    let err = vm.run_module(module_code, "__main__").unwrap_err();
    let type_name = vm.exception_type_name(&err);
    let text = match &*err.payload.borrow() {
        PyObjectPayload::Exception(data) => {
            assert_eq!(data.traceback.len(), 2);
            assert_eq!(data.traceback[0].funcname, "<module>");
            assert_eq!(data.traceback[1].funcname, "h");
            format_traceback(&type_name, data)
        }
        _ => panic!("expected an exception object"),
    };
    assert!(text.starts_with("Traceback (most recent call last):"));
    assert!(text.contains("in <module>"));
    assert!(text.contains("in h"));
    assert!(text.ends_with("ZeroDivisionError: division by zero"));
}

// ---- Cross-cutting invariants (spec.md §8) -------------------------------------

#[test]
fn invariant_value_stack_is_balanced_on_return() {
    let mut vm = Interpreter::new(VmConfig::default());
    let one = int_obj(&mut vm, 1);
    let two = int_obj(&mut vm, 2);

    let mut b = CodeObjectBuilder::new("<test>", "add", 1);
    let c_one = b.add_const(one);
    let c_two = b.add_const(two);
    b.emit(Instruction::LoadConst { idx: c_one });
    b.emit(Instruction::LoadConst { idx: c_two });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Add });
    b.emit(Instruction::ReturnValue);
    let code = b.build();

    let module = fresh_module("<test>");
    let frame = Frame::new(code, "add".to_string(), Vec::new(), module, vm.builtins_module.clone());
    match pyrt_vm::eval::run_frame(&mut vm, frame.clone()) {
        pyrt_vm::eval::EvalOutcome::Ok(pyrt_vm::eval::FrameExit::Return(_)) => {}
        _ => panic!("expected a normal return"),
    }
    assert_eq!(frame.depth(), 0, "value stack must be empty once control leaves via ReturnValue");
}

#[test]
fn invariant_evaluation_is_deterministic() {
    let mut vm = Interpreter::new(VmConfig::default());
    let items = vec![int_obj(&mut vm, 5), int_obj(&mut vm, 7)];
    let list_obj = vm.new_list(items);
    let zero = int_obj(&mut vm, 0);

    let mut b = CodeObjectBuilder::new("<test>", "sum_two", 1);
    let total = b.add_varname("total");
    let x = b.add_varname("x");
    let c_zero = b.add_const(zero);
    let c_list = b.add_const(list_obj);
    b.emit(Instruction::LoadConst { idx: c_zero });
    b.emit(Instruction::StoreFast { idx: total });
    b.emit(Instruction::LoadConst { idx: c_list });
    b.emit(Instruction::GetIter);
    let setup_at = b.emit(Instruction::SetupLoop { handler: 0 });
    let for_start = b.next_label();
    let foriter_at = b.emit(Instruction::ForIter { target: 0 });
    b.emit(Instruction::StoreFast { idx: x });
    b.emit(Instruction::LoadFast { idx: total });
    b.emit(Instruction::LoadFast { idx: x });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Add });
    b.emit(Instruction::StoreFast { idx: total });
    b.emit(Instruction::Jump { target: for_start });
    let end = b.next_label();
    b.emit(Instruction::PopBlock);
    b.emit(Instruction::LoadFast { idx: total });
    b.emit(Instruction::ReturnValue);
    b.patch_jump(setup_at, end);
    b.patch_jump(foriter_at, end);
    let code = b.build();

    let first = call_standalone(&mut vm, code.clone(), vec![]).unwrap();
    let second = call_standalone(&mut vm, code, vec![]).unwrap();
    assert_eq!(repr(&mut vm, &first), repr(&mut vm, &second));
}

#[test]
fn invariant_attribute_lookup_respects_mro() {
    let mut vm = Interpreter::new(VmConfig::default());
    let exc = vm.new_zero_division_error("division by zero");
    // ZeroDivisionError -> ArithmeticError -> Exception -> BaseException -> object
    assert!(exc.class().is_subclass_of(&vm.types.exceptions.arithmetic_error));
    assert!(exc.class().is_subclass_of(&vm.types.exceptions.exception));
    assert!(!exc.class().is_subclass_of(&vm.types.exceptions.value_error));
}

#[test]
fn invariant_bool_is_an_int_subtype() {
    let vm = Interpreter::new(VmConfig::default());
    assert!(vm.types.bool_type.is_subclass_of(&vm.types.int_type));
    assert!(vm.true_obj.class().is_subclass_of(&vm.types.int_type));
    assert!(!vm.types.int_type.is_subclass_of(&vm.types.bool_type));
}

#[test]
fn invariant_exception_chaining_records_context() {
    let mut vm = Interpreter::new(VmConfig::default());

    let mut b = CodeObjectBuilder::new("<test>", "chain", 1);
    let c_one = b.add_const(int_obj(&mut vm, 1));
    let c_zero = b.add_const(int_obj(&mut vm, 0));
    let missing_name = b.add_name("undefined_name");

    let setup_at = b.emit(Instruction::SetupExcept { handler: 0 });
    b.emit(Instruction::LoadConst { idx: c_one });
    b.emit(Instruction::LoadConst { idx: c_zero });
    b.emit(Instruction::BinaryOp { op: BinaryOperator::Div });
    b.emit(Instruction::PopBlock);
    let done = b.emit(Instruction::Jump { target: 0 });
    let handler = b.next_label();
    b.emit(Instruction::PopTop);
    // Raising while the ZeroDivisionError above is still the pending
    // exception must chain this NameError's `context` to it.
    b.emit(Instruction::LoadGlobal { idx: missing_name });
    let ret = b.next_label();
    b.emit(Instruction::ReturnValue);
    b.patch_jump(setup_at, handler);
    b.patch_jump(done, ret);
    let code = b.build();

    let err = call_standalone(&mut vm, code, vec![]).unwrap_err();
    assert_eq!(vm.exception_type_name(&err), "NameError");
    match &*err.payload.borrow() {
        PyObjectPayload::Exception(data) => {
            let ctx = data.context.as_ref().expect("NameError should chain to the ZeroDivisionError");
            assert_eq!(ctx.class().name, "ZeroDivisionError");
        }
        _ => panic!("expected an exception object"),
    }
}
