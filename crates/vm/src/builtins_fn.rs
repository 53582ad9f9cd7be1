//! Builtin functions needed to drive the required test scenarios
//! (spec.md §1, SPEC_FULL.md §4): `print`, `len`, `range`, `isinstance`,
//! `type`, `repr`, `str`, `int`, `bool`. Each follows the builtin-function
//! contract of spec.md §6: a name -> value map in, a `PyObject` or a raised
//! exception out.

use crate::dispatch;
use crate::function::{FuncArgs, ParamKind};
use crate::interpreter::Interpreter;
use crate::object::PyObjectPayload;
use crate::PyResult;
use malachite_bigint::BigInt;
use std::rc::Rc;
use std::str::FromStr;

pub fn install(vm: &mut Interpreter) {
    vm.register_builtin("print", vec![("args", ParamKind::PositionalStar)], Rc::new(builtin_print));
    vm.register_builtin("len", vec![("obj", ParamKind::Positional)], Rc::new(builtin_len));
    vm.register_builtin(
        "range",
        vec![("args", ParamKind::PositionalStar)],
        Rc::new(builtin_range),
    );
    vm.register_builtin(
        "isinstance",
        vec![("obj", ParamKind::Positional), ("class", ParamKind::Positional)],
        Rc::new(builtin_isinstance),
    );
    vm.register_builtin("type", vec![("obj", ParamKind::Positional)], Rc::new(builtin_type));
    vm.register_builtin("repr", vec![("obj", ParamKind::Positional)], Rc::new(builtin_repr));
    vm.register_builtin("str", vec![("obj", ParamKind::Positional)], Rc::new(builtin_str));
    vm.register_builtin("int", vec![("obj", ParamKind::Positional)], Rc::new(builtin_int));
    vm.register_builtin("bool", vec![("obj", ParamKind::Positional)], Rc::new(builtin_bool));
}

fn builtin_print(vm: &mut Interpreter, args: FuncArgs) -> PyResult {
    let mut parts = Vec::with_capacity(args.positional.len());
    for arg in &args.positional {
        parts.push(dispatch::to_str(vm, arg)?);
    }
    println!("{}", parts.join(" "));
    Ok(vm.none.clone())
}

fn builtin_len(vm: &mut Interpreter, args: FuncArgs) -> PyResult {
    let obj = args
        .positional
        .first()
        .ok_or_else(|| vm.new_type_error("len() takes exactly one argument"))?;
    match &*obj.payload.borrow() {
        PyObjectPayload::Tuple(_)
        | PyObjectPayload::List(_)
        | PyObjectPayload::Str(_)
        | PyObjectPayload::Dict(_)
        | PyObjectPayload::Set(_)
        | PyObjectPayload::Range(_) => Ok(vm.new_int(BigInt::from(dispatch::sequence_len(obj)))),
        _ => Err(vm.new_type_error(format!("object of type '{}' has no len()", obj.class().name))),
    }
}

fn as_i64(vm: &Interpreter, obj: &crate::object::PyObjectRef) -> PyResult<i64> {
    use num_traits::ToPrimitive;
    match &*obj.payload.borrow() {
        PyObjectPayload::Int(i) => i
            .to_i64()
            .ok_or_else(|| vm.new_value_error("int too large to convert")),
        PyObjectPayload::Bool(b) => Ok(*b as i64),
        _ => Err(vm.new_type_error("'range' arguments must be integers")),
    }
}

fn builtin_range(vm: &mut Interpreter, args: FuncArgs) -> PyResult {
    let (start, stop, step) = match args.positional.as_slice() {
        [stop] => (0, as_i64(vm, stop)?, 1),
        [start, stop] => (as_i64(vm, start)?, as_i64(vm, stop)?, 1),
        [start, stop, step] => (as_i64(vm, start)?, as_i64(vm, stop)?, as_i64(vm, step)?),
        _ => return Err(vm.new_type_error("range expected 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(vm.new_value_error("range() arg 3 must not be zero"));
    }
    Ok(vm.new_range(start, stop, step))
}

fn builtin_isinstance(vm: &mut Interpreter, args: FuncArgs) -> PyResult {
    let obj = args
        .positional
        .first()
        .ok_or_else(|| vm.new_type_error("isinstance() takes exactly two arguments"))?;
    let class = args
        .positional
        .get(1)
        .ok_or_else(|| vm.new_type_error("isinstance() takes exactly two arguments"))?;
    let PyObjectPayload::Type(ty) = &*class.payload.borrow() else {
        return Err(vm.new_type_error("isinstance() arg 2 must be a type"));
    };
    Ok(vm.new_bool(obj.class().is_subclass_of(ty)))
}

fn builtin_type(vm: &mut Interpreter, args: FuncArgs) -> PyResult {
    let obj = args
        .positional
        .first()
        .ok_or_else(|| vm.new_type_error("type() takes exactly one argument"))?;
    Ok(vm.new_type_value(obj.class()))
}

fn builtin_repr(vm: &mut Interpreter, args: FuncArgs) -> PyResult {
    let obj = args
        .positional
        .first()
        .ok_or_else(|| vm.new_type_error("repr() takes exactly one argument"))?;
    let text = dispatch::to_repr(vm, obj)?;
    Ok(vm.new_str(text))
}

fn builtin_str(vm: &mut Interpreter, args: FuncArgs) -> PyResult {
    let obj = args
        .positional
        .first()
        .ok_or_else(|| vm.new_type_error("str() takes exactly one argument"))?;
    let text = dispatch::to_str(vm, obj)?;
    Ok(vm.new_str(text))
}

fn builtin_int(vm: &mut Interpreter, args: FuncArgs) -> PyResult {
    let obj = args
        .positional
        .first()
        .ok_or_else(|| vm.new_type_error("int() takes exactly one argument"))?;
    match &*obj.payload.borrow() {
        PyObjectPayload::Int(i) => Ok(vm.new_int(i.clone())),
        PyObjectPayload::Bool(b) => Ok(vm.new_int(BigInt::from(*b as i64))),
        PyObjectPayload::Str(s) => BigInt::from_str(s.trim())
            .map(|v| vm.new_int(v))
            .map_err(|_| vm.new_value_error(format!("invalid literal for int() with base 10: '{s}'"))),
        _ => Err(vm.new_type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            obj.class().name
        ))),
    }
}

fn builtin_bool(vm: &mut Interpreter, args: FuncArgs) -> PyResult {
    let obj = args
        .positional
        .first()
        .cloned()
        .unwrap_or_else(|| vm.none.clone());
    let truthy = dispatch::is_truthy(vm, &obj)?;
    Ok(vm.new_bool(truthy))
}
