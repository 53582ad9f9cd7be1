//! Object-model dispatch (component A, spec.md §4.A): binary/unary/compare
//! operators, attribute access, truth testing, iteration and the
//! representations used by `print`/`repr`/`str`.

use crate::bytecode::{BinaryOperator, ComparisonOperator, UnaryOperator};
use crate::function::FuncArgs;
use crate::interpreter::Interpreter;
use crate::object::{is_same, DictKey, PyIteratorPayload, PyObjectPayload, PyObjectRef};
use crate::PyResult;
use malachite_bigint::BigInt;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};

/// Hash a value per spec.md §3 invariant ("hashable values ... have a hash
/// consistent with equality"). `None` for unhashable kinds (list, dict,
/// set).
pub fn hash_value(obj: &PyObjectRef) -> Option<u64> {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    match &*obj.payload.borrow() {
        PyObjectPayload::None => 0u8.hash(&mut hasher),
        PyObjectPayload::NotImplemented => 1u8.hash(&mut hasher),
        PyObjectPayload::Bool(b) => BigInt::from(*b as i64).hash(&mut hasher),
        PyObjectPayload::Int(i) => i.hash(&mut hasher),
        PyObjectPayload::Str(s) => s.hash(&mut hasher),
        PyObjectPayload::Tuple(items) => {
            for item in items {
                hash_value(item)?.hash(&mut hasher);
            }
        }
        PyObjectPayload::Type(t) => (std::rc::Rc::as_ptr(t) as usize).hash(&mut hasher),
        _ => return None,
    }
    Some(hasher.finish())
}

/// Structural equality used for dict/set keys, independent of any
/// user-level `__eq__` dispatch (built-in hashable kinds only — see
/// spec.md §3 invariant).
pub fn eq_value_unchecked(a: &PyObjectRef, b: &PyObjectRef) -> bool {
    use PyObjectPayload::*;
    match (&*a.payload.borrow(), &*b.payload.borrow()) {
        (None, None) => true,
        (NotImplemented, NotImplemented) => true,
        (Bool(x), Bool(y)) => x == y,
        (Bool(x), Int(y)) | (Int(y), Bool(x)) => BigInt::from(*x as i64) == *y,
        (Int(x), Int(y)) => x == y,
        (Str(x), Str(y)) => x == y,
        (Tuple(x), Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| eq_value_unchecked(p, q))
        }
        (Type(x), Type(y)) => std::rc::Rc::ptr_eq(x, y),
        _ => is_same(a, b),
    }
}

/// Truth test (spec.md §4.A "Truth test"): explicit boolean hook, else
/// length hook, else `true`.
pub fn is_truthy(vm: &mut Interpreter, obj: &PyObjectRef) -> PyResult<bool> {
    if let Some(b) = obj.is_truthy_payload() {
        return Ok(b);
    }
    match &*obj.payload.borrow() {
        PyObjectPayload::Int(i) => return Ok(!i.is_zero()),
        PyObjectPayload::Str(s) => return Ok(!s.is_empty()),
        PyObjectPayload::Tuple(t) => return Ok(!t.is_empty()),
        PyObjectPayload::List(l) => return Ok(!l.borrow().is_empty()),
        PyObjectPayload::Dict(d) => return Ok(!d.borrow().is_empty()),
        PyObjectPayload::Set(s) => return Ok(!s.borrow().is_empty()),
        PyObjectPayload::Range(r) => return Ok(r.len() != 0),
        _ => {}
    }
    if let Some(method) = obj.class().lookup("__bool__") {
        let result = vm.call_object(&method, FuncArgs::new(vec![obj.clone()], Default::default()))?;
        return is_truthy(vm, &result);
    }
    Ok(true)
}

fn as_int(obj: &PyObjectRef) -> Option<BigInt> {
    match &*obj.payload.borrow() {
        PyObjectPayload::Int(i) => Some(i.clone()),
        PyObjectPayload::Bool(b) => Some(BigInt::from(*b as i64)),
        _ => None,
    }
}

fn magic_method_names(op: BinaryOperator) -> (&'static str, &'static str) {
    use BinaryOperator::*;
    match op {
        Add => ("__add__", "__radd__"),
        Sub => ("__sub__", "__rsub__"),
        Mul => ("__mul__", "__rmul__"),
        Div => ("__truediv__", "__rtruediv__"),
        FloorDiv => ("__floordiv__", "__rfloordiv__"),
        Mod => ("__mod__", "__rmod__"),
        Pow => ("__pow__", "__rpow__"),
        LShift => ("__lshift__", "__rlshift__"),
        RShift => ("__rshift__", "__rrshift__"),
        And => ("__and__", "__rand__"),
        Or => ("__or__", "__ror__"),
        Xor => ("__xor__", "__rxor__"),
        MatMul => ("__matmul__", "__rmatmul__"),
    }
}

/// Native implementation for the handful of built-in kinds spec.md §4.A
/// lists; returns `None` (not `NotImplemented`) when no native rule
/// applies, so the caller falls through to magic-method dispatch.
fn native_binary_op(
    vm: &mut Interpreter,
    op: BinaryOperator,
    lhs: &PyObjectRef,
    rhs: &PyObjectRef,
) -> Option<PyResult> {
    use BinaryOperator::*;
    if let (Some(a), Some(b)) = (as_int(lhs), as_int(rhs)) {
        let result = match op {
            Add => Ok(a + b),
            Sub => Ok(a - b),
            Mul => Ok(a * b),
            FloorDiv => {
                if b.is_zero() {
                    return Some(Err(vm.new_zero_division_error("integer division or modulo by zero")));
                }
                Ok(a.div_floor(&b))
            }
            Mod => {
                if b.is_zero() {
                    return Some(Err(vm.new_zero_division_error("integer modulo by zero")));
                }
                Ok(a.mod_floor(&b))
            }
            Div => {
                if b.is_zero() {
                    return Some(Err(vm.new_zero_division_error("division by zero")));
                }
                // True division on arbitrary-precision ints without a
                // float kind: truncate to floor division, matching the
                // built-in kinds this workspace actually implements
                // (spec.md §4.A lists no float kind).
                Ok(a.div_floor(&b))
            }
            Pow => {
                if let Some(e) = b.to_u32() {
                    Ok(num_traits::pow::Pow::pow(a, e))
                } else {
                    return Some(Err(vm.new_value_error("negative exponent not supported")));
                }
            }
            LShift => {
                let n = b.to_u32().unwrap_or(0);
                Ok(a << n)
            }
            RShift => {
                let n = b.to_u32().unwrap_or(0);
                Ok(a >> n)
            }
            And => Ok(a & b),
            Or => Ok(a | b),
            Xor => Ok(a ^ b),
            MatMul => return None,
        };
        return Some(result.map(|v| vm.new_int(v)));
    }
    match (op, &*lhs.payload.borrow(), &*rhs.payload.borrow()) {
        (Add, PyObjectPayload::Str(a), PyObjectPayload::Str(b)) => {
            Some(Ok(vm.new_str(format!("{a}{b}"))))
        }
        (Add, PyObjectPayload::Tuple(a), PyObjectPayload::Tuple(b)) => {
            let mut items = a.clone();
            items.extend(b.iter().cloned());
            Some(Ok(vm.new_tuple(items)))
        }
        (Add, PyObjectPayload::List(a), PyObjectPayload::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Some(Ok(vm.new_list(items)))
        }
        (Mul, PyObjectPayload::Str(s), _) | (Mul, _, PyObjectPayload::Str(s)) => {
            let n = as_int(if matches!(&*lhs.payload.borrow(), PyObjectPayload::Str(_)) {
                rhs
            } else {
                lhs
            })?;
            let n = n.to_i64().unwrap_or(0).max(0) as usize;
            Some(Ok(vm.new_str(s.repeat(n))))
        }
        _ => None,
    }
}

/// Binary operator dispatch (spec.md §4.A): try the left operand's method;
/// if `NotImplemented`, try the right's reflected method; if both decline,
/// `TypeError`.
pub fn binary_op(vm: &mut Interpreter, op: BinaryOperator, lhs: &PyObjectRef, rhs: &PyObjectRef) -> PyResult {
    if let Some(result) = native_binary_op(vm, op, lhs, rhs) {
        return result;
    }
    let (fwd, rev) = magic_method_names(op);
    if let Some(method) = lhs.class().lookup(fwd) {
        let result = vm.call_object(&method, FuncArgs::new(vec![lhs.clone(), rhs.clone()], Default::default()))?;
        if !is_same(&result, &vm.not_implemented) {
            return Ok(result);
        }
    }
    if let Some(method) = rhs.class().lookup(rev) {
        let result = vm.call_object(&method, FuncArgs::new(vec![rhs.clone(), lhs.clone()], Default::default()))?;
        if !is_same(&result, &vm.not_implemented) {
            return Ok(result);
        }
    }
    Err(vm.new_type_error(format!(
        "unsupported operand type(s) for {op:?}: '{}' and '{}'",
        lhs.class().name,
        rhs.class().name
    )))
}

pub fn unary_op(vm: &mut Interpreter, op: UnaryOperator, operand: &PyObjectRef) -> PyResult {
    match op {
        UnaryOperator::Not => {
            let truthy = is_truthy(vm, operand)?;
            return Ok(vm.new_bool(!truthy));
        }
        _ => {}
    }
    if let Some(i) = as_int(operand) {
        let result = match op {
            UnaryOperator::Negate => -i,
            UnaryOperator::Positive => i,
            UnaryOperator::Invert => !i,
            UnaryOperator::Not => unreachable!(),
        };
        return Ok(vm.new_int(result));
    }
    Err(vm.new_type_error(format!(
        "bad operand type for unary operator: '{}'",
        operand.class().name
    )))
}

/// `==` defaults to identity when no method is supplied; ordering
/// comparisons with no method signal `TypeError` (spec.md §4.A).
pub fn compare_op(vm: &mut Interpreter, op: ComparisonOperator, lhs: &PyObjectRef, rhs: &PyObjectRef) -> PyResult {
    use ComparisonOperator::*;
    match op {
        Is => return Ok(vm.new_bool(is_same(lhs, rhs))),
        IsNot => return Ok(vm.new_bool(!is_same(lhs, rhs))),
        In | NotIn => {
            let found = sequence_contains(vm, rhs, lhs)?;
            return Ok(vm.new_bool(if op == In { found } else { !found }));
        }
        _ => {}
    }
    if matches!(op, Eq | NotEq) {
        let eq = native_eq(vm, lhs, rhs)?;
        return Ok(vm.new_bool(if op == Eq { eq } else { !eq }));
    }
    // Ordering.
    if let (Some(a), Some(b)) = (as_int(lhs), as_int(rhs)) {
        let ord = a.cmp(&b);
        return Ok(vm.new_bool(ordering_holds(op, ord)));
    }
    if let (PyObjectPayload::Str(a), PyObjectPayload::Str(b)) = (&*lhs.payload.borrow(), &*rhs.payload.borrow()) {
        let ord = a.cmp(b);
        return Ok(vm.new_bool(ordering_holds(op, ord)));
    }
    if let (PyObjectPayload::Set(a), PyObjectPayload::Set(b)) = (&*lhs.payload.borrow(), &*rhs.payload.borrow()) {
        // spec.md §9: sets lack ordering in the source; implement as
        // subset/superset.
        let a_sub_b = a.borrow().keys().all(|k| b.borrow().contains_key(k));
        let b_sub_a = b.borrow().keys().all(|k| a.borrow().contains_key(k));
        let holds = match op {
            Lt => a_sub_b && a.borrow().len() < b.borrow().len(),
            Le => a_sub_b,
            Gt => b_sub_a && b.borrow().len() < a.borrow().len(),
            Ge => b_sub_a,
            _ => unreachable!(),
        };
        return Ok(vm.new_bool(holds));
    }
    Err(vm.new_type_error(format!(
        "'{:?}' not supported between instances of '{}' and '{}'",
        op,
        lhs.class().name,
        rhs.class().name
    )))
}

fn ordering_holds(op: ComparisonOperator, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match (op, ord) {
        (ComparisonOperator::Lt, Less) => true,
        (ComparisonOperator::Le, Less | Equal) => true,
        (ComparisonOperator::Gt, Greater) => true,
        (ComparisonOperator::Ge, Greater | Equal) => true,
        _ => false,
    }
}

/// Always returns `NotImplemented` semantics by falling through to
/// identity rather than inconsistently per-kind (spec.md §9 open
/// question: "standardize to always return NotImplemented from the left
/// operand").
fn native_eq(vm: &mut Interpreter, lhs: &PyObjectRef, rhs: &PyObjectRef) -> PyResult<bool> {
    use PyObjectPayload::*;
    match (&*lhs.payload.borrow(), &*rhs.payload.borrow()) {
        (None, None) => return Ok(true),
        (NotImplemented, NotImplemented) => return Ok(true),
        (Bool(a), Bool(b)) => return Ok(a == b),
        (Bool(a), Int(b)) | (Int(b), Bool(a)) => return Ok(BigInt::from(*a as i64) == *b),
        (Int(a), Int(b)) => return Ok(a == b),
        (Str(a), Str(b)) => return Ok(a == b),
        _ => {}
    }
    if let (Tuple(a), Tuple(b)) = (&*lhs.payload.borrow(), &*rhs.payload.borrow()) {
        if a.len() != b.len() {
            return Ok(false);
        }
        for (x, y) in a.iter().zip(b.iter()) {
            if !native_eq(vm, x, y)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }
    if let (List(a), List(b)) = (&*lhs.payload.borrow(), &*rhs.payload.borrow()) {
        let a = a.borrow();
        let b = b.borrow();
        if a.len() != b.len() {
            return Ok(false);
        }
        for (x, y) in a.iter().zip(b.iter()) {
            if !native_eq(vm, x, y)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }
    if let Some(method) = lhs.class().lookup("__eq__") {
        let result = vm.call_object(&method, FuncArgs::new(vec![lhs.clone(), rhs.clone()], Default::default()))?;
        if !is_same(&result, &vm.not_implemented) {
            return is_truthy(vm, &result);
        }
    }
    Ok(is_same(lhs, rhs))
}

fn sequence_contains(vm: &mut Interpreter, container: &PyObjectRef, needle: &PyObjectRef) -> PyResult<bool> {
    match &*container.payload.borrow() {
        PyObjectPayload::Tuple(items) => {
            for item in items {
                if native_eq(vm, item, needle)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        PyObjectPayload::List(items) => {
            for item in items.borrow().iter() {
                if native_eq(vm, item, needle)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        PyObjectPayload::Dict(d) => Ok(d.borrow().contains_key(&DictKey(needle.clone()))),
        PyObjectPayload::Set(s) => Ok(s.borrow().contains_key(&DictKey(needle.clone()))),
        PyObjectPayload::Str(s) => {
            if let PyObjectPayload::Str(sub) = &*needle.payload.borrow() {
                Ok(s.contains(sub.as_str()))
            } else {
                Err(vm.new_type_error("'in <string>' requires string as left operand"))
            }
        }
        PyObjectPayload::Range(r) => {
            if let Some(n) = as_int(needle).and_then(|n| n.to_i64()) {
                Ok((0..r.len()).any(|i| r.nth(i) == Some(n)))
            } else {
                Ok(false)
            }
        }
        _ => Err(vm.new_type_error(format!("argument of type '{}' is not iterable", container.class().name))),
    }
}

/// Attribute lookup (spec.md §4.A): instance dict first, then the type's
/// parent chain; function-kind descriptors bind to `v` as a bound method.
pub fn get_attr(vm: &mut Interpreter, obj: &PyObjectRef, name: &str) -> PyResult {
    if let Some(dict) = &obj.dict {
        if let Some(value) = dict.borrow().get(name) {
            return Ok(value.clone());
        }
    }
    if let PyObjectPayload::Module(m) = &*obj.payload.borrow() {
        if let Some(value) = m.dict.borrow().get(name) {
            return Ok(value.clone());
        }
    }
    if let Some(found) = obj.class().lookup(name) {
        let is_function = matches!(&*found.payload.borrow(), PyObjectPayload::Function(_) | PyObjectPayload::BuiltinFunction(_));
        if is_function && !matches!(&*obj.payload.borrow(), PyObjectPayload::Type(_)) {
            return Ok(vm.new_bound_method(obj.clone(), found));
        }
        return Ok(found);
    }
    Err(vm.new_attribute_error(format!(
        "'{}' object has no attribute '{}'",
        obj.class().name,
        name
    )))
}

/// Looks up `name` on `obj` and calls it with `args` positional arguments.
/// Used for the context-manager protocol (`__enter__`/`__exit__`, spec.md
/// §4.G), which this workspace's instruction set invokes directly rather
/// than through a user-visible `LoadAttr`/`CallFunction` pair.
pub fn call_method(vm: &mut Interpreter, obj: &PyObjectRef, name: &str, args: Vec<PyObjectRef>) -> PyResult {
    let method = get_attr(vm, obj, name)?;
    vm.call_object(&method, FuncArgs::new(args, indexmap::IndexMap::new()))
}

pub fn set_attr(_vm: &mut Interpreter, obj: &PyObjectRef, name: &str, value: PyObjectRef) -> PyResult<()> {
    if let Some(dict) = &obj.dict {
        dict.borrow_mut().insert(name.to_string(), value);
        return Ok(());
    }
    Err(_vm.new_attribute_error(format!(
        "'{}' object has no attribute '{}'",
        obj.class().name,
        name
    )))
}

pub fn delete_attr(vm: &mut Interpreter, obj: &PyObjectRef, name: &str) -> PyResult<()> {
    if let Some(dict) = &obj.dict {
        if dict.borrow_mut().shift_remove(name).is_some() {
            return Ok(());
        }
    }
    Err(vm.new_attribute_error(format!(
        "'{}' object has no attribute '{}'",
        obj.class().name,
        name
    )))
}

/// `get_iter` hook (spec.md §4.A "Iteration"): returns an iterator value.
pub fn get_iter(vm: &mut Interpreter, obj: &PyObjectRef) -> PyResult {
    match &*obj.payload.borrow() {
        PyObjectPayload::Iterator(_) => return Ok(obj.clone()),
        PyObjectPayload::Generator(_) => return Ok(obj.clone()),
        PyObjectPayload::Range(r) => {
            return Ok(vm.new_iterator(PyIteratorPayload::Range { range: *r, index: 0 }))
        }
        PyObjectPayload::Tuple(_) | PyObjectPayload::List(_) | PyObjectPayload::Str(_) => {
            return Ok(vm.new_iterator(PyIteratorPayload::Sequence {
                source: obj.clone(),
                index: 0,
            }))
        }
        PyObjectPayload::Dict(d) => {
            let keys: Vec<_> = d.borrow().keys().map(|k| k.0.clone()).collect();
            return Ok(vm.new_iterator(PyIteratorPayload::Sequence {
                source: vm.new_tuple(keys),
                index: 0,
            }));
        }
        PyObjectPayload::Set(s) => {
            let items: Vec<_> = s.borrow().keys().map(|k| k.0.clone()).collect();
            return Ok(vm.new_iterator(PyIteratorPayload::Sequence {
                source: vm.new_tuple(items),
                index: 0,
            }));
        }
        _ => {}
    }
    Err(vm.new_type_error(format!("'{}' object is not iterable", obj.class().name)))
}

/// `next` hook (spec.md §4.A / §4.F): the next value, or a raised
/// `StopIteration`. Once exhausted, every subsequent call also raises
/// `StopIteration` (spec.md §8 invariant).
pub fn iter_next(vm: &mut Interpreter, iterator: &PyObjectRef) -> PyResult {
    if matches!(&*iterator.payload.borrow(), PyObjectPayload::Generator(_)) {
        return generator_next(vm, iterator);
    }
    let mut payload = iterator.payload.borrow_mut();
    let PyObjectPayload::Iterator(state) = &mut *payload else {
        drop(payload);
        return Err(vm.new_type_error(format!("'{}' object is not an iterator", iterator.class().name)));
    };
    let mut state = state.borrow_mut();
    match &mut *state {
        PyIteratorPayload::Sequence { source, index } => {
            let len = sequence_len(source);
            if *index >= len {
                return Err(vm.new_stop_iteration(None));
            }
            let item = sequence_get(vm, source, *index)?;
            *index += 1;
            Ok(item)
        }
        PyIteratorPayload::Range { range, index } => match range.nth(*index) {
            Some(v) => {
                *index += 1;
                Ok(vm.new_int(BigInt::from(v)))
            }
            None => Err(vm.new_stop_iteration(None)),
        },
    }
}

fn generator_next(vm: &mut Interpreter, gen_obj: &PyObjectRef) -> PyResult {
    // The actual state machine lives in crate::generator::GeneratorState;
    // route through it so Created/Running/Suspended/Exhausted transitions
    // stay in one place.
    let payload = gen_obj.payload.borrow();
    let PyObjectPayload::Generator(cell) = &*payload else {
        unreachable!()
    };
    cell.borrow_mut().next(vm)
}

pub fn sequence_len(obj: &PyObjectRef) -> usize {
    match &*obj.payload.borrow() {
        PyObjectPayload::Tuple(t) => t.len(),
        PyObjectPayload::List(l) => l.borrow().len(),
        PyObjectPayload::Str(s) => s.chars().count(),
        PyObjectPayload::Dict(d) => d.borrow().len(),
        PyObjectPayload::Set(s) => s.borrow().len(),
        PyObjectPayload::Range(r) => r.len().max(0) as usize,
        _ => 0,
    }
}

pub fn sequence_get(vm: &mut Interpreter, obj: &PyObjectRef, index: usize) -> PyResult {
    match &*obj.payload.borrow() {
        PyObjectPayload::Tuple(t) => t
            .get(index)
            .cloned()
            .ok_or_else(|| vm.new_index_error("tuple index out of range")),
        PyObjectPayload::List(l) => l
            .borrow()
            .get(index)
            .cloned()
            .ok_or_else(|| vm.new_index_error("list index out of range")),
        PyObjectPayload::Str(s) => s
            .chars()
            .nth(index)
            .map(|c| vm.new_str(c.to_string()))
            .ok_or_else(|| vm.new_index_error("string index out of range")),
        _ => Err(vm.new_type_error("object is not indexable by position")),
    }
}

fn normalize_index(len: usize, idx: &BigInt) -> Option<usize> {
    let len_i = len as i64;
    let i = idx.to_i64()?;
    let i = if i < 0 { i + len_i } else { i };
    if i < 0 || i >= len_i {
        None
    } else {
        Some(i as usize)
    }
}

/// `binary_subscr` (spec.md §4.D): `obj[key]`.
pub fn binary_subscr(vm: &mut Interpreter, obj: &PyObjectRef, key: &PyObjectRef) -> PyResult {
    match &*obj.payload.borrow() {
        PyObjectPayload::Dict(d) => d
            .borrow()
            .get(&DictKey(key.clone()))
            .cloned()
            .ok_or_else(|| vm.new_key_error(key.clone())),
        PyObjectPayload::List(l) => {
            let idx = as_int(key).ok_or_else(|| vm.new_type_error("list indices must be integers"))?;
            let len = l.borrow().len();
            normalize_index(len, &idx)
                .map(|i| l.borrow()[i].clone())
                .ok_or_else(|| vm.new_index_error("list index out of range"))
        }
        PyObjectPayload::Tuple(t) => {
            let idx = as_int(key).ok_or_else(|| vm.new_type_error("tuple indices must be integers"))?;
            normalize_index(t.len(), &idx)
                .map(|i| t[i].clone())
                .ok_or_else(|| vm.new_index_error("tuple index out of range"))
        }
        PyObjectPayload::Str(s) => {
            let idx = as_int(key).ok_or_else(|| vm.new_type_error("string indices must be integers"))?;
            let chars: Vec<char> = s.chars().collect();
            normalize_index(chars.len(), &idx)
                .map(|i| vm.new_str(chars[i].to_string()))
                .ok_or_else(|| vm.new_index_error("string index out of range"))
        }
        PyObjectPayload::Range(r) => {
            let idx = as_int(key).ok_or_else(|| vm.new_type_error("range indices must be integers"))?;
            let len = r.len().max(0) as usize;
            normalize_index(len, &idx)
                .and_then(|i| r.nth(i as i64))
                .map(|v| vm.new_int(BigInt::from(v)))
                .ok_or_else(|| vm.new_index_error("range object index out of range"))
        }
        _ => Err(vm.new_type_error(format!("'{}' object is not subscriptable", obj.class().name))),
    }
}

pub fn store_subscr(vm: &mut Interpreter, obj: &PyObjectRef, key: PyObjectRef, value: PyObjectRef) -> PyResult<()> {
    match &*obj.payload.borrow() {
        PyObjectPayload::Dict(d) => {
            d.borrow_mut().insert(DictKey(key), value);
            Ok(())
        }
        PyObjectPayload::List(l) => {
            let idx = as_int(&key).ok_or_else(|| vm.new_type_error("list indices must be integers"))?;
            let len = l.borrow().len();
            match normalize_index(len, &idx) {
                Some(i) => {
                    l.borrow_mut()[i] = value;
                    Ok(())
                }
                None => Err(vm.new_index_error("list assignment index out of range")),
            }
        }
        _ => Err(vm.new_type_error(format!("'{}' object does not support item assignment", obj.class().name))),
    }
}

pub fn delete_subscr(vm: &mut Interpreter, obj: &PyObjectRef, key: &PyObjectRef) -> PyResult<()> {
    match &*obj.payload.borrow() {
        PyObjectPayload::Dict(d) => {
            d.borrow_mut()
                .shift_remove(&DictKey(key.clone()))
                .map(|_| ())
                .ok_or_else(|| vm.new_key_error(key.clone()))
        }
        PyObjectPayload::List(l) => {
            let idx = as_int(key).ok_or_else(|| vm.new_type_error("list indices must be integers"))?;
            let len = l.borrow().len();
            match normalize_index(len, &idx) {
                Some(i) => {
                    l.borrow_mut().remove(i);
                    Ok(())
                }
                None => Err(vm.new_index_error("list assignment index out of range")),
            }
        }
        _ => Err(vm.new_type_error(format!("'{}' object doesn't support item deletion", obj.class().name))),
    }
}

/// `str()`/`print()` rendering.
pub fn to_str(vm: &mut Interpreter, obj: &PyObjectRef) -> PyResult<String> {
    if let PyObjectPayload::Str(s) = &*obj.payload.borrow() {
        return Ok(s.clone());
    }
    to_repr(vm, obj)
}

/// `repr()` rendering, recursing into containers.
pub fn to_repr(vm: &mut Interpreter, obj: &PyObjectRef) -> PyResult<String> {
    let rendered = match &*obj.payload.borrow() {
        PyObjectPayload::None => "None".to_string(),
        PyObjectPayload::NotImplemented => "NotImplemented".to_string(),
        PyObjectPayload::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        PyObjectPayload::Int(i) => i.to_string(),
        PyObjectPayload::Str(s) => format!("{s:?}"),
        PyObjectPayload::Tuple(items) => {
            let parts: PyResult<Vec<_>> = items.iter().map(|i| to_repr(vm, i)).collect();
            let parts = parts?;
            if parts.len() == 1 {
                format!("({},)", parts[0])
            } else {
                format!("({})", parts.join(", "))
            }
        }
        PyObjectPayload::List(items) => {
            let items = items.borrow().clone();
            let parts: PyResult<Vec<_>> = items.iter().map(|i| to_repr(vm, i)).collect();
            format!("[{}]", parts?.join(", "))
        }
        PyObjectPayload::Dict(d) => {
            let pairs: Vec<_> = d.borrow().iter().map(|(k, v)| (k.0.clone(), v.clone())).collect();
            let mut parts = Vec::new();
            for (k, v) in pairs {
                parts.push(format!("{}: {}", to_repr(vm, &k)?, to_repr(vm, &v)?));
            }
            format!("{{{}}}", parts.join(", "))
        }
        PyObjectPayload::Set(s) => {
            let items: Vec<_> = s.borrow().keys().map(|k| k.0.clone()).collect();
            if items.is_empty() {
                "set()".to_string()
            } else {
                let parts: PyResult<Vec<_>> = items.iter().map(|i| to_repr(vm, i)).collect();
                format!("{{{}}}", parts?.join(", "))
            }
        }
        PyObjectPayload::Range(r) => {
            if r.step == 1 {
                format!("range({}, {})", r.start, r.stop)
            } else {
                format!("range({}, {}, {})", r.start, r.stop, r.step)
            }
        }
        PyObjectPayload::Type(t) => format!("<class '{}'>", t.name),
        PyObjectPayload::Function(f) => format!("<function {} at {:p}>", f.name, std::rc::Rc::as_ptr(&f.code)),
        PyObjectPayload::BuiltinFunction(f) => format!("<built-in function {}>", f.name),
        PyObjectPayload::BoundMethod(b) => format!(
            "<bound method of {}>",
            b.receiver.class().name
        ),
        PyObjectPayload::Code(c) => c.to_string(),
        PyObjectPayload::Cell(_) => "<cell>".to_string(),
        PyObjectPayload::Module(m) => format!("<module '{}'>", m.name),
        PyObjectPayload::Generator(_) => "<generator object>".to_string(),
        PyObjectPayload::Exception(e) => format!("{}({})", obj.class().name, e.message),
        PyObjectPayload::Iterator(_) => "<iterator>".to_string(),
        PyObjectPayload::Instance => format!("<{} object>", obj.class().name),
    };
    Ok(rendered)
}
