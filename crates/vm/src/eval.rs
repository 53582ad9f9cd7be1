//! The fetch-execute loop (component D, spec.md §4.D) and unwind
//! algorithm (component G, spec.md §4.G).

use crate::bytecode::{BlockKind, Instruction, RaiseKind};
use crate::dispatch;
use crate::error::InterpreterFatalError;
use crate::frame::{Block, FrameRef};
use crate::function::{FuncArgs, PyFunction};
use crate::interpreter::Interpreter;
use crate::object::{is_same, DictKey, PyObjectPayload, PyObjectRef};
use indexmap::IndexMap;

/// What driving a frame to completion produced.
pub enum FrameExit {
    Return(PyObjectRef),
    Yield(PyObjectRef),
}

/// Internal control-transfer signal used while stepping through one
/// frame's instructions; never crosses a frame boundary as-is (callers see
/// [`EvalOutcome`] instead).
enum Unwind {
    Return(PyObjectRef),
    Yield(PyObjectRef),
    Raise(PyObjectRef),
}

/// What [`run_frame`] produces: the two flavors of completion plus the
/// interpreter-fatal escape hatch (spec.md §7: these never become a
/// `PyResult`, the caller panics instead).
pub enum EvalOutcome {
    Ok(FrameExit),
    Raise(PyObjectRef),
    Fatal(InterpreterFatalError),
}

macro_rules! bail_fatal {
    ($e:expr) => {
        return EvalOutcome::Fatal($e)
    };
}

/// Drive `frame` from its saved instruction pointer until it returns,
/// yields, raises an exception that escapes the frame entirely, or hits
/// an interpreter-fatal condition.
pub fn run_frame(vm: &mut Interpreter, frame: FrameRef) -> EvalOutcome {
    loop {
        let ip = frame.ip.get();
        let Some(instr) = frame.code.instructions.get(ip).cloned() else {
            bail_fatal!(InterpreterFatalError::InvalidInstructionPointer {
                ip,
                len: frame.code.instructions.len(),
                funcname: frame.func_name.clone(),
            });
        };
        frame.last_line.set(frame.code.line_for(ip));
        frame.ip.set(ip + 1);

        if vm.config.debug_trace {
            log::trace!("{} ip={ip} {:?}", frame.func_name, instr);
        }

        match step(vm, &frame, &instr) {
            Ok(Some(unwind)) => match unwind {
                Unwind::Return(v) => return EvalOutcome::Ok(FrameExit::Return(v)),
                Unwind::Yield(v) => return EvalOutcome::Ok(FrameExit::Yield(v)),
                Unwind::Raise(exc) => {
                    // Implicit exception chaining (spec.md §4.G /
                    // §8 invariant): a raise that happens while another
                    // exception is still being handled records that
                    // exception as `context`, mirroring PEP 3134.
                    if let Some(ctx) = frame.pending_exception.borrow().clone() {
                        if !is_same(&ctx, &exc) {
                            if let PyObjectPayload::Exception(data) = &mut *exc.payload.borrow_mut() {
                                if data.context.is_none() {
                                    data.context = Some(ctx);
                                }
                            }
                        }
                    }
                    match handle_raise(vm, &frame, exc) {
                        Ok(()) => continue,
                        Err(escaped) => {
                            vm.record_traceback(&escaped, &frame);
                            return EvalOutcome::Raise(escaped);
                        }
                    }
                }
            },
            Ok(None) => continue,
            Err(fatal) => return EvalOutcome::Fatal(fatal),
        }
    }
}

/// Execute one instruction. Returns `Ok(Some(unwind))` when control leaves
/// the straight-line fetch-execute path (return/yield/raise), `Ok(None)`
/// to keep stepping, or `Err` for an interpreter-fatal condition.
fn step(
    vm: &mut Interpreter,
    frame: &FrameRef,
    instr: &Instruction,
) -> Result<Option<Unwind>, InterpreterFatalError> {
    macro_rules! pop {
        () => {
            frame.pop().ok_or_else(|| InterpreterFatalError::StackUnderflow {
                funcname: frame.func_name.clone(),
                ip: frame.ip.get(),
            })?
        };
    }
    macro_rules! raise_or_fatal {
        ($result:expr) => {
            match $result {
                Ok(v) => v,
                Err(exc) => return Ok(Some(Unwind::Raise(exc))),
            }
        };
    }

    match instr {
        Instruction::LoadConst { idx } => {
            let v = const_operand(&frame.code.consts, *idx)?;
            frame.push(v);
        }
        Instruction::LoadFast { idx } => {
            let i = *idx as usize;
            let slot = frame.locals.borrow().get(i).cloned().flatten();
            match slot {
                Some(v) => frame.push(v),
                None => {
                    let name = frame.code.varnames.get(i).cloned().unwrap_or_default();
                    return Ok(Some(Unwind::Raise(
                        vm.new_unbound_local_error(format!(
                            "local variable '{name}' referenced before assignment"
                        )),
                    )));
                }
            }
        }
        Instruction::LoadGlobal { idx } => {
            let name = name_operand(&frame.code.names, *idx)?;
            if let Some(v) = frame.globals.dict.borrow().get(name.as_str()) {
                frame.push(v.clone());
            } else if let Some(v) = frame.builtins.dict.borrow().get(name.as_str()) {
                frame.push(v.clone());
            } else {
                return Ok(Some(Unwind::Raise(
                    vm.new_name_error(format!("name '{name}' is not defined")),
                )));
            }
        }
        Instruction::LoadDeref { idx } => {
            let i = *idx as usize;
            let cell = frame.cells.borrow().get(i).cloned();
            let Some(cell) = cell else {
                return Err(InterpreterFatalError::OperandOutOfRange {
                    pool: "cells",
                    index: i as u32,
                    len: frame.cells.borrow().len(),
                })
            };
            match cell.get() {
                Some(v) => frame.push(v),
                None => {
                    let name = cell_name(frame, i);
                    return Ok(Some(Unwind::Raise(
                        vm.new_name_error(format!("free variable '{name}' referenced before assignment")),
                    )));
                }
            }
        }
        Instruction::LoadClosure { idx } => {
            let i = *idx as usize;
            let cell = frame.cells.borrow().get(i).cloned();
            let Some(cell) = cell else {
                return Err(InterpreterFatalError::OperandOutOfRange {
                    pool: "cells",
                    index: i as u32,
                    len: frame.cells.borrow().len(),
                })
            };
            frame.push(vm.new_cell(cell));
        }
        Instruction::StoreFast { idx } => {
            let v = pop!();
            let i = *idx as usize;
            let mut locals = frame.locals.borrow_mut();
            if i >= locals.len() {
                return Err(InterpreterFatalError::OperandOutOfRange {
                    pool: "varnames",
                    index: *idx,
                    len: locals.len(),
                });
            }
            locals[i] = Some(v);
        }
        Instruction::StoreGlobal { idx } => {
            let v = pop!();
            let name = name_operand(&frame.code.names, *idx)?;
            frame.globals.dict.borrow_mut().insert(name, v);
        }
        Instruction::StoreDeref { idx } => {
            let v = pop!();
            let i = *idx as usize;
            let cell = frame.cells.borrow().get(i).cloned();
            let Some(cell) = cell else {
                return Err(InterpreterFatalError::OperandOutOfRange {
                    pool: "cells",
                    index: i as u32,
                    len: frame.cells.borrow().len(),
                })
            };
            cell.set(v);
        }
        Instruction::DeleteFast { idx } => {
            let i = *idx as usize;
            let mut locals = frame.locals.borrow_mut();
            if i >= locals.len() {
                return Err(InterpreterFatalError::OperandOutOfRange {
                    pool: "varnames",
                    index: *idx,
                    len: locals.len(),
                });
            }
            locals[i] = None;
        }
        Instruction::DeleteGlobal { idx } => {
            let name = name_operand(&frame.code.names, *idx)?;
            if frame.globals.dict.borrow_mut().shift_remove(name.as_str()).is_none() {
                return Ok(Some(Unwind::Raise(
                    vm.new_name_error(format!("name '{name}' is not defined")),
                )));
            }
        }
        Instruction::DupTop => {
            let v = frame.top().ok_or_else(|| InterpreterFatalError::StackUnderflow {
                funcname: frame.func_name.clone(),
                ip: frame.ip.get(),
            })?;
            frame.push(v);
        }
        Instruction::PopTop => {
            pop!();
        }
        Instruction::RotN { n } => {
            let n = *n as usize;
            let mut stack = frame.stack.borrow_mut();
            let len = stack.len();
            if n == 0 || n > len {
                return Err(InterpreterFatalError::StackUnderflow {
                    funcname: frame.func_name.clone(),
                    ip: frame.ip.get(),
                });
            }
            let top = stack.remove(len - 1);
            stack.insert(len - n, top);
        }
        Instruction::Swap => {
            let mut stack = frame.stack.borrow_mut();
            let len = stack.len();
            if len < 2 {
                return Err(InterpreterFatalError::StackUnderflow {
                    funcname: frame.func_name.clone(),
                    ip: frame.ip.get(),
                });
            }
            stack.swap(len - 1, len - 2);
        }
        Instruction::BinaryOp { op } => {
            let rhs = pop!();
            let lhs = pop!();
            let result = raise_or_fatal!(dispatch::binary_op(vm, *op, &lhs, &rhs));
            frame.push(result);
        }
        Instruction::UnaryOp { op } => {
            let operand = pop!();
            let result = raise_or_fatal!(dispatch::unary_op(vm, *op, &operand));
            frame.push(result);
        }
        Instruction::CompareOp { op } => {
            let rhs = pop!();
            let lhs = pop!();
            let result = raise_or_fatal!(dispatch::compare_op(vm, *op, &lhs, &rhs));
            frame.push(result);
        }
        Instruction::BuildTuple { size } => {
            let items = pop_n(frame, *size)?;
            frame.push(vm.new_tuple(items));
        }
        Instruction::BuildList { size } => {
            let items = pop_n(frame, *size)?;
            frame.push(vm.new_list(items));
        }
        Instruction::BuildSet { size } => {
            let items = pop_n(frame, *size)?;
            let mut set = IndexMap::new();
            for item in items {
                set.insert(DictKey(item), ());
            }
            frame.push(vm.new_set(set));
        }
        Instruction::BuildMap { size } => {
            let pairs = pop_n(frame, size * 2)?;
            let mut dict = crate::object::PyDict::new();
            for chunk in pairs.chunks(2) {
                dict.insert(DictKey(chunk[0].clone()), chunk[1].clone());
            }
            frame.push(vm.new_dict(dict));
        }
        Instruction::BuildSlice { has_step } => {
            // No dedicated slice value kind in this workspace's object
            // model; slices are represented as a 3-tuple (start, stop,
            // step) and interpreted by whichever subscript consumes them.
            let step = if *has_step { Some(pop!()) } else { None };
            let stop = pop!();
            let start = pop!();
            let step = step.unwrap_or_else(|| vm.none.clone());
            frame.push(vm.new_tuple(vec![start, stop, step]));
        }
        Instruction::LoadAttr { idx } => {
            let name = name_operand(&frame.code.names, *idx)?;
            let obj = pop!();
            let result = raise_or_fatal!(dispatch::get_attr(vm, &obj, &name));
            frame.push(result);
        }
        Instruction::StoreAttr { idx } => {
            let name = name_operand(&frame.code.names, *idx)?;
            let obj = pop!();
            let value = pop!();
            raise_or_fatal!(dispatch::set_attr(vm, &obj, &name, value));
        }
        Instruction::DeleteAttr { idx } => {
            let name = name_operand(&frame.code.names, *idx)?;
            let obj = pop!();
            raise_or_fatal!(dispatch::delete_attr(vm, &obj, &name));
        }
        Instruction::BinarySubscr => {
            let key = pop!();
            let obj = pop!();
            let result = raise_or_fatal!(dispatch::binary_subscr(vm, &obj, &key));
            frame.push(result);
        }
        Instruction::StoreSubscr => {
            let key = pop!();
            let obj = pop!();
            let value = pop!();
            raise_or_fatal!(dispatch::store_subscr(vm, &obj, key, value));
        }
        Instruction::DeleteSubscr => {
            let key = pop!();
            let obj = pop!();
            raise_or_fatal!(dispatch::delete_subscr(vm, &obj, &key));
        }
        Instruction::Jump { target } => {
            frame.ip.set(*target as usize);
        }
        Instruction::JumpIfTrue { target } => {
            let v = pop!();
            if raise_or_fatal!(dispatch::is_truthy(vm, &v)) {
                frame.ip.set(*target as usize);
            }
        }
        Instruction::JumpIfFalse { target } => {
            let v = pop!();
            if !raise_or_fatal!(dispatch::is_truthy(vm, &v)) {
                frame.ip.set(*target as usize);
            }
        }
        Instruction::JumpIfTruePopped { target } => {
            let v = frame.top();
            if let Some(v) = v {
                if raise_or_fatal!(dispatch::is_truthy(vm, &v)) {
                    pop!();
                    frame.ip.set(*target as usize);
                }
            }
        }
        Instruction::JumpIfFalsePopped { target } => {
            let v = frame.top();
            if let Some(v) = v {
                if !raise_or_fatal!(dispatch::is_truthy(vm, &v)) {
                    pop!();
                    frame.ip.set(*target as usize);
                }
            }
        }
        Instruction::JumpIfTrueOrPop { target } => {
            let v = frame.top().ok_or_else(|| InterpreterFatalError::StackUnderflow {
                funcname: frame.func_name.clone(),
                ip: frame.ip.get(),
            })?;
            if raise_or_fatal!(dispatch::is_truthy(vm, &v)) {
                frame.ip.set(*target as usize);
            } else {
                pop!();
            }
        }
        Instruction::JumpIfFalseOrPop { target } => {
            let v = frame.top().ok_or_else(|| InterpreterFatalError::StackUnderflow {
                funcname: frame.func_name.clone(),
                ip: frame.ip.get(),
            })?;
            if !raise_or_fatal!(dispatch::is_truthy(vm, &v)) {
                frame.ip.set(*target as usize);
            } else {
                pop!();
            }
        }
        Instruction::GetIter => {
            let obj = pop!();
            let result = raise_or_fatal!(dispatch::get_iter(vm, &obj));
            frame.push(result);
        }
        Instruction::ForIter { target } => {
            let iterator = frame.top().ok_or_else(|| InterpreterFatalError::StackUnderflow {
                funcname: frame.func_name.clone(),
                ip: frame.ip.get(),
            })?;
            match dispatch::iter_next(vm, &iterator) {
                Ok(v) => frame.push(v),
                Err(exc) if is_stop_iteration(vm, &exc) => {
                    pop!();
                    frame.ip.set(*target as usize);
                }
                Err(exc) => return Ok(Some(Unwind::Raise(exc))),
            }
        }
        Instruction::SetupLoop { handler } => push_block(frame, BlockKind::Loop, *handler),
        Instruction::SetupExcept { handler } => push_block(frame, BlockKind::Except, *handler),
        Instruction::SetupFinally { handler } => push_block(frame, BlockKind::Finally, *handler),
        Instruction::SetupWith { handler } => {
            let context_manager = pop!();
            let enter_result = raise_or_fatal!(dispatch::call_method(vm, &context_manager, "__enter__", Vec::new()));
            frame.blocks.borrow_mut().push(Block {
                kind: BlockKind::With,
                handler: *handler,
                stack_level: frame.depth(),
                context_manager: Some(context_manager),
            });
            frame.push(enter_result);
        }
        Instruction::PopBlock => {
            frame.blocks.borrow_mut().pop();
        }
        Instruction::PopExcept => {
            // The `Except`/`Finally`/`With` block itself was already
            // popped by `handle_raise` when execution landed on this
            // handler (spec.md §4.D: "pop_except clears handled exception
            // state" — nothing about the block stack). Popping a block
            // here too would, under a nested `try`, discard whatever
            // enclosing block happens to be on top instead.
            *frame.pending_exception.borrow_mut() = None;
        }
        Instruction::CallFunction { argc, has_kwargs } => {
            let kwargs = if *has_kwargs {
                let kw_obj = pop!();
                read_kwargs(&kw_obj)
            } else {
                IndexMap::new()
            };
            let positional = pop_n(frame, *argc)?;
            let callable = pop!();
            let result = raise_or_fatal!(vm.call_object(&callable, FuncArgs::new(positional, kwargs)));
            frame.push(result);
        }
        Instruction::ReturnValue => {
            let v = pop!();
            return Ok(Some(Unwind::Return(v)));
        }
        Instruction::YieldValue => {
            let v = pop!();
            return Ok(Some(Unwind::Yield(v)));
        }
        Instruction::Raise { kind } => {
            let exc = build_raise(vm, frame, *kind)?;
            return Ok(Some(Unwind::Raise(exc)));
        }
        Instruction::MakeFunction { idx } => {
            let code_obj = const_operand(&frame.code.consts, *idx)?;
            let code_payload = code_obj.payload.borrow();
            let PyObjectPayload::Code(code) = &*code_payload else {
                return Err(InterpreterFatalError::OperandOutOfRange {
                    pool: "consts",
                    index: *idx,
                    len: frame.code.consts.len(),
                });
            };
            // Default values are out of scope for `MakeFunction` in this
            // workspace's instruction set (no stack-based defaults tuple
            // precedes it); every user function binds with no positional
            // or keyword-only defaults.
            // `frame.cells` holds this frame's own cellvars first, then its
            // inherited freevars (see `Interpreter::call_user_function`);
            // resolve each of the nested code's freevars against that same
            // layout so closures chain correctly across nesting levels.
            let mut closure = Vec::with_capacity(code.freevars.len());
            for name in &code.freevars {
                let combined_idx = frame
                    .code
                    .cellvar_index(name)
                    .or_else(|| frame.code.freevar_index(name).map(|i| frame.code.cellvars.len() + i));
                let cell = combined_idx
                    .and_then(|i| frame.cells.borrow().get(i).cloned())
                    .unwrap_or_else(crate::function::PyCell::empty);
                closure.push(cell);
            }
            let func = PyFunction {
                code: code.clone(),
                name: code.codename.clone(),
                defaults: Vec::new(),
                kwdefaults: IndexMap::new(),
                closure,
                module: module_of(frame),
            };
            frame.push(vm.new_function(func));
        }
        Instruction::ImportName { .. } => {
            return Ok(Some(Unwind::Raise(
                vm.new_not_implemented_error("import is not supported by this interpreter"),
            )));
        }
        Instruction::Nop => {}
    }

    if frame.depth() as u32 > vm.config.max_stack_per_frame {
        return Err(InterpreterFatalError::StackOverflow {
            max: vm.config.max_stack_per_frame,
            funcname: frame.func_name.clone(),
        });
    }
    Ok(None)
}

fn cell_name(frame: &FrameRef, i: usize) -> String {
    let n_cellvars = frame.code.cellvars.len();
    if i < n_cellvars {
        frame.code.cellvars.get(i).cloned()
    } else {
        frame.code.freevars.get(i - n_cellvars).cloned()
    }
    .unwrap_or_default()
}

fn module_of(frame: &FrameRef) -> std::rc::Rc<crate::object::PyModule> {
    frame.globals.clone()
}

fn const_operand(pool: &[PyObjectRef], idx: u32) -> Result<PyObjectRef, InterpreterFatalError> {
    pool.get(idx as usize).cloned().ok_or(InterpreterFatalError::OperandOutOfRange {
        pool: "consts",
        index: idx,
        len: pool.len(),
    })
}

fn name_operand(pool: &[String], idx: u32) -> Result<String, InterpreterFatalError> {
    pool.get(idx as usize).cloned().ok_or(InterpreterFatalError::OperandOutOfRange {
        pool: "names",
        index: idx,
        len: pool.len(),
    })
}

fn pop_n(frame: &FrameRef, n: u32) -> Result<Vec<PyObjectRef>, InterpreterFatalError> {
    let mut items = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let v = frame.pop().ok_or_else(|| InterpreterFatalError::StackUnderflow {
            funcname: frame.func_name.clone(),
            ip: frame.ip.get(),
        })?;
        items.push(v);
    }
    items.reverse();
    Ok(items)
}

fn push_block(frame: &FrameRef, kind: BlockKind, handler: crate::bytecode::Label) {
    frame.blocks.borrow_mut().push(Block {
        kind,
        handler,
        stack_level: frame.depth(),
        context_manager: None,
    });
}

fn read_kwargs(kw_obj: &PyObjectRef) -> IndexMap<String, PyObjectRef> {
    let mut out = IndexMap::new();
    if let PyObjectPayload::Dict(d) = &*kw_obj.payload.borrow() {
        for (k, v) in d.borrow().iter() {
            if let PyObjectPayload::Str(s) = &*k.0.payload.borrow() {
                out.insert(s.clone(), v.clone());
            }
        }
    }
    out
}

fn is_stop_iteration(vm: &Interpreter, exc: &PyObjectRef) -> bool {
    exc.class().is_subclass_of(&vm.types.exceptions.stop_iteration)
}

fn build_raise(
    vm: &mut Interpreter,
    frame: &FrameRef,
    kind: RaiseKind,
) -> Result<PyObjectRef, InterpreterFatalError> {
    match kind {
        RaiseKind::Reraise => {
            let pending = frame.pending_exception.borrow().clone();
            Ok(pending.unwrap_or_else(|| vm.new_runtime_error_no_active_exception()))
        }
        RaiseKind::Raise => frame
            .pop()
            .ok_or(InterpreterFatalError::StackUnderflow {
                funcname: frame.func_name.clone(),
                ip: frame.ip.get(),
            })
            .map(|exc| realize_exception(vm, exc)),
        RaiseKind::RaiseCause => {
            let cause = frame.pop().ok_or(InterpreterFatalError::StackUnderflow {
                funcname: frame.func_name.clone(),
                ip: frame.ip.get(),
            })?;
            let exc = frame.pop().ok_or(InterpreterFatalError::StackUnderflow {
                funcname: frame.func_name.clone(),
                ip: frame.ip.get(),
            })?;
            let exc = realize_exception(vm, exc);
            if let PyObjectPayload::Exception(data) = &mut *exc.payload.borrow_mut() {
                data.cause = Some(cause);
            }
            Ok(exc)
        }
    }
}

/// `raise X` accepts either an exception instance or an exception class
/// (instantiated with no arguments), matching spec.md §4.G.
fn realize_exception(vm: &mut Interpreter, value: PyObjectRef) -> PyObjectRef {
    if let PyObjectPayload::Type(ty) = &*value.payload.borrow() {
        return vm.new_exception(ty.clone(), String::new());
    }
    value
}

/// Walk the block stack looking for a handler that accepts this
/// exception (spec.md §4.G unwind algorithm): pop blocks that don't
/// match, truncate the value stack to each popped block's saved depth,
/// run any `finally`/`with` cleanup found along the way, and land on the
/// first `except`/`finally`/`with` handler. Returns `Err` with the
/// exception if it escapes the frame with no handler at all.
fn handle_raise(vm: &mut Interpreter, frame: &FrameRef, exc: PyObjectRef) -> Result<(), PyObjectRef> {
    let mut exc = exc;
    loop {
        let block = frame.blocks.borrow_mut().pop();
        match block {
            None => return Err(exc),
            Some(block) => {
                frame.truncate_stack(block.stack_level);
                match block.kind {
                    BlockKind::Except | BlockKind::Finally => {
                        *frame.pending_exception.borrow_mut() = Some(exc.clone());
                        frame.push(exc);
                        frame.ip.set(block.handler as usize);
                        return Ok(());
                    }
                    BlockKind::With => match call_exit(vm, &block, &exc) {
                        Ok(true) => {
                            *frame.pending_exception.borrow_mut() = Some(exc.clone());
                            frame.push(exc);
                            frame.ip.set(block.handler as usize);
                            return Ok(());
                        }
                        Ok(false) => continue,
                        Err(exit_exc) => {
                            exc = exit_exc;
                            continue;
                        }
                    },
                    BlockKind::Loop => continue,
                }
            }
        }
    }
}

/// Calls `__exit__(type, value, None)` on a `With` block's context manager
/// (spec.md §4.G "On WITH"); this object model has no first-class
/// traceback value, so the traceback slot is always `None`. Returns
/// whether the exception is suppressed.
fn call_exit(vm: &mut Interpreter, block: &Block, exc: &PyObjectRef) -> Result<bool, PyObjectRef> {
    let cm = block
        .context_manager
        .clone()
        .expect("With block always carries its context manager");
    let exc_type = vm.new_type_value(exc.class());
    let args = vec![exc_type, exc.clone(), vm.none.clone()];
    let result = dispatch::call_method(vm, &cm, "__exit__", args)?;
    dispatch::is_truthy(vm, &result)
}
