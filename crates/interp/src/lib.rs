//! A reference implementation of the wasmcell function-compilation
//! interface: an evaluator for the straight-line operator alphabet.
//!
//! This is the executor used by the stub synthesizer and by tests; a real
//! code generator slots into the same [`Compiler`] seam. Bodies are
//! evaluated against compartment state with explicit bounds and signature
//! checks, so every trap the runtime defines is raised as a structured
//! value.

#![deny(missing_docs)]

use cranelift_entity::PrimaryMap;
use std::cell::Cell;
use std::sync::Arc;
use wasmcell_environ::{FuncIndex, Module, Operator, TrapCode};
use wasmcell_runtime::{
    CompileError, CompiledModule, Compartment, Compiler, FuncRef, GlobalRef, InstanceRef,
    MemoryRef, TableRef, Trap, Value, WasmCode,
};

/// The bound on nested wasm-to-wasm calls; exceeding it raises a
/// stack-overflow trap before the native stack is at risk.
const MAX_CALL_DEPTH: usize = 256;

thread_local! {
    static CALL_DEPTH: Cell<usize> = Cell::new(0);
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<DepthGuard, Trap> {
        CALL_DEPTH.with(|depth| {
            if depth.get() >= MAX_CALL_DEPTH {
                return Err(Trap::wasm(TrapCode::StackOverflow));
            }
            depth.set(depth.get() + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// A compiler that evaluates function bodies directly.
#[derive(Default)]
pub struct InterpCompiler;

impl InterpCompiler {
    /// Creates the evaluating compiler.
    pub fn new() -> InterpCompiler {
        InterpCompiler
    }
}

impl Compiler for InterpCompiler {
    fn compile(&self, module: Arc<Module>) -> Result<CompiledModule, CompileError> {
        let mut functions: PrimaryMap<_, Arc<dyn WasmCode>> = PrimaryMap::new();
        for (def_index, _) in module.code.iter() {
            let index = module.func_index(def_index);
            functions.push(Arc::new(InterpFunc {
                module: module.clone(),
                index,
            }));
        }
        log::trace!(
            "prepared {} function bodies for evaluation",
            functions.len()
        );
        Ok(CompiledModule { module, functions })
    }
}

/// One evaluatable function body.
struct InterpFunc {
    module: Arc<Module>,
    index: FuncIndex,
}

/// The per-call snapshot of the defining instance's index spaces.
struct Frame {
    functions: Vec<FuncRef>,
    tables: Vec<TableRef>,
    memories: Vec<MemoryRef>,
    globals: Vec<GlobalRef>,
}

impl WasmCode for InterpFunc {
    fn invoke(
        &self,
        compartment: &mut Compartment,
        instance: Option<InstanceRef>,
        args: &[Value],
        results: &mut Vec<Value>,
    ) -> Result<(), Trap> {
        let _depth = DepthGuard::enter()?;
        let instance = instance.expect("wasm body invoked without its defining instance");
        let frame = {
            let data = compartment.instance(instance);
            Frame {
                functions: data.functions.clone(),
                tables: data.tables.clone(),
                memories: data.memories.clone(),
                globals: data.globals.clone(),
            }
        };

        let module = &self.module;
        let def_index = module
            .defined_func_index(self.index)
            .expect("evaluating an imported function");
        let body = &module.code[def_index];
        let ty = module.func_type(self.index);

        debug_assert_eq!(args.len(), ty.params().len());
        let mut locals: Vec<Value> = args.to_vec();
        locals.extend(body.locals.iter().map(|&ty| Value::default_for(ty)));

        let mut stack: Vec<Value> = Vec::new();
        for op in &body.code {
            match *op {
                Operator::Unreachable => {
                    return Err(Trap::wasm(TrapCode::UnreachableCodeReached));
                }
                Operator::Nop => {}
                Operator::Drop => {
                    stack.pop();
                }
                Operator::Select => {
                    let cond = pop(&mut stack).unwrap_i32();
                    let b = pop(&mut stack);
                    let a = pop(&mut stack);
                    stack.push(if cond != 0 { a } else { b });
                }
                Operator::Return => break,

                Operator::LocalGet(i) => stack.push(locals[i as usize]),
                Operator::LocalSet(i) => locals[i as usize] = pop(&mut stack),
                Operator::LocalTee(i) => {
                    locals[i as usize] = *stack.last().expect("operand stack underflow")
                }
                Operator::GlobalGet(g) => {
                    stack.push(compartment.global_get(frame.globals[g.as_u32() as usize]))
                }
                Operator::GlobalSet(g) => {
                    let value = pop(&mut stack);
                    compartment
                        .global_set(frame.globals[g.as_u32() as usize], value)
                        .expect("global.set survived validation");
                }

                Operator::I32Const(v) => stack.push(Value::I32(v)),
                Operator::I64Const(v) => stack.push(Value::I64(v)),
                Operator::F32Const(bits) => stack.push(Value::F32(f32::from_bits(bits))),
                Operator::F64Const(bits) => stack.push(Value::F64(f64::from_bits(bits))),
                Operator::V128Const(v) => stack.push(Value::V128(v)),
                Operator::RefNull => stack.push(Value::NullRef),
                Operator::RefFunc(f) => {
                    stack.push(Value::FuncRef(Some(frame.functions[f.as_u32() as usize])))
                }

                Operator::I32Add => binop_i32(&mut stack, i32::wrapping_add),
                Operator::I32Sub => binop_i32(&mut stack, i32::wrapping_sub),
                Operator::I32Mul => binop_i32(&mut stack, i32::wrapping_mul),
                Operator::I32DivS => {
                    let b = pop(&mut stack).unwrap_i32();
                    let a = pop(&mut stack).unwrap_i32();
                    if b == 0 {
                        return Err(Trap::wasm(TrapCode::IntegerDivisionByZero));
                    }
                    if a == i32::MIN && b == -1 {
                        return Err(Trap::wasm(TrapCode::IntegerOverflow));
                    }
                    stack.push(Value::I32(a.wrapping_div(b)));
                }
                Operator::I32DivU => {
                    let b = pop(&mut stack).unwrap_i32() as u32;
                    let a = pop(&mut stack).unwrap_i32() as u32;
                    if b == 0 {
                        return Err(Trap::wasm(TrapCode::IntegerDivisionByZero));
                    }
                    stack.push(Value::I32((a / b) as i32));
                }
                Operator::I32RemS => {
                    let b = pop(&mut stack).unwrap_i32();
                    let a = pop(&mut stack).unwrap_i32();
                    if b == 0 {
                        return Err(Trap::wasm(TrapCode::IntegerDivisionByZero));
                    }
                    stack.push(Value::I32(a.wrapping_rem(b)));
                }
                Operator::I32RemU => {
                    let b = pop(&mut stack).unwrap_i32() as u32;
                    let a = pop(&mut stack).unwrap_i32() as u32;
                    if b == 0 {
                        return Err(Trap::wasm(TrapCode::IntegerDivisionByZero));
                    }
                    stack.push(Value::I32((a % b) as i32));
                }
                Operator::I64Add => binop_i64(&mut stack, i64::wrapping_add),
                Operator::I64Sub => binop_i64(&mut stack, i64::wrapping_sub),
                Operator::I64Mul => binop_i64(&mut stack, i64::wrapping_mul),
                Operator::I64DivS => {
                    let b = pop(&mut stack).unwrap_i64();
                    let a = pop(&mut stack).unwrap_i64();
                    if b == 0 {
                        return Err(Trap::wasm(TrapCode::IntegerDivisionByZero));
                    }
                    if a == i64::MIN && b == -1 {
                        return Err(Trap::wasm(TrapCode::IntegerOverflow));
                    }
                    stack.push(Value::I64(a.wrapping_div(b)));
                }
                Operator::I64DivU => {
                    let b = pop(&mut stack).unwrap_i64() as u64;
                    let a = pop(&mut stack).unwrap_i64() as u64;
                    if b == 0 {
                        return Err(Trap::wasm(TrapCode::IntegerDivisionByZero));
                    }
                    stack.push(Value::I64((a / b) as i64));
                }
                Operator::F32Add => binop_f32(&mut stack, |a, b| a + b),
                Operator::F32Sub => binop_f32(&mut stack, |a, b| a - b),
                Operator::F32Mul => binop_f32(&mut stack, |a, b| a * b),
                Operator::F32Div => binop_f32(&mut stack, |a, b| a / b),
                Operator::F64Add => binop_f64(&mut stack, |a, b| a + b),
                Operator::F64Sub => binop_f64(&mut stack, |a, b| a - b),
                Operator::F64Mul => binop_f64(&mut stack, |a, b| a * b),
                Operator::F64Div => binop_f64(&mut stack, |a, b| a / b),

                Operator::I32Load { offset } => {
                    let addr = effective_address(&mut stack, offset);
                    let mut buf = [0u8; 4];
                    compartment
                        .memory(frame.memories[0])
                        .read(addr, &mut buf)?;
                    stack.push(Value::I32(i32::from_le_bytes(buf)));
                }
                Operator::I64Load { offset } => {
                    let addr = effective_address(&mut stack, offset);
                    let mut buf = [0u8; 8];
                    compartment
                        .memory(frame.memories[0])
                        .read(addr, &mut buf)?;
                    stack.push(Value::I64(i64::from_le_bytes(buf)));
                }
                Operator::I32Store { offset } => {
                    let value = pop(&mut stack).unwrap_i32();
                    let addr = effective_address(&mut stack, offset);
                    compartment
                        .memory_mut(frame.memories[0])
                        .write(addr, &value.to_le_bytes())?;
                }
                Operator::I64Store { offset } => {
                    let value = pop(&mut stack).unwrap_i64();
                    let addr = effective_address(&mut stack, offset);
                    compartment
                        .memory_mut(frame.memories[0])
                        .write(addr, &value.to_le_bytes())?;
                }
                Operator::MemorySize => {
                    let pages = compartment.memory(frame.memories[0]).size();
                    stack.push(Value::I32(pages as i32));
                }
                Operator::MemoryGrow => {
                    let delta = pop(&mut stack).unwrap_i32() as u32 as u64;
                    let old = compartment.memory_mut(frame.memories[0]).grow(delta);
                    stack.push(Value::I32(old.map(|pages| pages as i32).unwrap_or(-1)));
                }

                Operator::Call(f) => {
                    let callee = frame.functions[f.as_u32() as usize];
                    call(compartment, callee, &mut stack)?;
                }
                Operator::CallIndirect { ty, table } => {
                    let entry = pop(&mut stack).unwrap_i32() as u32 as u64;
                    let table = frame.tables[table.as_u32() as usize];
                    let element = compartment.table(table).get(entry)?;
                    let callee = match element {
                        Some(element) => element.unwrap_func(),
                        None => return Err(Trap::wasm(TrapCode::IndirectCallToNull)),
                    };
                    let expected = module.signatures[ty];
                    let actual = compartment.function(callee).ty;
                    // The signature fingerprint comparison compiled code would
                    // perform: one token equality check.
                    if actual.encode() != expected.encode() {
                        return Err(Trap::wasm(TrapCode::BadSignature));
                    }
                    call(compartment, callee, &mut stack)?;
                }
            }
        }

        let result_types = ty.results();
        debug_assert!(stack.len() >= result_types.len(), "operand stack underflow");
        let returned = stack.split_off(stack.len() - result_types.len());
        for (value, &expected) in returned.iter().zip(result_types.elements()) {
            debug_assert!(
                value.fits(expected),
                "result of type {} where {} was declared",
                value.ty(),
                expected
            );
        }
        results.extend(returned);
        Ok(())
    }
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("operand stack underflow")
}

fn binop_i32(stack: &mut Vec<Value>, op: impl FnOnce(i32, i32) -> i32) {
    let b = pop(stack).unwrap_i32();
    let a = pop(stack).unwrap_i32();
    stack.push(Value::I32(op(a, b)));
}

fn binop_i64(stack: &mut Vec<Value>, op: impl FnOnce(i64, i64) -> i64) {
    let b = pop(stack).unwrap_i64();
    let a = pop(stack).unwrap_i64();
    stack.push(Value::I64(op(a, b)));
}

fn binop_f32(stack: &mut Vec<Value>, op: impl FnOnce(f32, f32) -> f32) {
    let b = pop(stack).unwrap_f32();
    let a = pop(stack).unwrap_f32();
    stack.push(Value::F32(op(a, b)));
}

fn binop_f64(stack: &mut Vec<Value>, op: impl FnOnce(f64, f64) -> f64) {
    let b = pop(stack).unwrap_f64();
    let a = pop(stack).unwrap_f64();
    stack.push(Value::F64(op(a, b)));
}

fn effective_address(stack: &mut Vec<Value>, offset: u32) -> u64 {
    let base = pop(stack).unwrap_i32() as u32;
    u64::from(base) + u64::from(offset)
}

fn call(
    compartment: &mut Compartment,
    callee: FuncRef,
    stack: &mut Vec<Value>,
) -> Result<(), Trap> {
    let num_params = compartment.function(callee).ty.params().len();
    debug_assert!(stack.len() >= num_params, "operand stack underflow");
    let args = stack.split_off(stack.len() - num_params);
    let mut call_results = Vec::new();
    compartment.call(callee, &args, &mut call_results)?;
    stack.extend(call_results);
    Ok(())
}
