//! Linear-memory behavior through the public surface.

use std::sync::Arc;
use wasmcell::*;
use wasmcell_interp::InterpCompiler;

fn compile(module: Module) -> CompiledModule {
    InterpCompiler::new()
        .compile(Arc::new(module))
        .expect("module compiles")
}

fn memory_type(min: u64, max: u64) -> MemoryType {
    MemoryType {
        shared: false,
        size: SizeConstraints { min, max },
    }
}

#[test]
fn growth_past_the_declared_maximum_fails() {
    let mut compartment = Compartment::new();
    let memory = compartment.create_memory(memory_type(1, 2)).unwrap();

    assert_eq!(compartment.memory_mut(memory).grow(2), None);
    assert_eq!(compartment.memory(memory).size(), 1);

    assert_eq!(compartment.memory_mut(memory).grow(1), Some(1));
    assert_eq!(compartment.memory(memory).size(), 2);
}

#[test]
fn grown_pages_read_as_zero() {
    let page = u64::from(WASM_PAGE_SIZE);
    let mut compartment = Compartment::new();
    let memory = compartment.create_memory(memory_type(1, 4)).unwrap();

    compartment
        .memory_mut(memory)
        .write(0, &[0xde, 0xad])
        .unwrap();
    let old = compartment.memory_mut(memory).grow(3).unwrap();
    assert_eq!(old, 1);
    assert_eq!(compartment.memory(memory).size(), 4);

    let mut grown = vec![0xff; (3 * page) as usize];
    compartment.memory(memory).read(page, &mut grown).unwrap();
    assert!(grown.iter().all(|&b| b == 0));

    let mut prefix = [0u8; 2];
    compartment.memory(memory).read(0, &mut prefix).unwrap();
    assert_eq!(prefix, [0xde, 0xad]);
}

#[test]
fn memory_operators_observe_growth() -> anyhow::Result<()> {
    let mut module = Module::new();
    module.declare_memory(memory_type(1, 2));

    let grow_sig = module.declare_signature(FunctionType::new(
        TypeTuple::new([ValueType::I32]),
        TypeTuple::new([ValueType::I32]),
    ));
    let grow = module.declare_func(
        grow_sig,
        FunctionBody::new(vec![Operator::LocalGet(0), Operator::MemoryGrow]),
    );
    module.declare_export("grow", EntityIndex::Function(grow));

    let size_sig = module.declare_signature(FunctionType::new(
        TypeTuple::new([ValueType::I32]),
        TypeTuple::empty(),
    ));
    let size = module.declare_func(size_sig, FunctionBody::new(vec![Operator::MemorySize]));
    module.declare_export("size", EntityIndex::Function(size));

    let compiled = compile(module);
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &compiled, &[], None)?;
    let grow = compartment
        .instance_export(instance, "grow")
        .unwrap()
        .unwrap_func();
    let size = compartment
        .instance_export(instance, "size")
        .unwrap()
        .unwrap_func();

    assert_eq!(
        invoke(&mut compartment, size, &[]).unwrap(),
        vec![Value::I32(1)]
    );
    assert_eq!(
        invoke(&mut compartment, grow, &[Value::I32(1)]).unwrap(),
        vec![Value::I32(1)]
    );
    assert_eq!(
        invoke(&mut compartment, size, &[]).unwrap(),
        vec![Value::I32(2)]
    );
    // Past the maximum: the operator reports -1 and the size is unchanged.
    assert_eq!(
        invoke(&mut compartment, grow, &[Value::I32(1)]).unwrap(),
        vec![Value::I32(-1)]
    );
    assert_eq!(
        invoke(&mut compartment, size, &[]).unwrap(),
        vec![Value::I32(2)]
    );
    Ok(())
}

#[test]
fn loads_and_stores_round_trip_through_wasm() -> anyhow::Result<()> {
    let mut module = Module::new();
    module.declare_memory(memory_type(1, 1));

    let store_sig = module.declare_signature(FunctionType::new(
        TypeTuple::empty(),
        TypeTuple::new([ValueType::I32, ValueType::I32]),
    ));
    let store = module.declare_func(
        store_sig,
        FunctionBody::new(vec![
            Operator::LocalGet(0),
            Operator::LocalGet(1),
            Operator::I32Store { offset: 0 },
        ]),
    );
    module.declare_export("store", EntityIndex::Function(store));

    let load_sig = module.declare_signature(FunctionType::new(
        TypeTuple::new([ValueType::I32]),
        TypeTuple::new([ValueType::I32]),
    ));
    let load = module.declare_func(
        load_sig,
        FunctionBody::new(vec![Operator::LocalGet(0), Operator::I32Load { offset: 0 }]),
    );
    module.declare_export("load", EntityIndex::Function(load));

    let compiled = compile(module);
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &compiled, &[], None)?;
    let store = compartment
        .instance_export(instance, "store")
        .unwrap()
        .unwrap_func();
    let load = compartment
        .instance_export(instance, "load")
        .unwrap()
        .unwrap_func();

    invoke(
        &mut compartment,
        store,
        &[Value::I32(64), Value::I32(0x1234_5678)],
    )
    .unwrap();
    assert_eq!(
        invoke(&mut compartment, load, &[Value::I32(64)]).unwrap(),
        vec![Value::I32(0x1234_5678)]
    );

    // An access one byte past the end traps.
    let page_end = (WASM_PAGE_SIZE - 3) as i32;
    let trap = invoke(&mut compartment, load, &[Value::I32(page_end)]).unwrap_err();
    assert_eq!(trap.trap_code(), Some(TrapCode::MemoryOutOfBounds));
    Ok(())
}
