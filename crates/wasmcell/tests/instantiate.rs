//! End-to-end instantiation tests: imports, segments, start functions.

use std::sync::Arc;
use wasmcell::*;
use wasmcell_interp::InterpCompiler;

fn compile(module: Module) -> CompiledModule {
    InterpCompiler::new()
        .compile(Arc::new(module))
        .expect("module compiles")
}

fn sig_i32_i32_to_i32(module: &mut Module) -> SignatureIndex {
    module.declare_signature(FunctionType::new(
        TypeTuple::new([ValueType::I32]),
        TypeTuple::new([ValueType::I32, ValueType::I32]),
    ))
}

#[test]
fn exported_add_computes() -> anyhow::Result<()> {
    let mut module = Module::new();
    let sig = sig_i32_i32_to_i32(&mut module);
    let func = module.declare_func(
        sig,
        FunctionBody::new(vec![
            Operator::LocalGet(0),
            Operator::LocalGet(1),
            Operator::I32Add,
        ]),
    );
    module.declare_export("add", EntityIndex::Function(func));

    let compiled = compile(module);
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &compiled, &[], None)?;
    let add = compartment
        .instance_export(instance, "add")
        .expect("add is exported")
        .unwrap_func();

    let results = invoke(&mut compartment, add, &[Value::I32(2), Value::I32(3)]).unwrap();
    assert_eq!(results, vec![Value::I32(5)]);
    Ok(())
}

#[test]
fn trapping_start_function_aborts_instantiation() {
    let mut module = Module::new();
    let sig = module.declare_signature(FunctionType::empty());
    let start = module.declare_func(sig, FunctionBody::new(vec![Operator::Unreachable]));
    module.declare_start_func(start);

    let compiled = compile(module);
    let mut compartment = Compartment::new();
    let err = instantiate(&mut compartment, &compiled, &[], None).unwrap_err();
    match err {
        InstantiationError::StartTrap(trap) => {
            assert_eq!(trap.trap_code(), Some(TrapCode::UnreachableCodeReached));
            assert!(trap.call_stack().unwrap().len() >= 1);
        }
        other => panic!("unexpected error: {}", other),
    }
    // The failed instantiation left nothing behind.
    assert_eq!(compartment.live_object_count(), 0);
}

#[test]
fn import_arity_mismatch_allocates_nothing() {
    let mut module = Module::new();
    let sig = module.declare_signature(FunctionType::empty());
    module.declare_func_import(sig, "env", "f");

    let compiled = compile(module);
    let mut compartment = Compartment::new();
    let err = instantiate(&mut compartment, &compiled, &[], None).unwrap_err();
    assert!(matches!(
        err,
        InstantiationError::ImportCountMismatch {
            expected: 1,
            provided: 0
        }
    ));
    assert_eq!(compartment.live_object_count(), 0);
}

fn data_segment_module(offset: u64, len: usize) -> Module {
    let mut module = Module::new();
    let memory = module.declare_memory_import(
        MemoryType {
            shared: false,
            size: SizeConstraints { min: 1, max: 1 },
        },
        "env",
        "mem",
    );
    module.data_initializers.push(DataInitializer {
        memory_index: memory,
        base: None,
        offset,
        data: vec![0xa5; len].into_boxed_slice(),
    });
    module
}

#[test]
fn data_segment_straddling_the_end_traps_without_partial_write() {
    let page = u64::from(WASM_PAGE_SIZE);
    let mut compartment = Compartment::new();
    let memory = compartment
        .create_memory(MemoryType {
            shared: false,
            size: SizeConstraints { min: 1, max: 1 },
        })
        .unwrap();

    let compiled = compile(data_segment_module(page - 3, 5));
    let err = instantiate(&mut compartment, &compiled, &[Extern::Memory(memory)], None)
        .unwrap_err();
    assert!(matches!(err, InstantiationError::SegmentOutOfBounds("data")));

    // Atomicity: not even the in-bounds prefix was written.
    let mut contents = vec![0u8; page as usize];
    compartment.memory(memory).read(0, &mut contents).unwrap();
    assert!(contents.iter().all(|&b| b == 0));
}

#[test]
fn data_segment_to_the_exact_end_succeeds() {
    let page = u64::from(WASM_PAGE_SIZE);
    let mut compartment = Compartment::new();
    let memory = compartment
        .create_memory(MemoryType {
            shared: false,
            size: SizeConstraints { min: 1, max: 1 },
        })
        .unwrap();

    let compiled = compile(data_segment_module(page - 5, 5));
    instantiate(&mut compartment, &compiled, &[Extern::Memory(memory)], None).unwrap();

    let mut tail = [0u8; 5];
    compartment.memory(memory).read(page - 5, &mut tail).unwrap();
    assert_eq!(tail, [0xa5; 5]);
}

fn element_segment_module(offset: u64) -> Module {
    let mut module = Module::new();
    let table = module.declare_table_import(
        TableType {
            element_type: ReferenceType::AnyFunc,
            shared: false,
            size: SizeConstraints { min: 2, max: 2 },
        },
        "env",
        "table",
    );
    let sig = module.declare_signature(FunctionType::empty());
    let func = module.declare_func(sig, FunctionBody::new(vec![]));
    module.table_elements.push(TableElements {
        table_index: table,
        base: None,
        offset,
        elements: vec![func].into_boxed_slice(),
    });
    module
}

#[test]
fn element_segment_bounds_are_checked_before_any_write() {
    let mut compartment = Compartment::new();
    let table = compartment.create_table(TableType {
        element_type: ReferenceType::AnyFunc,
        shared: false,
        size: SizeConstraints { min: 2, max: 2 },
    });

    // One element starting at index 2 of a 2-element table: one past the end.
    let compiled = compile(element_segment_module(2));
    let err =
        instantiate(&mut compartment, &compiled, &[Extern::Table(table)], None).unwrap_err();
    assert!(matches!(
        err,
        InstantiationError::SegmentOutOfBounds("elements")
    ));
    assert_eq!(compartment.table(table).get(0).unwrap(), None);
    assert_eq!(compartment.table(table).get(1).unwrap(), None);

    // The same segment at index 1 fills the last slot.
    let compiled = compile(element_segment_module(1));
    instantiate(&mut compartment, &compiled, &[Extern::Table(table)], None).unwrap();
    assert!(compartment.table(table).get(1).unwrap().is_some());
}

#[test]
fn global_initializers_may_read_imported_globals() -> anyhow::Result<()> {
    let mut module = Module::new();
    let base = module.declare_global_import(
        GlobalType {
            value_type: ValueType::I32,
            mutable: false,
        },
        "env",
        "base",
    );
    let derived = module.declare_global(
        GlobalType {
            value_type: ValueType::I32,
            mutable: false,
        },
        GlobalInit::GetGlobal(base),
    );
    module.declare_export("derived", EntityIndex::Global(derived));

    let compiled = compile(module);
    let mut compartment = Compartment::new();
    let imported = compartment.create_global(
        GlobalType {
            value_type: ValueType::I32,
            mutable: false,
        },
        Value::I32(41),
    )?;
    let instance = instantiate(&mut compartment, &compiled, &[Extern::Global(imported)], None)?;
    let derived = compartment
        .instance_export(instance, "derived")
        .unwrap()
        .unwrap_global();
    assert_eq!(compartment.global_get(derived), Value::I32(41));
    Ok(())
}

#[test]
fn hand_assembled_imports_are_type_checked() {
    let mut module = Module::new();
    let sig = module.declare_signature(FunctionType::empty());
    module.declare_func_import(sig, "env", "f");

    let compiled = compile(module);
    let mut compartment = Compartment::new();
    let global = compartment
        .create_global(
            GlobalType {
                value_type: ValueType::I32,
                mutable: false,
            },
            Value::I32(0),
        )
        .unwrap();
    let before = compartment.live_object_count();
    let err = instantiate(&mut compartment, &compiled, &[Extern::Global(global)], None)
        .unwrap_err();
    assert!(matches!(
        err,
        InstantiationError::ImportTypeMismatch { index: 0 }
    ));
    assert_eq!(compartment.live_object_count(), before);
}
