//! Compartment garbage collection through the public surface.

use std::sync::Arc;
use wasmcell::*;
use wasmcell_interp::InterpCompiler;

fn exported_answer_module() -> Module {
    let mut module = Module::new();
    let sig = module.declare_signature(FunctionType::new(
        TypeTuple::new([ValueType::I32]),
        TypeTuple::empty(),
    ));
    let func = module.declare_func(sig, FunctionBody::new(vec![Operator::I32Const(42)]));
    module.declare_export("answer", EntityIndex::Function(func));
    module.declare_memory(MemoryType {
        shared: false,
        size: SizeConstraints { min: 1, max: 1 },
    });
    module
}

fn compile(module: Module) -> CompiledModule {
    InterpCompiler::new()
        .compile(Arc::new(module))
        .expect("module compiles")
}

#[test]
fn rooted_instances_survive_collection() -> anyhow::Result<()> {
    let compiled = compile(exported_answer_module());
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &compiled, &[], None)?;

    assert_eq!(compartment.collect_garbage(), 0);
    let answer = compartment
        .instance_export(instance, "answer")
        .unwrap()
        .unwrap_func();
    assert_eq!(
        invoke(&mut compartment, answer, &[]).unwrap(),
        vec![Value::I32(42)]
    );
    Ok(())
}

#[test]
fn unrooted_instances_are_collected_with_their_objects() -> anyhow::Result<()> {
    let compiled = compile(exported_answer_module());
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &compiled, &[], None)?;

    // instance + function + memory
    assert_eq!(compartment.live_object_count(), 3);
    compartment.remove_root(instance);
    assert_eq!(compartment.collect_garbage(), 3);
    assert_eq!(compartment.live_object_count(), 0);
    Ok(())
}

#[test]
fn collection_is_idempotent_on_a_quiescent_compartment() -> anyhow::Result<()> {
    let compiled = compile(exported_answer_module());
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &compiled, &[], None)?;

    compartment.remove_root(instance);
    let freed = compartment.collect_garbage();
    assert!(freed > 0);
    assert_eq!(compartment.collect_garbage(), 0);
    assert_eq!(compartment.collect_garbage(), 0);
    Ok(())
}

#[test]
fn collection_in_one_compartment_leaves_others_callable() -> anyhow::Result<()> {
    let compiled = compile(exported_answer_module());

    let mut a = Compartment::new();
    let mut b = Compartment::new();
    let instance_a = instantiate(&mut a, &compiled, &[], None)?;
    let instance_b = instantiate(&mut b, &compiled, &[], None)?;

    // Everything in A becomes garbage; B is untouched.
    a.remove_root(instance_a);
    assert!(a.collect_garbage() > 0);

    assert_eq!(b.live_object_count(), 3);
    let answer = b
        .instance_export(instance_b, "answer")
        .unwrap()
        .unwrap_func();
    assert_eq!(invoke(&mut b, answer, &[]).unwrap(), vec![Value::I32(42)]);
    Ok(())
}

#[test]
fn imported_objects_stay_alive_through_the_importing_instance() -> anyhow::Result<()> {
    let mut module = Module::new();
    module.declare_memory_import(
        MemoryType {
            shared: false,
            size: SizeConstraints { min: 1, max: 1 },
        },
        "env",
        "mem",
    );

    let compiled = compile(module);
    let mut compartment = Compartment::new();
    let memory = compartment
        .create_memory(MemoryType {
            shared: false,
            size: SizeConstraints { min: 1, max: 1 },
        })
        .unwrap();
    let _instance = instantiate(&mut compartment, &compiled, &[Extern::Memory(memory)], None)?;

    // The memory was never rooted itself, but the rooted instance imports
    // it, so collection keeps it.
    assert_eq!(compartment.collect_garbage(), 0);
    compartment.memory_mut(memory).write(0, &[1]).unwrap();
    Ok(())
}
