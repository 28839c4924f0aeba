//! Trap taxonomy through the public surface.

use std::sync::Arc;
use wasmcell::*;
use wasmcell_interp::InterpCompiler;

fn compile(module: Module) -> CompiledModule {
    InterpCompiler::new()
        .compile(Arc::new(module))
        .expect("module compiles")
}

fn single_export(module: Module, name: &str) -> (Compartment, FuncRef) {
    let compiled = compile(module);
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &compiled, &[], None).unwrap();
    let func = compartment
        .instance_export(instance, name)
        .unwrap()
        .unwrap_func();
    (compartment, func)
}

#[test]
fn integer_division_by_zero_traps() {
    let mut module = Module::new();
    let sig = module.declare_signature(FunctionType::new(
        TypeTuple::new([ValueType::I32]),
        TypeTuple::new([ValueType::I32, ValueType::I32]),
    ));
    let div = module.declare_func(
        sig,
        FunctionBody::new(vec![
            Operator::LocalGet(0),
            Operator::LocalGet(1),
            Operator::I32DivS,
        ]),
    );
    module.declare_export("div", EntityIndex::Function(div));

    let (mut compartment, div) = single_export(module, "div");
    assert_eq!(
        invoke(&mut compartment, div, &[Value::I32(7), Value::I32(2)]).unwrap(),
        vec![Value::I32(3)]
    );
    let trap = invoke(&mut compartment, div, &[Value::I32(7), Value::I32(0)]).unwrap_err();
    assert_eq!(trap.trap_code(), Some(TrapCode::IntegerDivisionByZero));

    let trap = invoke(
        &mut compartment,
        div,
        &[Value::I32(i32::MIN), Value::I32(-1)],
    )
    .unwrap_err();
    assert_eq!(trap.trap_code(), Some(TrapCode::IntegerOverflow));
}

#[test]
fn runaway_recursion_traps_with_stack_overflow() {
    let mut module = Module::new();
    let sig = module.declare_signature(FunctionType::empty());
    let func = module.declare_func(
        sig,
        FunctionBody::new(vec![Operator::Call(FuncIndex::from_u32(0))]),
    );
    module.declare_export("loop_forever", EntityIndex::Function(func));

    let (mut compartment, func) = single_export(module, "loop_forever");
    let trap = invoke(&mut compartment, func, &[]).unwrap_err();
    assert_eq!(trap.trap_code(), Some(TrapCode::StackOverflow));
}

fn indirect_call_module() -> Module {
    let mut module = Module::new();
    let nullary = module.declare_signature(FunctionType::new(
        TypeTuple::new([ValueType::I32]),
        TypeTuple::empty(),
    ));
    let unary = module.declare_signature(FunctionType::new(
        TypeTuple::new([ValueType::I32]),
        TypeTuple::new([ValueType::I32]),
    ));

    let callee = module.declare_func(nullary, FunctionBody::new(vec![Operator::I32Const(7)]));
    let table = module.declare_table(TableType {
        element_type: ReferenceType::AnyFunc,
        shared: false,
        size: SizeConstraints { min: 2, max: 2 },
    });
    module.table_elements.push(TableElements {
        table_index: table,
        base: None,
        offset: 0,
        elements: vec![callee].into_boxed_slice(),
    });

    // call_good: calls slot 0 expecting its real signature.
    let good = module.declare_func(
        nullary,
        FunctionBody::new(vec![
            Operator::I32Const(0),
            Operator::CallIndirect { ty: nullary, table },
        ]),
    );
    module.declare_export("call_good", EntityIndex::Function(good));

    // call_bad: calls slot 0 expecting the wrong signature.
    let bad = module.declare_func(
        nullary,
        FunctionBody::new(vec![
            Operator::I32Const(5),
            Operator::I32Const(0),
            Operator::CallIndirect { ty: unary, table },
        ]),
    );
    module.declare_export("call_bad", EntityIndex::Function(bad));

    // call_null: calls the uninitialized slot 1.
    let null = module.declare_func(
        nullary,
        FunctionBody::new(vec![
            Operator::I32Const(1),
            Operator::CallIndirect { ty: nullary, table },
        ]),
    );
    module.declare_export("call_null", EntityIndex::Function(null));

    module
}

#[test]
fn indirect_calls_check_signature_tokens() {
    let module = indirect_call_module();
    let compiled = compile(module);
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &compiled, &[], None).unwrap();

    let good = compartment
        .instance_export(instance, "call_good")
        .unwrap()
        .unwrap_func();
    assert_eq!(
        invoke(&mut compartment, good, &[]).unwrap(),
        vec![Value::I32(7)]
    );

    let bad = compartment
        .instance_export(instance, "call_bad")
        .unwrap()
        .unwrap_func();
    let trap = invoke(&mut compartment, bad, &[]).unwrap_err();
    assert_eq!(trap.trap_code(), Some(TrapCode::BadSignature));

    let null = compartment
        .instance_export(instance, "call_null")
        .unwrap()
        .unwrap_func();
    let trap = invoke(&mut compartment, null, &[]).unwrap_err();
    assert_eq!(trap.trap_code(), Some(TrapCode::IndirectCallToNull));
}

#[test]
fn host_functions_raise_user_traps_as_values() {
    #[derive(Debug)]
    struct Denied;
    impl std::fmt::Display for Denied {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("denied")
        }
    }
    impl std::error::Error for Denied {}

    let mut compartment = Compartment::new();
    let func = define_host_function(
        &mut compartment,
        FunctionType::empty(),
        Some("deny"),
        |_, _, _| Err(Trap::user(Box::new(Denied))),
    );
    let trap = invoke(&mut compartment, func, &[]).unwrap_err();
    assert!(matches!(trap, Trap::User(_)));
    assert_eq!(trap.to_string(), "denied");
}

#[test]
fn argument_type_errors_never_enter_the_function() {
    let mut compartment = Compartment::new();
    let func = define_host_function(
        &mut compartment,
        FunctionType::new(TypeTuple::empty(), TypeTuple::new([ValueType::I32])),
        None,
        |_, _, _| panic!("must not be entered"),
    );

    let err = invoke(&mut compartment, func, &[]).unwrap_err();
    assert!(matches!(err, Trap::User(_)));

    let err = invoke(&mut compartment, func, &[Value::F32(1.0)]).unwrap_err();
    assert!(matches!(err, Trap::User(_)));
}

#[test]
fn host_functions_can_call_back_into_wasm() {
    let mut module = Module::new();
    let sig = module.declare_signature(FunctionType::new(
        TypeTuple::new([ValueType::I32]),
        TypeTuple::empty(),
    ));
    let func = module.declare_func(sig, FunctionBody::new(vec![Operator::I32Const(9)]));
    module.declare_export("nine", EntityIndex::Function(func));

    let (mut compartment, nine) = single_export(module, "nine");
    let trampoline = define_host_function(
        &mut compartment,
        FunctionType::new(TypeTuple::new([ValueType::I32]), TypeTuple::empty()),
        Some("trampoline"),
        move |compartment, _args, results| compartment.call(nine, &[], results),
    );
    assert_eq!(
        invoke(&mut compartment, trampoline, &[]).unwrap(),
        vec![Value::I32(9)]
    );
}
