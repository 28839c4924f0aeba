//! Turning a compiled module plus resolved imports into a live instance.

use std::sync::Arc;
use thiserror::Error;
use wasmcell_environ::{
    EntityIndex, GlobalInit, Module, TableElements, ValueType, WASM_PAGE_SIZE,
};
use wasmcell_runtime::{
    catch_traps, CompiledModule, Compartment, Extern, FuncRef, InstanceRef, Object, Trap, Value,
};

/// An error while instantiating a module.
///
/// Any failure leaves the compartment as it was: every partially-allocated
/// object is discarded before the error is returned.
#[derive(Error, Debug)]
pub enum InstantiationError {
    /// Insufficient resources available for execution.
    #[error("Insufficient resources: {0}")]
    Resource(String),

    /// The import vector does not line up with the module's imports.
    #[error("{provided} imports were provided, but the module declares {expected}")]
    ImportCountMismatch {
        /// The number of imports the module declares.
        expected: usize,
        /// The number of objects supplied.
        provided: usize,
    },

    /// A supplied import has a type incompatible with its declaration.
    ///
    /// `link_module` never produces such a vector; this arises only when a
    /// host assembles imports by hand.
    #[error("import {index} is not a subtype of its declaration")]
    ImportTypeMismatch {
        /// Position of the offending import in declaration order.
        index: usize,
    },

    /// An active element or data segment does not fit in its target.
    #[error("{0} segment does not fit in its target")]
    SegmentOutOfBounds(&'static str),

    /// The start function trapped; the trap carries the reason and stack.
    #[error("trap occurred while invoking start function")]
    StartTrap(#[source] Trap),
}

/// Instantiates `compiled` in `compartment` with the given resolved imports.
///
/// The sequence is: import arity and type checks, import installation,
/// define-side allocation, initializer evaluation, bounds-checking of every
/// active segment, segment application, then the start function under the
/// trap guards. A failure at any step discards all partially-allocated
/// objects; segments are applied only after all of them have been checked,
/// so a trapping instantiation writes nothing.
///
/// On success the instance is registered with the compartment's root set;
/// release it with [`Compartment::remove_root`] to make it collectable.
pub fn instantiate(
    compartment: &mut Compartment,
    compiled: &CompiledModule,
    imports: &[Extern],
    name: Option<String>,
) -> Result<InstanceRef, InstantiationError> {
    wasmcell_runtime::init();
    let module = &compiled.module;

    if imports.len() != module.imports.len() {
        return Err(InstantiationError::ImportCountMismatch {
            expected: module.imports.len(),
            provided: imports.len(),
        });
    }
    for (index, (import, object)) in module.imports.iter().zip(imports).enumerate() {
        let expected = module.entity_type(import.entity);
        if !compartment.extern_type(object).is_subtype(&expected) {
            return Err(InstantiationError::ImportTypeMismatch { index });
        }
    }

    let mut created: Vec<Object> = Vec::new();
    match build(compartment, compiled, imports, name, &mut created) {
        Ok(instance) => {
            compartment.add_root(instance);
            Ok(instance)
        }
        Err(e) => {
            for object in created.into_iter().rev() {
                compartment.discard(object);
            }
            Err(e)
        }
    }
}

fn build(
    compartment: &mut Compartment,
    compiled: &CompiledModule,
    imports: &[Extern],
    name: Option<String>,
    created: &mut Vec<Object>,
) -> Result<InstanceRef, InstantiationError> {
    let module = &compiled.module;

    let instance = compartment.reserve_instance(name, module.clone());
    created.push(instance.into());

    // Imported objects land in the instance's index spaces first, in
    // declaration order; they are shared with their definers, not owned.
    for object in imports {
        let data = compartment.instance_mut(instance);
        match object {
            Extern::Func(f) => data.functions.push(*f),
            Extern::Table(t) => data.tables.push(*t),
            Extern::Memory(m) => data.memories.push(*m),
            Extern::Global(g) => data.globals.push(*g),
            Extern::Tag(t) => data.tags.push(*t),
        }
    }

    // Defined functions bind the compiled bodies to this instance.
    for (def_index, code) in compiled.functions.iter() {
        let func_index = module.func_index(def_index);
        let func = compartment.create_function(
            module.func_type(func_index),
            code.clone(),
            Some(instance),
            module.func_names.get(&func_index).cloned(),
        );
        created.push(func.into());
        compartment.instance_mut(instance).functions.push(func);
    }

    // Defined tables and memories are sized from their type's minimum.
    for (_, ty) in module.tables.iter().skip(module.num_imported_tables) {
        let table = compartment.create_table(*ty);
        created.push(table.into());
        compartment.instance_mut(instance).tables.push(table);
    }
    for (_, ty) in module.memories.iter().skip(module.num_imported_memories) {
        let memory = compartment
            .create_memory(*ty)
            .map_err(|e| InstantiationError::Resource(format!("{:#}", e)))?;
        created.push(memory.into());
        compartment.instance_mut(instance).memories.push(memory);
    }

    // Defined globals evaluate their initializer expressions; imported
    // globals are already installed, so `global.get` initializers resolve.
    for (_, decl) in module.globals.iter().skip(module.num_imported_globals) {
        let value = eval_global_init(compartment, instance, module, &decl.initializer);
        let global = compartment
            .create_global(decl.ty, value)
            .map_err(|e| InstantiationError::Resource(format!("{:#}", e)))?;
        created.push(global.into());
        compartment.instance_mut(instance).globals.push(global);
    }

    for (_, ty) in module.tags.iter().skip(module.num_imported_tags) {
        let tag = compartment.create_tag(*ty, None);
        created.push(tag.into());
        compartment.instance_mut(instance).tags.push(tag);
    }

    // The export map points into the now-complete index spaces.
    for (field, entity) in &module.exports {
        let data = compartment.instance(instance);
        let object = match *entity {
            EntityIndex::Function(i) => Extern::Func(data.function(i)),
            EntityIndex::Table(i) => Extern::Table(data.table(i)),
            EntityIndex::Memory(i) => Extern::Memory(data.memory(i)),
            EntityIndex::Global(i) => Extern::Global(data.global(i)),
            EntityIndex::Tag(i) => Extern::Tag(data.tag(i)),
        };
        compartment
            .instance_mut(instance)
            .exports
            .insert(field.clone(), object);
    }

    // Check every segment's bounds before applying any, so a trapping
    // instantiation leaves no partial writes behind.
    check_table_init_bounds(compartment, instance, module)?;
    check_memory_init_bounds(compartment, instance, module)?;
    initialize_tables(compartment, instance, module);
    initialize_memories(compartment, instance, module);

    // The start function runs under the trap guards; an escaping trap aborts
    // the instantiation.
    if let Some(start) = module.start_func {
        let func = compartment.instance(instance).function(start);
        invoke_start(compartment, func).map_err(InstantiationError::StartTrap)?;
    }

    Ok(instance)
}

fn eval_global_init(
    compartment: &Compartment,
    instance: InstanceRef,
    module: &Arc<Module>,
    init: &GlobalInit,
) -> Value {
    match *init {
        GlobalInit::I32Const(x) => Value::I32(x),
        GlobalInit::I64Const(x) => Value::I64(x),
        GlobalInit::F32Const(bits) => Value::F32(f32::from_bits(bits)),
        GlobalInit::F64Const(bits) => Value::F64(f64::from_bits(bits)),
        GlobalInit::V128Const(x) => Value::V128(x),
        GlobalInit::RefNullConst => Value::NullRef,
        GlobalInit::GetGlobal(index) => {
            assert!(
                (index.as_u32() as usize) < module.num_imported_globals,
                "global initializer reads a non-imported global"
            );
            compartment.global_get(compartment.instance(instance).global(index))
        }
        GlobalInit::Import => panic!("locally-defined global initialized as import"),
    }
}

/// Computes the flat start offset of a segment from its optional base global
/// plus constant offset.
fn segment_start(
    compartment: &Compartment,
    instance: InstanceRef,
    base: Option<wasmcell_environ::GlobalIndex>,
    offset: u64,
) -> u64 {
    let base = match base {
        None => 0,
        Some(index) => {
            let global = compartment.instance(instance).global(index);
            match compartment.global_get(global) {
                Value::I32(v) => u64::from(v as u32),
                Value::I64(v) => v as u64,
                other => panic!("segment base global of type {}", other.ty()),
            }
        }
    };
    base + offset
}

fn element_range(
    compartment: &Compartment,
    instance: InstanceRef,
    init: &TableElements,
) -> (u64, u64) {
    let start = segment_start(compartment, instance, init.base, init.offset);
    (start, init.elements.len() as u64)
}

fn check_table_init_bounds(
    compartment: &Compartment,
    instance: InstanceRef,
    module: &Arc<Module>,
) -> Result<(), InstantiationError> {
    for init in &module.table_elements {
        let (start, len) = element_range(compartment, instance, init);
        let table = compartment.instance(instance).table(init.table_index);
        let size = compartment.table(table).size();
        if start.checked_add(len).map_or(true, |end| end > size) {
            return Err(InstantiationError::SegmentOutOfBounds("elements"));
        }
    }
    Ok(())
}

fn check_memory_init_bounds(
    compartment: &Compartment,
    instance: InstanceRef,
    module: &Arc<Module>,
) -> Result<(), InstantiationError> {
    for init in &module.data_initializers {
        let start = segment_start(compartment, instance, init.base, init.offset);
        let memory = compartment.instance(instance).memory(init.memory_index);
        let size_bytes = compartment.memory(memory).size() * u64::from(WASM_PAGE_SIZE);
        let len = init.data.len() as u64;
        if start.checked_add(len).map_or(true, |end| end > size_bytes) {
            return Err(InstantiationError::SegmentOutOfBounds("data"));
        }
    }
    Ok(())
}

fn initialize_tables(compartment: &mut Compartment, instance: InstanceRef, module: &Arc<Module>) {
    for init in &module.table_elements {
        let (start, _) = element_range(compartment, instance, init);
        let table = compartment.instance(instance).table(init.table_index);
        for (i, func_index) in init.elements.iter().enumerate() {
            let func = compartment.instance(instance).function(*func_index);
            compartment
                .table_mut(table)
                .set(start + i as u64, Some(Extern::Func(func)))
                .expect("segment bounds were checked");
        }
    }
}

fn initialize_memories(compartment: &mut Compartment, instance: InstanceRef, module: &Arc<Module>) {
    for init in &module.data_initializers {
        let start = segment_start(compartment, instance, init.base, init.offset);
        let memory = compartment.instance(instance).memory(init.memory_index);
        compartment
            .memory_mut(memory)
            .write(start, &init.data)
            .expect("segment bounds were checked");
    }
}

fn invoke_start(compartment: &mut Compartment, func: FuncRef) -> Result<(), Trap> {
    debug_assert_eq!(
        compartment.function(func).ty.params().elements(),
        &[] as &[ValueType],
        "start function with parameters"
    );
    let mut call_result = Ok(());
    let mut results = Vec::new();
    let guard_result = unsafe {
        catch_traps(|| {
            call_result = compartment.call(func, &[], &mut results);
        })
    };
    guard_result?;
    call_result
}
