//! Name resolution for module imports.
//!
//! A [`Resolver`] maps an import's two-level name and expected type to a
//! concrete object; [`link_module`] walks a module's imports in declared
//! order and either produces the full import vector or a structured account
//! of what was missing or mismatched. The [`StubResolver`] synthesizes
//! objects of the requested shape instead of failing, which makes every
//! validated module linkable — the mode used for sandboxed and fuzzed
//! execution.

use crate::instantiate::instantiate;
use std::sync::Arc;
use wasmcell_environ::{
    EntityIndex, FunctionBody, Module, ObjectType, Operator, ValueType,
};
use wasmcell_runtime::{Compartment, Compiler, Extern, Value};

/// A host-supplied strategy for mapping an import's name and expected type
/// to a concrete object.
pub trait Resolver {
    /// Resolves one import. Returning `None` marks the import missing.
    ///
    /// The returned object need not check against `expected`; the linker
    /// performs the subtype check and records failures itself.
    fn resolve(
        &mut self,
        compartment: &mut Compartment,
        module: &str,
        field: &str,
        expected: &ObjectType,
    ) -> Option<Extern>;
}

/// The two-level name of an import, as recorded in link failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportName {
    /// The name of the module the import is from.
    pub module: String,
    /// The name of the export within that module.
    pub field: String,
}

/// The outcome of linking a module against a resolver.
#[derive(Debug, Default)]
pub struct LinkResult {
    /// The resolved objects, in import declaration order. Complete only when
    /// [`LinkResult::success`] holds.
    pub resolved_imports: Vec<Extern>,
    /// Imports the resolver could not provide.
    pub missing_imports: Vec<ImportName>,
    /// Imports the resolver provided at an incompatible type.
    pub mismatches: Vec<ImportName>,
}

impl LinkResult {
    /// Returns whether every import resolved at a compatible type.
    pub fn success(&self) -> bool {
        self.missing_imports.is_empty() && self.mismatches.is_empty()
    }
}

/// Walks `module`'s imports in declared order, consulting `resolver` for
/// each, and collects the resolved objects or the failures.
pub fn link_module(
    compartment: &mut Compartment,
    module: &Module,
    resolver: &mut dyn Resolver,
) -> LinkResult {
    let mut result = LinkResult::default();
    for import in &module.imports {
        let expected = module.entity_type(import.entity);
        let name = ImportName {
            module: import.module.clone(),
            field: import.field.clone(),
        };
        match resolver.resolve(compartment, &import.module, &import.field, &expected) {
            None => {
                log::warn!("missing import {}.{}: {}", name.module, name.field, expected);
                result.missing_imports.push(name);
            }
            Some(object) => {
                let actual = compartment.extern_type(&object);
                if actual.is_subtype(&expected) {
                    result.resolved_imports.push(object);
                } else {
                    log::warn!(
                        "import {}.{} resolved to {}, expected {}",
                        name.module,
                        name.field,
                        actual,
                        expected
                    );
                    result.mismatches.push(name);
                }
            }
        }
    }
    result
}

/// A resolver that provides nothing: every import is missing.
pub struct NullResolver;

impl Resolver for NullResolver {
    fn resolve(
        &mut self,
        _compartment: &mut Compartment,
        _module: &str,
        _field: &str,
        _expected: &ObjectType,
    ) -> Option<Extern> {
        None
    }
}

/// What a stubbed function does when called.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StubBehavior {
    /// Return zero values of the declared result types.
    Zero,
    /// Trap via `unreachable`.
    Trap,
}

/// A resolver that synthesizes an object of the requested shape for every
/// import, making linking total over validated modules.
///
/// Function imports are satisfied by compiling a one-body module through the
/// supplied compiler and instantiating it; other kinds are fabricated
/// directly: empty tables and memories of the requested type, zero globals,
/// fresh tags.
pub struct StubResolver<'a> {
    compiler: &'a dyn Compiler,
    behavior: StubBehavior,
}

impl<'a> StubResolver<'a> {
    /// Creates a stub resolver whose functions return zero values.
    pub fn new(compiler: &'a dyn Compiler) -> StubResolver<'a> {
        StubResolver {
            compiler,
            behavior: StubBehavior::Zero,
        }
    }

    /// Creates a stub resolver whose functions trap when called.
    pub fn trapping(compiler: &'a dyn Compiler) -> StubResolver<'a> {
        StubResolver {
            compiler,
            behavior: StubBehavior::Trap,
        }
    }

    fn zero_const(ty: ValueType) -> Operator {
        match ty {
            ValueType::I32 => Operator::I32Const(0),
            ValueType::I64 => Operator::I64Const(0),
            ValueType::F32 => Operator::F32Const(0),
            ValueType::F64 => Operator::F64Const(0),
            ValueType::V128 => Operator::V128Const(0),
            ValueType::AnyRef | ValueType::AnyFunc | ValueType::NullRef => Operator::RefNull,
            ValueType::None | ValueType::Any => {
                panic!("stub for a signature with abstract result type {}", ty)
            }
        }
    }
}

impl Resolver for StubResolver<'_> {
    fn resolve(
        &mut self,
        compartment: &mut Compartment,
        module: &str,
        field: &str,
        expected: &ObjectType,
    ) -> Option<Extern> {
        log::debug!("synthesizing stub for {}.{}: {}", module, field, expected);
        match expected {
            ObjectType::Function(ty) => {
                let code = match self.behavior {
                    StubBehavior::Trap => vec![Operator::Unreachable],
                    StubBehavior::Zero => ty
                        .results()
                        .iter()
                        .map(|&result| Self::zero_const(result))
                        .collect(),
                };

                let mut stub = Module::new();
                let sig = stub.declare_signature(*ty);
                let func = stub.declare_func(sig, FunctionBody::new(code));
                stub.declare_export("stub", EntityIndex::Function(func));

                let compiled = self.compiler.compile(Arc::new(stub)).ok()?;
                let instance = instantiate(
                    compartment,
                    &compiled,
                    &[],
                    Some(format!("stub:{}.{}", module, field)),
                )
                .ok()?;
                compartment.instance_export(instance, "stub")
            }
            ObjectType::Table(ty) => Some(compartment.create_table(*ty).into()),
            ObjectType::Memory(ty) => compartment.create_memory(*ty).ok().map(Into::into),
            ObjectType::Global(ty) => compartment
                .create_global(*ty, Value::default_for(ty.value_type))
                .ok()
                .map(Into::into),
            ObjectType::Tag(ty) => Some(compartment.create_tag(*ty, None).into()),
        }
    }
}
