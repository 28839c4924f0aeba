//! The narrow function-compilation interface the core consumes.
//!
//! The core is not a compiler: something else turns a validated module's
//! function bodies into executable form. That something implements
//! [`Compiler`], and the executable form implements [`WasmCode`]. Host
//! functions use the same seam via [`HostCode`].

use crate::compartment::Compartment;
use crate::object::InstanceRef;
use crate::traphandlers::Trap;
use crate::values::Value;
use cranelift_entity::PrimaryMap;
use std::sync::Arc;
use thiserror::Error;
use wasmcell_environ::{DefinedFuncIndex, Module};

/// An executable function body.
///
/// Implementations run on the calling thread to completion; traps are
/// returned as values. The caller is responsible for wrapping top-level
/// entries in the signal guards.
pub trait WasmCode: Send + Sync {
    /// Invokes the body with the given arguments, appending results.
    ///
    /// `instance` is the defining instance whose index spaces the body's
    /// operators refer to; host functions receive `None`.
    fn invoke(
        &self,
        compartment: &mut Compartment,
        instance: Option<InstanceRef>,
        args: &[Value],
        results: &mut Vec<Value>,
    ) -> Result<(), Trap>;
}

/// The result of compiling a module: the module plus one executable body per
/// defined function.
pub struct CompiledModule {
    /// The compiled module.
    pub module: Arc<Module>,
    /// Executable bodies of the module's defined functions.
    pub functions: PrimaryMap<DefinedFuncIndex, Arc<dyn WasmCode>>,
}

/// An error while compiling a module.
#[derive(Error, Debug)]
pub enum CompileError {
    /// The module uses a construct this compiler does not implement.
    #[error("unsupported construct: {0}")]
    Unsupported(String),
}

/// A compiler of validated modules.
pub trait Compiler: Send + Sync {
    /// Compiles every defined function of `module`.
    fn compile(&self, module: Arc<Module>) -> Result<CompiledModule, CompileError>;
}

/// A host function body: a Rust closure behind the [`WasmCode`] seam.
pub struct HostCode<F> {
    func: F,
}

impl<F> HostCode<F>
where
    F: Fn(&mut Compartment, &[Value], &mut Vec<Value>) -> Result<(), Trap> + Send + Sync,
{
    /// Wraps a closure as an executable body.
    pub fn new(func: F) -> Self {
        HostCode { func }
    }
}

impl<F> WasmCode for HostCode<F>
where
    F: Fn(&mut Compartment, &[Value], &mut Vec<Value>) -> Result<(), Trap> + Send + Sync,
{
    fn invoke(
        &self,
        compartment: &mut Compartment,
        _instance: Option<InstanceRef>,
        args: &[Value],
        results: &mut Vec<Value>,
    ) -> Result<(), Trap> {
        (self.func)(compartment, args, results)
    }
}
