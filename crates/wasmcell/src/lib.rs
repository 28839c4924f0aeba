//! A compartmentalized WebAssembly execution core.
//!
//! wasmcell ingests validated module IR and produces instantiated, callable
//! module instances. Instances live inside a [`Compartment`], an isolation
//! domain that owns every runtime object (functions, tables, memories,
//! globals, exception tags) and reclaims unreachable ones on explicit
//! [`Compartment::collect_garbage`] passes. Imports are resolved through the
//! [`Resolver`] protocol; code generation is delegated to a [`Compiler`]
//! implementation supplied by the embedder.
//!
//! A typical embedding:
//!
//! 1. build or decode a validated [`Module`],
//! 2. [`Compiler::compile`] it,
//! 3. [`link_module`] it against a resolver,
//! 4. [`instantiate`] it with the resolved imports,
//! 5. look up exports and [`invoke`] them.
//!
//! Runtime traps — faults in guard pages, stack exhaustion, integer traps,
//! `unreachable`, user-raised exceptions — are caught by the signal layer
//! and surfaced as structured [`Trap`] values with captured call stacks; the
//! host never observes them as anything else.

#![deny(missing_docs)]

mod func;
mod instantiate;
mod linker;

pub use crate::func::{define_host_function, invoke};
pub use crate::instantiate::{instantiate, InstantiationError};
pub use crate::linker::{
    link_module, ImportName, LinkResult, NullResolver, Resolver, StubBehavior, StubResolver,
};

pub use wasmcell_environ::{
    is_subtype, join, meet, DataInitializer, DefinedFuncIndex, EntityIndex, FuncIndex,
    FunctionBody, FunctionType, GlobalDecl, GlobalIndex, GlobalInit, GlobalType, Import,
    MemoryIndex, MemoryType, Module, ObjectKind, ObjectType, Operator, ReferenceType,
    SignatureIndex, SizeConstraints, TableElements, TableIndex, TableType, TagIndex, TagType,
    TrapCode, Tunables, TypeTuple, ValueType, WASM32_MAX_PAGES, WASM_PAGE_SIZE,
};
pub use wasmcell_runtime::{
    catch_traps, describe_instruction_pointer, set_signal_handler, CallStack, CompartmentId,
    CompileError, CompiledModule, Compartment, Compiler, Extern, FuncRef, GlobalRef, HostCode,
    InstanceRef, MemoryRef, Object, ObjectRef, TableRef, TagRef, Trap, Value, WasmCode,
};
