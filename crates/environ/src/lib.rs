//! Type system and validated module IR consumed by the wasmcell runtime.
//!
//! This crate is the "environment" half of the execution core: the value and
//! extern type lattice, the process-wide hash-consing registry that turns
//! types into pointer-sized tokens, and the in-memory representation of an
//! already-validated module. It performs no decoding and no validation of
//! untrusted input.

#![deny(missing_docs)]

mod module;
mod operators;
mod registry;
mod trap;
mod tunables;
mod types;

pub use crate::module::{
    DataInitializer, DefinedFuncIndex, EntityIndex, FuncIndex, GlobalDecl, GlobalIndex, GlobalInit,
    Import, MemoryIndex, Module, SignatureIndex, TableElements, TableIndex, TagIndex,
};
pub use crate::operators::{FunctionBody, Operator};
pub use crate::registry::{FunctionType, TypeTuple};
pub use crate::trap::TrapCode;
pub use crate::tunables::Tunables;
pub use crate::types::{
    is_subtype, join, meet, GlobalType, MemoryType, ObjectKind, ObjectType, ReferenceType,
    SizeConstraints, TableType, TagType, ValueType,
};

/// WebAssembly page sizes are defined to be 64 KiB.
pub const WASM_PAGE_SIZE: u32 = 0x10000;

/// The number of pages we can have before we run out of byte index space for
/// a 32-bit linear memory.
pub const WASM32_MAX_PAGES: u64 = 0x10000;
