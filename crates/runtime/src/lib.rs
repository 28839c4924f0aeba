//! Runtime library support for wasmcell: virtual memory, signal-based trap
//! handling, compartment-owned runtime objects, and garbage collection.

#![deny(missing_docs)]

mod callstack;
mod compartment;
mod compile;
mod instance;
mod memory;
mod mmap;
mod object;
mod table;
mod traphandlers;
mod values;

pub use crate::callstack::{describe_instruction_pointer, CallStack};
pub use crate::compartment::Compartment;
pub use crate::compile::{CompileError, CompiledModule, Compiler, HostCode, WasmCode};
pub use crate::instance::InstanceData;
pub use crate::memory::{LinearMemory, Memory};
pub use crate::mmap::{page_size, round_up_to_page_size, Mmap, Protection};
pub use crate::object::{
    CompartmentId, Extern, FuncRef, Function, Global, GlobalRef, InstanceRef, MemoryRef, Object,
    ObjectRef, TableRef, Tag, TagRef,
};
pub use crate::table::Table;
pub use crate::traphandlers::{
    catch_traps, init, raise_lib_trap, raise_user_trap, resume_panic, set_signal_handler,
    SignalHandler, Trap,
};
pub use crate::values::Value;
