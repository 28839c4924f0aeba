//! Runtime state of a module instance.

use crate::object::{Extern, FuncRef, GlobalRef, MemoryRef, TableRef, TagRef};
use indexmap::IndexMap;
use std::sync::Arc;
use wasmcell_environ::{FuncIndex, GlobalIndex, MemoryIndex, Module, TableIndex, TagIndex};

/// A module instance: the per-kind object vectors produced by
/// instantiation (imports first, then definitions, in index-space order) and
/// the export map.
///
/// Imported objects appear in the vectors but are owned by whoever defined
/// them; the instance owns only the objects allocated for its own
/// definitions. Reachability makes no distinction: everything an instance can
/// address stays alive while the instance does.
#[derive(Debug)]
pub struct InstanceData {
    /// An optional debug name for the instance.
    pub name: Option<String>,

    /// The module this instance was instantiated from.
    pub module: Arc<Module>,

    /// Functions, indexed by `FuncIndex`.
    pub functions: Vec<FuncRef>,

    /// Tables, indexed by `TableIndex`.
    pub tables: Vec<TableRef>,

    /// Memories, indexed by `MemoryIndex`.
    pub memories: Vec<MemoryRef>,

    /// Globals, indexed by `GlobalIndex`.
    pub globals: Vec<GlobalRef>,

    /// Exception tags, indexed by `TagIndex`.
    pub tags: Vec<TagRef>,

    /// Exported objects by name, in declaration order.
    pub exports: IndexMap<String, Extern>,
}

impl InstanceData {
    /// Creates an empty instance for `module`; instantiation fills in the
    /// vectors.
    pub fn new(name: Option<String>, module: Arc<Module>) -> Self {
        InstanceData {
            name,
            module,
            functions: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
            globals: Vec::new(),
            tags: Vec::new(),
            exports: IndexMap::new(),
        }
    }

    /// Looks up an export by name.
    pub fn lookup(&self, field: &str) -> Option<Extern> {
        self.exports.get(field).copied()
    }

    /// Returns the function at the given index in the function index space.
    pub fn function(&self, index: FuncIndex) -> FuncRef {
        self.functions[index.as_u32() as usize]
    }

    /// Returns the table at the given index in the table index space.
    pub fn table(&self, index: TableIndex) -> TableRef {
        self.tables[index.as_u32() as usize]
    }

    /// Returns the memory at the given index in the memory index space.
    pub fn memory(&self, index: MemoryIndex) -> MemoryRef {
        self.memories[index.as_u32() as usize]
    }

    /// Returns the global at the given index in the global index space.
    pub fn global(&self, index: GlobalIndex) -> GlobalRef {
        self.globals[index.as_u32() as usize]
    }

    /// Returns the tag at the given index in the tag index space.
    pub fn tag(&self, index: TagIndex) -> TagRef {
        self.tags[index.as_u32() as usize]
    }
}
