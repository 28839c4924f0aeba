//! Data structures for representing validated wasm modules.

use crate::operators::FunctionBody;
use crate::registry::FunctionType;
use crate::types::{GlobalType, MemoryType, ObjectType, TableType, TagType, ValueType};
use cranelift_entity::{entity_impl, EntityRef, PrimaryMap};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Index type of a function (imported or defined) inside the module.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct FuncIndex(u32);
entity_impl!(FuncIndex);

/// Index type of a defined function inside the module.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct DefinedFuncIndex(u32);
entity_impl!(DefinedFuncIndex);

/// Index type of a table (imported or defined) inside the module.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TableIndex(u32);
entity_impl!(TableIndex);

/// Index type of a linear memory (imported or defined) inside the module.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MemoryIndex(u32);
entity_impl!(MemoryIndex);

/// Index type of a global variable (imported or defined) inside the module.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct GlobalIndex(u32);
entity_impl!(GlobalIndex);

/// Index type of an exception tag (imported or defined) inside the module.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TagIndex(u32);
entity_impl!(TagIndex);

/// Index type of a declared signature inside the module.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SignatureIndex(u32);
entity_impl!(SignatureIndex);

/// An index of an entity of any kind, as used by imports and exports.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum EntityIndex {
    /// Function index.
    Function(FuncIndex),
    /// Table index.
    Table(TableIndex),
    /// Memory index.
    Memory(MemoryIndex),
    /// Global index.
    Global(GlobalIndex),
    /// Tag index.
    Tag(TagIndex),
}

/// An import record: the two-level name and the entity it binds.
#[derive(Clone, Debug)]
pub struct Import {
    /// The name of the module being imported from.
    pub module: String,
    /// The name of the export within that module.
    pub field: String,
    /// The entity this import binds inside the importing module.
    pub entity: EntityIndex,
}

/// The initializer expression of a defined global.
///
/// The supported alphabet is constants and reads of imported immutable
/// globals; module validation rules out anything else before the core sees
/// the module.
#[derive(Copy, Clone, Debug)]
pub enum GlobalInit {
    /// An `i32.const`.
    I32Const(i32),
    /// An `i64.const`.
    I64Const(i64),
    /// An `f32.const`, as raw bits.
    F32Const(u32),
    /// An `f64.const`, as raw bits.
    F64Const(u64),
    /// A `v128.const`.
    V128Const(u128),
    /// A `ref.null`.
    RefNullConst,
    /// A `global.get` of an imported immutable global.
    GetGlobal(GlobalIndex),
    /// The value comes from the import this global binds.
    Import,
}

/// A defined or imported global: its type plus its initializer.
#[derive(Copy, Clone, Debug)]
pub struct GlobalDecl {
    /// The global's type.
    pub ty: GlobalType,
    /// How the global's initial value is produced.
    pub initializer: GlobalInit,
}

/// An active table-element segment.
#[derive(Clone, Debug)]
pub struct TableElements {
    /// The index of the table to initialize.
    pub table_index: TableIndex,
    /// Optionally, an imported immutable global giving a base index.
    pub base: Option<GlobalIndex>,
    /// The constant offset added to the base.
    pub offset: u64,
    /// The functions to write into the table, as indices into the function
    /// index space.
    pub elements: Box<[FuncIndex]>,
}

/// An active data segment.
#[derive(Clone, Debug)]
pub struct DataInitializer {
    /// The index of the memory to initialize.
    pub memory_index: MemoryIndex,
    /// Optionally, an imported immutable global giving a base address.
    pub base: Option<GlobalIndex>,
    /// The constant offset added to the base.
    pub offset: u64,
    /// The bytes to copy into the memory.
    pub data: Box<[u8]>,
}

/// A validated WebAssembly module: types, imports, definitions, exports,
/// element and data segments, and an optional start function.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// The name of this wasm module, if any.
    pub name: Option<String>,

    /// All import records, in the order they are declared in the module.
    pub imports: Vec<Import>,

    /// Exported entities, in declaration order.
    pub exports: IndexMap<String, EntityIndex>,

    /// The module "start" function, if present.
    pub start_func: Option<FuncIndex>,

    /// Declared signatures, already interned.
    pub signatures: PrimaryMap<SignatureIndex, FunctionType>,

    /// Signatures of functions, imported and defined.
    pub functions: PrimaryMap<FuncIndex, SignatureIndex>,

    /// Types of tables, imported and defined.
    pub tables: PrimaryMap<TableIndex, TableType>,

    /// Types of linear memories, imported and defined.
    pub memories: PrimaryMap<MemoryIndex, MemoryType>,

    /// Declarations of globals, imported and defined.
    pub globals: PrimaryMap<GlobalIndex, GlobalDecl>,

    /// Types of exception tags, imported and defined.
    pub tags: PrimaryMap<TagIndex, TagType>,

    /// Number of imported functions in the module.
    pub num_imported_funcs: usize,

    /// Number of imported tables in the module.
    pub num_imported_tables: usize,

    /// Number of imported memories in the module.
    pub num_imported_memories: usize,

    /// Number of imported globals in the module.
    pub num_imported_globals: usize,

    /// Number of imported tags in the module.
    pub num_imported_tags: usize,

    /// Active table-element segments, in declaration order.
    pub table_elements: Vec<TableElements>,

    /// Active data segments, in declaration order.
    pub data_initializers: Vec<DataInitializer>,

    /// Bodies of defined functions.
    pub code: PrimaryMap<DefinedFuncIndex, FunctionBody>,

    /// Debug names of functions.
    pub func_names: HashMap<FuncIndex, String>,
}

impl Module {
    /// Allocates the module data structures.
    pub fn new() -> Self {
        Module::default()
    }

    /// Declares a signature, returning its index.
    pub fn declare_signature(&mut self, ty: FunctionType) -> SignatureIndex {
        self.signatures.push(ty)
    }

    /// Declares a function import with the given signature.
    pub fn declare_func_import(
        &mut self,
        sig: SignatureIndex,
        module: &str,
        field: &str,
    ) -> FuncIndex {
        debug_assert_eq!(
            self.functions.len(),
            self.num_imported_funcs,
            "all imports must be declared before defined functions"
        );
        let index = self.functions.push(sig);
        self.imports.push(Import {
            module: module.to_string(),
            field: field.to_string(),
            entity: EntityIndex::Function(index),
        });
        self.num_imported_funcs += 1;
        index
    }

    /// Declares a table import with the given type.
    pub fn declare_table_import(&mut self, ty: TableType, module: &str, field: &str) -> TableIndex {
        debug_assert_eq!(self.tables.len(), self.num_imported_tables);
        let index = self.tables.push(ty);
        self.imports.push(Import {
            module: module.to_string(),
            field: field.to_string(),
            entity: EntityIndex::Table(index),
        });
        self.num_imported_tables += 1;
        index
    }

    /// Declares a memory import with the given type.
    pub fn declare_memory_import(
        &mut self,
        ty: MemoryType,
        module: &str,
        field: &str,
    ) -> MemoryIndex {
        debug_assert_eq!(self.memories.len(), self.num_imported_memories);
        let index = self.memories.push(ty);
        self.imports.push(Import {
            module: module.to_string(),
            field: field.to_string(),
            entity: EntityIndex::Memory(index),
        });
        self.num_imported_memories += 1;
        index
    }

    /// Declares a global import with the given type.
    pub fn declare_global_import(
        &mut self,
        ty: GlobalType,
        module: &str,
        field: &str,
    ) -> GlobalIndex {
        debug_assert_eq!(self.globals.len(), self.num_imported_globals);
        let index = self.globals.push(GlobalDecl {
            ty,
            initializer: GlobalInit::Import,
        });
        self.imports.push(Import {
            module: module.to_string(),
            field: field.to_string(),
            entity: EntityIndex::Global(index),
        });
        self.num_imported_globals += 1;
        index
    }

    /// Declares a tag import with the given type.
    pub fn declare_tag_import(&mut self, ty: TagType, module: &str, field: &str) -> TagIndex {
        debug_assert_eq!(self.tags.len(), self.num_imported_tags);
        let index = self.tags.push(ty);
        self.imports.push(Import {
            module: module.to_string(),
            field: field.to_string(),
            entity: EntityIndex::Tag(index),
        });
        self.num_imported_tags += 1;
        index
    }

    /// Declares a defined function with the given signature and body.
    pub fn declare_func(&mut self, sig: SignatureIndex, body: FunctionBody) -> FuncIndex {
        let index = self.functions.push(sig);
        self.code.push(body);
        index
    }

    /// Declares a defined table.
    pub fn declare_table(&mut self, ty: TableType) -> TableIndex {
        self.tables.push(ty)
    }

    /// Declares a defined memory.
    pub fn declare_memory(&mut self, ty: MemoryType) -> MemoryIndex {
        self.memories.push(ty)
    }

    /// Declares a defined global.
    pub fn declare_global(&mut self, ty: GlobalType, initializer: GlobalInit) -> GlobalIndex {
        debug_assert!(!matches!(initializer, GlobalInit::Import));
        self.globals.push(GlobalDecl { ty, initializer })
    }

    /// Declares a defined tag.
    pub fn declare_tag(&mut self, ty: TagType) -> TagIndex {
        self.tags.push(ty)
    }

    /// Declares an export of the given entity.
    pub fn declare_export(&mut self, name: &str, entity: EntityIndex) {
        self.exports.insert(name.to_string(), entity);
    }

    /// Declares the start function.
    pub fn declare_start_func(&mut self, func: FuncIndex) {
        debug_assert!(self.start_func.is_none());
        self.start_func = Some(func);
    }

    /// Assigns a debug name to a function.
    pub fn declare_func_name(&mut self, func: FuncIndex, name: &str) {
        self.func_names.insert(func, name.to_string());
    }

    /// Convert a `DefinedFuncIndex` into a `FuncIndex`.
    pub fn func_index(&self, defined_func: DefinedFuncIndex) -> FuncIndex {
        FuncIndex::new(self.num_imported_funcs + defined_func.index())
    }

    /// Convert a `FuncIndex` into a `DefinedFuncIndex`. Returns None if the
    /// index is an imported function.
    pub fn defined_func_index(&self, func: FuncIndex) -> Option<DefinedFuncIndex> {
        if func.index() < self.num_imported_funcs {
            None
        } else {
            Some(DefinedFuncIndex::new(
                func.index() - self.num_imported_funcs,
            ))
        }
    }

    /// Test whether the given function index is for an imported function.
    pub fn is_imported_function(&self, index: FuncIndex) -> bool {
        index.index() < self.num_imported_funcs
    }

    /// Returns the interned signature of the given function.
    pub fn func_type(&self, index: FuncIndex) -> FunctionType {
        self.signatures[self.functions[index]]
    }

    /// Returns the extern type of the given entity.
    pub fn entity_type(&self, entity: EntityIndex) -> ObjectType {
        match entity {
            EntityIndex::Function(i) => ObjectType::Function(self.func_type(i)),
            EntityIndex::Table(i) => ObjectType::Table(self.tables[i]),
            EntityIndex::Memory(i) => ObjectType::Memory(self.memories[i]),
            EntityIndex::Global(i) => ObjectType::Global(self.globals[i].ty),
            EntityIndex::Tag(i) => ObjectType::Tag(self.tags[i]),
        }
    }

    /// Returns the type of the value a global initializer produces, or
    /// `None` for initializers satisfied by an import.
    pub fn global_init_type(&self, init: &GlobalInit) -> Option<ValueType> {
        match init {
            GlobalInit::I32Const(_) => Some(ValueType::I32),
            GlobalInit::I64Const(_) => Some(ValueType::I64),
            GlobalInit::F32Const(_) => Some(ValueType::F32),
            GlobalInit::F64Const(_) => Some(ValueType::F64),
            GlobalInit::V128Const(_) => Some(ValueType::V128),
            GlobalInit::RefNullConst => Some(ValueType::NullRef),
            GlobalInit::GetGlobal(g) => Some(self.globals[*g].ty.value_type),
            GlobalInit::Import => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeTuple;
    use crate::types::SizeConstraints;
    use crate::types::ValueType::I32;

    #[test]
    fn defined_and_imported_index_spaces() {
        let mut module = Module::new();
        let sig =
            module.declare_signature(FunctionType::new(TypeTuple::new([I32]), TypeTuple::empty()));
        let imported = module.declare_func_import(sig, "env", "f");
        let defined = module.declare_func(sig, FunctionBody::default());

        assert!(module.is_imported_function(imported));
        assert!(!module.is_imported_function(defined));
        assert_eq!(module.defined_func_index(imported), None);
        let def = module.defined_func_index(defined).unwrap();
        assert_eq!(module.func_index(def), defined);
    }

    #[test]
    fn entity_types_follow_declarations() {
        let mut module = Module::new();
        let ty = MemoryType {
            shared: false,
            size: SizeConstraints { min: 1, max: 2 },
        };
        let index = module.declare_memory(ty);
        assert_eq!(
            module.entity_type(EntityIndex::Memory(index)),
            ObjectType::Memory(ty)
        );
    }
}
