//! Compartments: isolation domains owning all runtime objects, with
//! reachability-based reclamation.
//!
//! Every runtime object is owned by exactly one compartment and addressed by
//! a handle carrying the compartment's ID; presenting a handle to a foreign
//! compartment panics, which is what keeps object graphs from spanning the
//! isolation boundary. Objects are only freed during an explicit
//! [`Compartment::collect_garbage`] pass.

use crate::compile::WasmCode;
use crate::instance::InstanceData;
use crate::memory::Memory;
use crate::object::{
    CompartmentId, Extern, FuncRef, Function, Global, GlobalRef, InstanceRef, MemoryRef, Object,
    ObjectRef, TableRef, Tag, TagRef,
};
use crate::table::Table;
use crate::traphandlers::Trap;
use crate::values::Value;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use wasmcell_environ::{
    FunctionType, GlobalType, MemoryType, Module, ObjectKind, ObjectType, TableType, TagType,
    Tunables,
};

/// The tri-color mark state of an object slot.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Color {
    White,
    Gray,
    Black,
}

#[derive(Debug)]
struct Slot<T> {
    color: Color,
    data: T,
}

/// A growable arena with stable indices and explicit removal.
#[derive(Debug)]
struct Arena<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    fn alloc(&mut self, data: T) -> u32 {
        let slot = Slot {
            color: Color::White,
            data,
        };
        match self.free.pop() {
            Some(index) => {
                debug_assert!(self.slots[index as usize].is_none());
                self.slots[index as usize] = Some(slot);
                index
            }
            None => {
                let index = u32::try_from(self.slots.len()).unwrap();
                self.slots.push(Some(slot));
                index
            }
        }
    }

    fn get(&self, index: u32) -> &T {
        &self.slots[index as usize]
            .as_ref()
            .expect("stale object reference")
            .data
    }

    fn get_mut(&mut self, index: u32) -> &mut T {
        &mut self.slots[index as usize]
            .as_mut()
            .expect("stale object reference")
            .data
    }

    fn remove(&mut self, index: u32) {
        let slot = self.slots[index as usize].take();
        debug_assert!(slot.is_some(), "double free of object slot");
        self.free.push(index);
    }

    fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn whiten(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.color = Color::White;
        }
    }

    fn color(&self, index: u32) -> Color {
        self.slots[index as usize]
            .as_ref()
            .expect("stale object reference")
            .color
    }

    fn set_color(&mut self, index: u32, color: Color) {
        self.slots[index as usize]
            .as_mut()
            .expect("stale object reference")
            .color = color;
    }

    /// Removes every non-black slot, returning how many were freed.
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for index in 0..self.slots.len() {
            if let Some(slot) = &self.slots[index] {
                if slot.color != Color::Black {
                    self.remove(index as u32);
                    freed += 1;
                }
            }
        }
        freed
    }
}

/// The kind+index form of an object reference, with the compartment implied.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
enum ObjId {
    Func(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
    Tag(u32),
    Instance(u32),
}

impl ObjId {
    fn of(obj: &Object) -> ObjId {
        match obj {
            Object::Extern(e) => ObjId::of_extern(e),
            Object::Instance(i) => ObjId::Instance(i.index),
        }
    }

    fn of_extern(ext: &Extern) -> ObjId {
        let r = ext.as_object();
        match r.kind {
            ObjectKind::Function => ObjId::Func(r.index),
            ObjectKind::Table => ObjId::Table(r.index),
            ObjectKind::Memory => ObjId::Memory(r.index),
            ObjectKind::Global => ObjId::Global(r.index),
            ObjectKind::Tag => ObjId::Tag(r.index),
            ObjectKind::Invalid => unreachable!("reference with invalid kind"),
        }
    }
}

/// A process-local isolation domain owning runtime objects.
pub struct Compartment {
    id: CompartmentId,
    tunables: Tunables,
    functions: Arena<Function>,
    tables: Arena<Table>,
    memories: Arena<Memory>,
    globals: Arena<Global>,
    tags: Arena<Tag>,
    instances: Arena<InstanceData>,
    // Rooted objects with pin counts; an object may be rooted more than once
    // (e.g. explicitly registered while also pinned by an in-flight call).
    roots: HashMap<ObjId, usize>,
}

impl Compartment {
    /// Creates an empty compartment with default tunables.
    pub fn new() -> Compartment {
        Compartment::with_tunables(Tunables::default())
    }

    /// Creates an empty compartment with the given memory-planning tunables.
    pub fn with_tunables(tunables: Tunables) -> Compartment {
        let id = CompartmentId::new();
        log::trace!("creating compartment {:?}", id);
        Compartment {
            id,
            tunables,
            functions: Arena::default(),
            tables: Arena::default(),
            memories: Arena::default(),
            globals: Arena::default(),
            tags: Arena::default(),
            instances: Arena::default(),
            roots: HashMap::new(),
        }
    }

    /// Returns this compartment's process-unique ID.
    pub fn id(&self) -> CompartmentId {
        self.id
    }

    /// Returns the memory-planning tunables of this compartment.
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    fn check_object(&self, r: ObjectRef) {
        assert_eq!(
            r.compartment, self.id,
            "object used with a compartment that does not own it"
        );
    }

    fn check_instance(&self, r: InstanceRef) {
        assert_eq!(
            r.compartment, self.id,
            "instance used with a compartment that does not own it"
        );
    }

    fn obj_ref(&self, kind: ObjectKind, index: u32) -> ObjectRef {
        ObjectRef {
            compartment: self.id,
            kind,
            index,
        }
    }

    /// Creates a function object.
    ///
    /// `instance` is the defining instance for wasm functions and `None` for
    /// host functions.
    pub fn create_function(
        &mut self,
        ty: FunctionType,
        code: Arc<dyn WasmCode>,
        instance: Option<InstanceRef>,
        name: Option<String>,
    ) -> FuncRef {
        if let Some(instance) = instance {
            self.check_instance(instance);
        }
        let index = self.functions.alloc(Function {
            ty,
            code,
            instance,
            name,
        });
        FuncRef(self.obj_ref(ObjectKind::Function, index))
    }

    /// Creates a table of the given type, sized to the type's minimum.
    pub fn create_table(&mut self, ty: TableType) -> TableRef {
        let index = self.tables.alloc(Table::new(ty));
        TableRef(self.obj_ref(ObjectKind::Table, index))
    }

    /// Creates a memory of the given type, with the type's minimum pages
    /// committed. Fails if the reservation or commit fails.
    pub fn create_memory(&mut self, ty: MemoryType) -> Result<MemoryRef> {
        let memory = Memory::new(ty, &self.tunables)?;
        let index = self.memories.alloc(memory);
        Ok(MemoryRef(self.obj_ref(ObjectKind::Memory, index)))
    }

    /// Creates a global of the given type holding `value`.
    pub fn create_global(&mut self, ty: GlobalType, value: Value) -> Result<GlobalRef> {
        if !value.fits(ty.value_type) {
            bail!(
                "global of type {} cannot hold a value of type {}",
                ty,
                value.ty()
            );
        }
        let index = self.globals.alloc(Global { ty, value });
        Ok(GlobalRef(self.obj_ref(ObjectKind::Global, index)))
    }

    /// Creates an exception tag of the given type.
    pub fn create_tag(&mut self, ty: TagType, name: Option<String>) -> TagRef {
        let index = self.tags.alloc(Tag { ty, name });
        TagRef(self.obj_ref(ObjectKind::Tag, index))
    }

    /// Creates an empty instance for `module`; instantiation fills in its
    /// vectors via [`Compartment::instance_mut`].
    pub fn reserve_instance(&mut self, name: Option<String>, module: Arc<Module>) -> InstanceRef {
        let index = self.instances.alloc(InstanceData::new(name, module));
        InstanceRef {
            compartment: self.id,
            index,
        }
    }

    /// Returns the function object behind a reference.
    pub fn function(&self, r: FuncRef) -> &Function {
        self.check_object(r.0);
        self.functions.get(r.0.index)
    }

    /// Returns the table object behind a reference.
    pub fn table(&self, r: TableRef) -> &Table {
        self.check_object(r.0);
        self.tables.get(r.0.index)
    }

    /// Returns the table object behind a reference, mutably.
    pub fn table_mut(&mut self, r: TableRef) -> &mut Table {
        self.check_object(r.0);
        self.tables.get_mut(r.0.index)
    }

    /// Returns the memory object behind a reference.
    pub fn memory(&self, r: MemoryRef) -> &Memory {
        self.check_object(r.0);
        self.memories.get(r.0.index)
    }

    /// Returns the memory object behind a reference, mutably.
    pub fn memory_mut(&mut self, r: MemoryRef) -> &mut Memory {
        self.check_object(r.0);
        self.memories.get_mut(r.0.index)
    }

    /// Returns the current value of a global.
    pub fn global_get(&self, r: GlobalRef) -> Value {
        self.check_object(r.0);
        self.globals.get(r.0.index).value
    }

    /// Returns the type of a global.
    pub fn global_type(&self, r: GlobalRef) -> GlobalType {
        self.check_object(r.0);
        self.globals.get(r.0.index).ty
    }

    /// Assigns a mutable global, checking mutability and the value's type.
    pub fn global_set(&mut self, r: GlobalRef, value: Value) -> Result<()> {
        self.check_object(r.0);
        let global = self.globals.get_mut(r.0.index);
        if !global.ty.mutable {
            bail!("immutable global cannot be assigned");
        }
        if !value.fits(global.ty.value_type) {
            bail!(
                "global of type {} cannot hold a value of type {}",
                global.ty,
                value.ty()
            );
        }
        global.value = value;
        Ok(())
    }

    /// Assigns a global without the mutability check, for initializer
    /// evaluation during instantiation.
    pub fn global_init(&mut self, r: GlobalRef, value: Value) {
        self.check_object(r.0);
        let global = self.globals.get_mut(r.0.index);
        debug_assert!(value.fits(global.ty.value_type));
        global.value = value;
    }

    /// Returns the tag object behind a reference.
    pub fn tag(&self, r: TagRef) -> &Tag {
        self.check_object(r.0);
        self.tags.get(r.0.index)
    }

    /// Returns the instance data behind a reference.
    pub fn instance(&self, r: InstanceRef) -> &InstanceData {
        self.check_instance(r);
        self.instances.get(r.index)
    }

    /// Returns the instance data behind a reference, mutably.
    pub fn instance_mut(&mut self, r: InstanceRef) -> &mut InstanceData {
        self.check_instance(r);
        self.instances.get_mut(r.index)
    }

    /// Looks up an export of an instance by name.
    pub fn instance_export(&self, r: InstanceRef, field: &str) -> Option<Extern> {
        self.instance(r).lookup(field)
    }

    /// Returns the type of the object behind an extern reference.
    pub fn extern_type(&self, ext: &Extern) -> ObjectType {
        match ext {
            Extern::Func(f) => ObjectType::Function(self.function(*f).ty),
            Extern::Table(t) => ObjectType::Table(self.table(*t).ty()),
            Extern::Memory(m) => ObjectType::Memory(self.memory(*m).ty()),
            Extern::Global(g) => ObjectType::Global(self.global_type(*g)),
            Extern::Tag(t) => ObjectType::Tag(self.tag(*t).ty),
        }
    }

    /// Invokes a function with no signal guards installed.
    ///
    /// This is the raw call path used by executing code that is already
    /// running under the guards; hosts enter through the guarded wrapper in
    /// the API layer instead.
    pub fn call(
        &mut self,
        f: FuncRef,
        args: &[Value],
        results: &mut Vec<Value>,
    ) -> Result<(), Trap> {
        self.check_object(f.0);
        let (code, instance) = {
            let func = self.functions.get(f.0.index);
            (func.code.clone(), func.instance)
        };
        code.invoke(self, instance, args, results)
    }

    /// Registers an object in the root set, keeping it (and everything it
    /// references) alive across garbage collection. Roots are counted, so
    /// each `add_root` needs a matching `remove_root`.
    pub fn add_root(&mut self, obj: impl Into<Object>) {
        let obj = obj.into();
        assert_eq!(
            obj.compartment(),
            self.id,
            "object rooted in a compartment that does not own it"
        );
        *self.roots.entry(ObjId::of(&obj)).or_insert(0) += 1;
    }

    /// Removes one root registration of an object.
    pub fn remove_root(&mut self, obj: impl Into<Object>) {
        let obj = obj.into();
        assert_eq!(obj.compartment(), self.id);
        let id = ObjId::of(&obj);
        let count = self
            .roots
            .get_mut(&id)
            .expect("unbalanced root removal");
        *count -= 1;
        if *count == 0 {
            self.roots.remove(&id);
        }
    }

    /// Returns the number of live objects of all kinds, instances included.
    pub fn live_object_count(&self) -> usize {
        self.functions.live_count()
            + self.tables.live_count()
            + self.memories.live_count()
            + self.globals.live_count()
            + self.tags.live_count()
            + self.instances.live_count()
    }

    /// Discards an object that was allocated but never published: not
    /// rooted, not reachable, and not handed to anyone. Instantiation uses
    /// this to unwind partial allocations.
    pub fn discard(&mut self, obj: impl Into<Object>) {
        let obj = obj.into();
        assert_eq!(obj.compartment(), self.id);
        let id = ObjId::of(&obj);
        debug_assert!(!self.roots.contains_key(&id), "discard of a rooted object");
        match id {
            ObjId::Func(i) => self.functions.remove(i),
            ObjId::Table(i) => self.tables.remove(i),
            ObjId::Memory(i) => self.memories.remove(i),
            ObjId::Global(i) => self.globals.remove(i),
            ObjId::Tag(i) => self.tags.remove(i),
            ObjId::Instance(i) => self.instances.remove(i),
        }
    }

    fn color_of(&self, id: ObjId) -> Color {
        match id {
            ObjId::Func(i) => self.functions.color(i),
            ObjId::Table(i) => self.tables.color(i),
            ObjId::Memory(i) => self.memories.color(i),
            ObjId::Global(i) => self.globals.color(i),
            ObjId::Tag(i) => self.tags.color(i),
            ObjId::Instance(i) => self.instances.color(i),
        }
    }

    fn set_color_of(&mut self, id: ObjId, color: Color) {
        match id {
            ObjId::Func(i) => self.functions.set_color(i, color),
            ObjId::Table(i) => self.tables.set_color(i, color),
            ObjId::Memory(i) => self.memories.set_color(i, color),
            ObjId::Global(i) => self.globals.set_color(i, color),
            ObjId::Tag(i) => self.tags.set_color(i, color),
            ObjId::Instance(i) => self.instances.set_color(i, color),
        }
    }

    fn trace(&self, id: ObjId, worklist: &mut Vec<ObjId>) {
        let visit_extern = |ext: Extern, worklist: &mut Vec<ObjId>| {
            worklist.push(ObjId::of_extern(&ext));
        };
        match id {
            ObjId::Func(i) => {
                if let Some(instance) = self.functions.get(i).instance {
                    worklist.push(ObjId::Instance(instance.index));
                }
            }
            ObjId::Table(i) => {
                self.tables.get(i).trace(|ext| {
                    worklist.push(ObjId::of_extern(&ext));
                });
            }
            ObjId::Memory(_) | ObjId::Tag(_) => {}
            ObjId::Global(i) => match self.globals.get(i).value {
                Value::FuncRef(Some(f)) => visit_extern(Extern::Func(f), worklist),
                Value::AnyRef(Some(r)) => worklist.push(match r.kind {
                    ObjectKind::Function => ObjId::Func(r.index),
                    ObjectKind::Table => ObjId::Table(r.index),
                    ObjectKind::Memory => ObjId::Memory(r.index),
                    ObjectKind::Global => ObjId::Global(r.index),
                    ObjectKind::Tag => ObjId::Tag(r.index),
                    ObjectKind::Invalid => unreachable!(),
                }),
                _ => {}
            },
            ObjId::Instance(i) => {
                let instance = self.instances.get(i);
                for f in &instance.functions {
                    worklist.push(ObjId::Func(f.0.index));
                }
                for t in &instance.tables {
                    worklist.push(ObjId::Table(t.0.index));
                }
                for m in &instance.memories {
                    worklist.push(ObjId::Memory(m.0.index));
                }
                for g in &instance.globals {
                    worklist.push(ObjId::Global(g.0.index));
                }
                for t in &instance.tags {
                    worklist.push(ObjId::Tag(t.0.index));
                }
                for ext in instance.exports.values() {
                    visit_extern(*ext, worklist);
                }
            }
        }
    }

    /// Performs a stop-the-world tri-color collection of this compartment,
    /// freeing every object unreachable from the root set. Returns the
    /// number of objects freed.
    ///
    /// Unreachable objects are swept in dependency order: instances first,
    /// then tables, memories and globals, then tags, then functions.
    pub fn collect_garbage(&mut self) -> usize {
        self.functions.whiten();
        self.tables.whiten();
        self.memories.whiten();
        self.globals.whiten();
        self.tags.whiten();
        self.instances.whiten();

        let mut worklist: Vec<ObjId> = self.roots.keys().copied().collect();
        for &id in &worklist {
            self.set_color_of(id, Color::Gray);
        }
        while let Some(id) = worklist.pop() {
            if self.color_of(id) == Color::Black {
                continue;
            }
            self.set_color_of(id, Color::Black);
            let mut edges = Vec::new();
            self.trace(id, &mut edges);
            for edge in edges {
                if self.color_of(edge) == Color::White {
                    self.set_color_of(edge, Color::Gray);
                    worklist.push(edge);
                }
            }
        }

        let mut freed = 0;
        freed += self.instances.sweep();
        freed += self.tables.sweep();
        freed += self.memories.sweep();
        freed += self.globals.sweep();
        freed += self.tags.sweep();
        freed += self.functions.sweep();
        log::debug!(
            "collected {:?}: freed {} objects, {} live",
            self.id,
            freed,
            self.live_object_count()
        );
        freed
    }
}

impl Default for Compartment {
    fn default() -> Compartment {
        Compartment::new()
    }
}

impl Drop for Compartment {
    fn drop(&mut self) {
        log::trace!("destroying compartment {:?}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmcell_environ::{ReferenceType, SizeConstraints, TypeTuple, ValueType};

    fn table_type() -> TableType {
        TableType {
            element_type: ReferenceType::AnyFunc,
            shared: false,
            size: SizeConstraints { min: 1, max: 1 },
        }
    }

    #[test]
    fn unreachable_objects_are_collected() {
        let mut c = Compartment::new();
        let t = c.create_table(table_type());
        assert_eq!(c.live_object_count(), 1);
        assert_eq!(c.collect_garbage(), 1);
        assert_eq!(c.live_object_count(), 0);
        let _ = t; // the handle is now stale
    }

    #[test]
    fn rooted_objects_survive() {
        let mut c = Compartment::new();
        let t = c.create_table(table_type());
        c.add_root(t);
        assert_eq!(c.collect_garbage(), 0);
        c.remove_root(t);
        assert_eq!(c.collect_garbage(), 1);
    }

    #[test]
    fn collection_is_idempotent_when_quiescent() {
        let mut c = Compartment::new();
        let t = c.create_table(table_type());
        c.add_root(t);
        let _ = c.create_table(table_type());
        assert_eq!(c.collect_garbage(), 1);
        assert_eq!(c.collect_garbage(), 0);
        assert_eq!(c.collect_garbage(), 0);
    }

    #[test]
    fn globals_keep_their_referents_alive() {
        let mut c = Compartment::new();
        let ty = FunctionType::empty();
        let code = Arc::new(crate::compile::HostCode::new(
            |_: &mut Compartment, _: &[Value], _: &mut Vec<Value>| -> Result<(), Trap> { Ok(()) },
        ));
        let f = c.create_function(ty, code, None, None);
        let g = c
            .create_global(
                GlobalType {
                    value_type: ValueType::AnyFunc,
                    mutable: false,
                },
                Value::FuncRef(Some(f)),
            )
            .unwrap();
        c.add_root(g);
        assert_eq!(c.collect_garbage(), 0);
        assert_eq!(c.live_object_count(), 2);
    }

    #[test]
    #[should_panic(expected = "does not own it")]
    fn foreign_handles_are_rejected() {
        let mut a = Compartment::new();
        let b = Compartment::new();
        let t = a.create_table(table_type());
        let _ = b.table(t);
    }

    #[test]
    fn tag_types_are_interned_per_compartment_object() {
        let mut c = Compartment::new();
        let ty = TagType {
            params: TypeTuple::new([ValueType::I32]),
        };
        let t = c.create_tag(ty, Some("err".to_string()));
        assert_eq!(c.tag(t).ty, ty);
        assert_eq!(c.tag(t).name.as_deref(), Some("err"));
    }
}
