//! Handles and per-kind state for compartment-owned runtime objects.
//!
//! Polymorphism over object kinds is expressed with a kind discriminator and
//! typed handles rather than virtual dispatch; using a handle of the wrong
//! kind, or against the wrong compartment, is a bug and panics.

use crate::compile::WasmCode;
use crate::compartment::Compartment;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::sync::Arc;
use wasmcell_environ::{FunctionType, GlobalType, ObjectKind, ObjectType, TagType};

/// A process-unique identifier of a [`Compartment`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CompartmentId(NonZeroU64);

impl CompartmentId {
    /// Allocates a new unique ID.
    pub(crate) fn new() -> Self {
        // As an implementation note, ID 0 is skipped as it is reserved for
        // the niche of `Option<CompartmentId>`.
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CompartmentId(NonZeroU64::new(NEXT.fetch_add(1, SeqCst)).unwrap())
    }
}

/// An untyped reference to a compartment-owned object of one of the five
/// importable kinds.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ObjectRef {
    pub(crate) compartment: CompartmentId,
    pub(crate) kind: ObjectKind,
    pub(crate) index: u32,
}

impl ObjectRef {
    /// Returns the kind of the referenced object.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Returns the owning compartment's ID.
    pub fn compartment(&self) -> CompartmentId {
        self.compartment
    }
}

macro_rules! typed_ref {
    ($(#[$attr:meta])* $name:ident, $kind:ident) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
        pub struct $name(pub(crate) ObjectRef);

        impl $name {
            /// Downcasts an untyped reference, asserting its kind.
            pub fn from_object(object: ObjectRef) -> $name {
                assert_eq!(
                    object.kind,
                    ObjectKind::$kind,
                    "downcast of a {} reference to {}",
                    object.kind,
                    ObjectKind::$kind,
                );
                $name(object)
            }

            /// Returns the untyped form of this reference.
            pub fn as_object(&self) -> ObjectRef {
                self.0
            }

            /// Returns the owning compartment's ID.
            pub fn compartment(&self) -> CompartmentId {
                self.0.compartment
            }
        }

        impl From<$name> for ObjectRef {
            fn from(r: $name) -> ObjectRef {
                r.0
            }
        }
    };
}

typed_ref! {
    /// A reference to a function object.
    FuncRef, Function
}
typed_ref! {
    /// A reference to a table object.
    TableRef, Table
}
typed_ref! {
    /// A reference to a memory object.
    MemoryRef, Memory
}
typed_ref! {
    /// A reference to a global object.
    GlobalRef, Global
}
typed_ref! {
    /// A reference to an exception-tag object.
    TagRef, Tag
}

/// A reference to a module instance.
///
/// Instances are compartment-owned objects like the five importable kinds,
/// but they cannot themselves be imported or exported, so they sit outside
/// [`ObjectKind`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct InstanceRef {
    pub(crate) compartment: CompartmentId,
    pub(crate) index: u32,
}

impl InstanceRef {
    /// Returns the owning compartment's ID.
    pub fn compartment(&self) -> CompartmentId {
        self.compartment
    }
}

/// The value of an export passed from one instance to another, or supplied
/// by the host as an import.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Extern {
    /// A function.
    Func(FuncRef),
    /// A table.
    Table(TableRef),
    /// A linear memory.
    Memory(MemoryRef),
    /// A global.
    Global(GlobalRef),
    /// An exception tag.
    Tag(TagRef),
}

impl Extern {
    /// Returns the kind of the referenced object.
    pub fn kind(&self) -> ObjectKind {
        self.as_object().kind
    }

    /// Returns the untyped reference.
    pub fn as_object(&self) -> ObjectRef {
        match self {
            Extern::Func(f) => f.0,
            Extern::Table(t) => t.0,
            Extern::Memory(m) => m.0,
            Extern::Global(g) => g.0,
            Extern::Tag(t) => t.0,
        }
    }

    /// Returns the owning compartment's ID.
    pub fn compartment(&self) -> CompartmentId {
        self.as_object().compartment
    }

    /// Asserts this is a function and returns its reference.
    pub fn unwrap_func(&self) -> FuncRef {
        match self {
            Extern::Func(f) => *f,
            other => panic!("{} is not a function", other.kind()),
        }
    }

    /// Asserts this is a table and returns its reference.
    pub fn unwrap_table(&self) -> TableRef {
        match self {
            Extern::Table(t) => *t,
            other => panic!("{} is not a table", other.kind()),
        }
    }

    /// Asserts this is a memory and returns its reference.
    pub fn unwrap_memory(&self) -> MemoryRef {
        match self {
            Extern::Memory(m) => *m,
            other => panic!("{} is not a memory", other.kind()),
        }
    }

    /// Asserts this is a global and returns its reference.
    pub fn unwrap_global(&self) -> GlobalRef {
        match self {
            Extern::Global(g) => *g,
            other => panic!("{} is not a global", other.kind()),
        }
    }

    /// Asserts this is a tag and returns its reference.
    pub fn unwrap_tag(&self) -> TagRef {
        match self {
            Extern::Tag(t) => *t,
            other => panic!("{} is not a tag", other.kind()),
        }
    }

    /// Returns the type of the referenced object.
    pub fn ty(&self, compartment: &Compartment) -> ObjectType {
        compartment.extern_type(self)
    }
}

impl From<FuncRef> for Extern {
    fn from(f: FuncRef) -> Extern {
        Extern::Func(f)
    }
}

impl From<TableRef> for Extern {
    fn from(t: TableRef) -> Extern {
        Extern::Table(t)
    }
}

impl From<MemoryRef> for Extern {
    fn from(m: MemoryRef) -> Extern {
        Extern::Memory(m)
    }
}

impl From<GlobalRef> for Extern {
    fn from(g: GlobalRef) -> Extern {
        Extern::Global(g)
    }
}

impl From<TagRef> for Extern {
    fn from(t: TagRef) -> Extern {
        Extern::Tag(t)
    }
}

/// A reference to any compartment-owned object, as accepted by the root-set
/// registration methods.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Object {
    /// One of the five importable kinds.
    Extern(Extern),
    /// A module instance.
    Instance(InstanceRef),
}

impl Object {
    /// Returns the owning compartment's ID.
    pub fn compartment(&self) -> CompartmentId {
        match self {
            Object::Extern(e) => e.compartment(),
            Object::Instance(i) => i.compartment,
        }
    }
}

impl From<Extern> for Object {
    fn from(e: Extern) -> Object {
        Object::Extern(e)
    }
}

impl From<InstanceRef> for Object {
    fn from(i: InstanceRef) -> Object {
        Object::Instance(i)
    }
}

impl From<FuncRef> for Object {
    fn from(f: FuncRef) -> Object {
        Object::Extern(Extern::Func(f))
    }
}

impl From<TableRef> for Object {
    fn from(t: TableRef) -> Object {
        Object::Extern(Extern::Table(t))
    }
}

impl From<MemoryRef> for Object {
    fn from(m: MemoryRef) -> Object {
        Object::Extern(Extern::Memory(m))
    }
}

impl From<GlobalRef> for Object {
    fn from(g: GlobalRef) -> Object {
        Object::Extern(Extern::Global(g))
    }
}

impl From<TagRef> for Object {
    fn from(t: TagRef) -> Object {
        Object::Extern(Extern::Tag(t))
    }
}

/// A function object: an executable body, its interned type, and a
/// back-reference to the instance that defines it (which keeps the body's
/// environment alive).
pub struct Function {
    /// The function's interned type.
    pub ty: FunctionType,
    /// The executable body.
    pub code: Arc<dyn WasmCode>,
    /// The defining instance; `None` for host functions.
    pub instance: Option<InstanceRef>,
    /// An optional debug name.
    pub name: Option<String>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("ty", &self.ty)
            .field("instance", &self.instance)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A global object: a typed value plus its mutability.
#[derive(Debug)]
pub struct Global {
    /// The global's type.
    pub ty: GlobalType,
    /// The current value.
    pub value: crate::values::Value,
}

/// An exception-tag object.
#[derive(Debug)]
pub struct Tag {
    /// The tag's type.
    pub ty: TagType,
    /// An optional debug name.
    pub name: Option<String>,
}
