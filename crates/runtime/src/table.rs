//! Memory management for tables.
//!
//! `Table` is to WebAssembly tables what `LinearMemory` is to WebAssembly
//! linear memories: a growable element vector bounded by its declared
//! maximum, holding nullable object references.

use crate::object::Extern;
use crate::traphandlers::Trap;
use std::sync::{Arc, RwLock};
use wasmcell_environ::{ObjectKind, ReferenceType, TableType, TrapCode};

#[derive(Debug)]
struct TableData {
    elements: Vec<Option<Extern>>,
    maximum: u64,
}

impl TableData {
    fn size(&self) -> u64 {
        self.elements.len() as u64
    }

    fn grow(&mut self, delta: u64) -> Option<u64> {
        let old_size = self.size();
        let new_size = old_size.checked_add(delta)?;
        if new_size > self.maximum {
            return None;
        }
        let new_len = usize::try_from(new_size).ok()?;
        self.elements.resize(new_len, None);
        Some(old_size)
    }
}

#[derive(Debug)]
enum TableVariant {
    Unshared(TableData),
    // Shared tables serialize growth and mutation behind a lock.
    Shared(Arc<RwLock<TableData>>),
}

/// A table instance.
#[derive(Debug)]
pub struct Table {
    ty: TableType,
    variant: TableVariant,
}

impl Table {
    /// Create a new table instance of the given type, sized to the type's
    /// minimum with every element null.
    pub fn new(ty: TableType) -> Self {
        let data = TableData {
            elements: vec![None; usize::try_from(ty.size.min).unwrap()],
            maximum: ty.size.max,
        };
        let variant = if ty.shared {
            TableVariant::Shared(Arc::new(RwLock::new(data)))
        } else {
            TableVariant::Unshared(data)
        };
        Self { ty, variant }
    }

    /// Returns the table's declared type.
    pub fn ty(&self) -> TableType {
        self.ty
    }

    /// Returns the number of allocated elements.
    pub fn size(&self) -> u64 {
        match &self.variant {
            TableVariant::Unshared(t) => t.size(),
            TableVariant::Shared(t) => t.read().unwrap().size(),
        }
    }

    /// Grow table by the specified amount of elements, filling with null.
    ///
    /// Returns `None` if the table can't be grown by the specified amount of
    /// elements; the size is unchanged in that case. On success the old size
    /// is returned.
    pub fn grow(&mut self, delta: u64) -> Option<u64> {
        match &mut self.variant {
            TableVariant::Unshared(t) => t.grow(delta),
            TableVariant::Shared(t) => t.write().unwrap().grow(delta),
        }
    }

    /// Get the element at `index`, trapping if the index is out of bounds.
    pub fn get(&self, index: u64) -> Result<Option<Extern>, Trap> {
        let index = usize::try_from(index).map_err(|_| Trap::wasm(TrapCode::TableOutOfBounds))?;
        match &self.variant {
            TableVariant::Unshared(t) => t.elements.get(index).copied(),
            TableVariant::Shared(t) => t.read().unwrap().elements.get(index).copied(),
        }
        .ok_or_else(|| Trap::wasm(TrapCode::TableOutOfBounds))
    }

    /// Set the element at `index`, trapping if the index is out of bounds.
    ///
    /// The element must fit the table's element type: `anyfunc` tables only
    /// hold functions; `anyref` tables hold any object kind.
    pub fn set(&mut self, index: u64, element: Option<Extern>) -> Result<(), Trap> {
        if let Some(element) = &element {
            let compatible = match self.ty.element_type {
                ReferenceType::AnyFunc => element.kind() == ObjectKind::Function,
                ReferenceType::AnyRef => true,
            };
            assert!(
                compatible,
                "a {} cannot be stored in a table of {}",
                element.kind(),
                self.ty.element_type,
            );
        }
        let index = usize::try_from(index).map_err(|_| Trap::wasm(TrapCode::TableOutOfBounds))?;
        match &mut self.variant {
            TableVariant::Unshared(t) => t.elements.get_mut(index).map(|slot| *slot = element),
            TableVariant::Shared(t) => t
                .write()
                .unwrap()
                .elements
                .get_mut(index)
                .map(|slot| *slot = element),
        }
        .ok_or_else(|| Trap::wasm(TrapCode::TableOutOfBounds))
    }

    /// Visits every non-null element, for reachability tracing.
    pub fn trace(&self, mut visit: impl FnMut(Extern)) {
        match &self.variant {
            TableVariant::Unshared(t) => {
                for element in t.elements.iter().flatten() {
                    visit(*element);
                }
            }
            TableVariant::Shared(t) => {
                for element in t.read().unwrap().elements.iter().flatten() {
                    visit(*element);
                }
            }
        }
    }
}
