//! Memory management for linear memories.
//!
//! A linear memory reserves its maximum footprint of address space up front
//! (bounded by the tunables) plus a trailing guard region, so growth commits
//! pages in place and the memory never moves; out-of-bounds accesses from
//! compiled code land in the guard and fault deterministically.

use crate::mmap::Mmap;
use crate::traphandlers::Trap;
use anyhow::{Context, Result};
use more_asserts::assert_le;
use std::sync::{Arc, RwLock};
use wasmcell_environ::{MemoryType, TrapCode, Tunables, WASM32_MAX_PAGES, WASM_PAGE_SIZE};

const WASM_PAGE_SIZE_U64: u64 = WASM_PAGE_SIZE as u64;

/// A linear memory instance backed by one immovable reservation.
#[derive(Debug)]
pub struct LinearMemory {
    // The underlying allocation, covering the page-bound reservation plus
    // the trailing guard.
    mmap: Mmap,

    // The current size, in wasm pages.
    size: u64,

    // The effective maximum, in wasm pages: the declared maximum clamped to
    // the reservation.
    maximum: u64,
}

impl LinearMemory {
    /// Create a new linear memory instance laid out according to `tunables`,
    /// with `ty.size.min` pages committed.
    pub fn new(ty: &MemoryType, tunables: &Tunables) -> Result<Self> {
        // Sanity-check what should already be true from wasm module
        // validation.
        assert_le!(ty.size.min, WASM32_MAX_PAGES);

        let bound_pages = tunables
            .static_memory_bound
            .max(ty.size.min)
            .min(WASM32_MAX_PAGES);
        let maximum = ty.size.max.min(bound_pages);

        let bound_bytes = usize::try_from(bound_pages * WASM_PAGE_SIZE_U64)
            .ok()
            .context("memory reservation exceeds addressable memory")?;
        let guard_bytes = usize::try_from(tunables.memory_guard_size)
            .ok()
            .context("guard region exceeds addressable memory")?;
        let request_bytes = bound_bytes
            .checked_add(guard_bytes)
            .context("cannot allocate memory with guard regions")?;

        let accessible = usize::try_from(ty.size.min * WASM_PAGE_SIZE_U64).unwrap();
        let mut mmap = Mmap::accessible_reserved(0, request_bytes)?;
        if accessible > 0 {
            mmap.make_accessible(0, accessible)?;
        }

        Ok(Self {
            mmap,
            size: ty.size.min,
            maximum,
        })
    }

    /// Returns the number of allocated wasm pages.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the maximum number of pages this memory can reach.
    pub fn maximum(&self) -> u64 {
        self.maximum
    }

    /// Grow memory by the specified amount of wasm pages.
    ///
    /// Returns `None` if memory can't be grown by the specified amount of
    /// pages; the size is unchanged in that case. On success the newly
    /// committed pages read as zero and the old size in pages is returned.
    pub fn grow(&mut self, delta: u64) -> Option<u64> {
        let old_size = self.size;

        // Wasm spec: growing by 0 pages is a way to read the current size.
        if delta == 0 {
            return Some(old_size);
        }

        let new_size = old_size.checked_add(delta)?;
        if new_size > self.maximum {
            return None;
        }

        let start = usize::try_from(old_size * WASM_PAGE_SIZE_U64).unwrap();
        let len = usize::try_from(delta * WASM_PAGE_SIZE_U64).unwrap();
        if let Err(e) = self.mmap.make_accessible(start, len) {
            // The reservation is there but the OS would not commit backing;
            // report the failed growth to the caller, not a fault.
            log::error!("failed to commit {} bytes of memory: {:#}", len, e);
            return None;
        }

        self.size = new_size;
        Some(old_size)
    }

    fn byte_size(&self) -> usize {
        usize::try_from(self.size * WASM_PAGE_SIZE_U64).unwrap()
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<usize, Trap> {
        let start = usize::try_from(offset).map_err(|_| Trap::wasm(TrapCode::MemoryOutOfBounds))?;
        let end = start
            .checked_add(len)
            .ok_or_else(|| Trap::wasm(TrapCode::MemoryOutOfBounds))?;
        if end > self.byte_size() {
            return Err(Trap::wasm(TrapCode::MemoryOutOfBounds));
        }
        Ok(start)
    }

    /// Reads `buf.len()` bytes starting at `offset`, trapping on an
    /// out-of-bounds range.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), Trap> {
        let start = self.check_range(offset, buf.len())?;
        buf.copy_from_slice(&self.mmap.as_slice()[start..start + buf.len()]);
        Ok(())
    }

    /// Writes `data` starting at `offset`, trapping on an out-of-bounds
    /// range.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), Trap> {
        let start = self.check_range(offset, data.len())?;
        self.mmap.as_mut_slice()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[derive(Debug)]
enum MemoryVariant {
    Unshared(LinearMemory),
    // Shared memories serialize growth behind a lock so the size observed by
    // concurrent readers is an atomic read-modify-write, per the threads
    // proposal.
    Shared(Arc<RwLock<LinearMemory>>),
}

/// Representation of a runtime wasm linear memory.
#[derive(Debug)]
pub struct Memory {
    ty: MemoryType,
    variant: MemoryVariant,
}

impl Memory {
    /// Create a new memory of the given type.
    pub fn new(ty: MemoryType, tunables: &Tunables) -> Result<Self> {
        let inner = LinearMemory::new(&ty, tunables)?;
        let variant = if ty.shared {
            MemoryVariant::Shared(Arc::new(RwLock::new(inner)))
        } else {
            MemoryVariant::Unshared(inner)
        };
        Ok(Memory { ty, variant })
    }

    /// Returns the memory's declared type.
    pub fn ty(&self) -> MemoryType {
        self.ty
    }

    /// Returns the current size in wasm pages.
    pub fn size(&self) -> u64 {
        match &self.variant {
            MemoryVariant::Unshared(m) => m.size(),
            MemoryVariant::Shared(m) => m.read().unwrap().size(),
        }
    }

    /// Grows the memory, returning the old size in pages, or `None` if the
    /// memory cannot grow by `delta` pages.
    pub fn grow(&mut self, delta: u64) -> Option<u64> {
        match &mut self.variant {
            MemoryVariant::Unshared(m) => m.grow(delta),
            MemoryVariant::Shared(m) => m.write().unwrap().grow(delta),
        }
    }

    /// Reads bytes at `offset`.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), Trap> {
        match &self.variant {
            MemoryVariant::Unshared(m) => m.read(offset, buf),
            MemoryVariant::Shared(m) => m.read().unwrap().read(offset, buf),
        }
    }

    /// Writes bytes at `offset`.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), Trap> {
        match &mut self.variant {
            MemoryVariant::Unshared(m) => m.write(offset, data),
            MemoryVariant::Shared(m) => m.write().unwrap().write(offset, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmcell_environ::SizeConstraints;

    fn memory(min: u64, max: u64) -> Memory {
        Memory::new(
            MemoryType {
                shared: false,
                size: SizeConstraints { min, max },
            },
            &Tunables::default(),
        )
        .unwrap()
    }

    #[test]
    fn initial_pages_are_committed_and_zero() {
        let mem = memory(1, 2);
        assert_eq!(mem.size(), 1);
        let mut buf = vec![0xff; WASM_PAGE_SIZE as usize];
        mem.read(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn growth_zero_fills_and_reports_old_size() {
        let mut mem = memory(1, 3);
        mem.write(0, &[0xaa]).unwrap();
        assert_eq!(mem.grow(2), Some(1));
        assert_eq!(mem.size(), 3);
        let mut buf = vec![0xff; 2 * WASM_PAGE_SIZE as usize];
        mem.read(WASM_PAGE_SIZE_U64, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        let mut first = [0u8; 1];
        mem.read(0, &mut first).unwrap();
        assert_eq!(first[0], 0xaa);
    }

    #[test]
    fn growth_past_the_maximum_fails_without_effect() {
        let mut mem = memory(1, 2);
        assert_eq!(mem.grow(2), None);
        assert_eq!(mem.size(), 1);
        assert_eq!(mem.grow(1), Some(1));
        assert_eq!(mem.grow(1), None);
    }

    #[test]
    fn out_of_bounds_accesses_trap() {
        let mut mem = memory(1, 2);
        let mut buf = [0u8; 4];
        assert!(mem.read(WASM_PAGE_SIZE_U64 - 3, &mut buf[..]).is_err());
        assert!(mem.write(WASM_PAGE_SIZE_U64 - 3, &[0; 5]).is_err());
        assert!(mem.write(WASM_PAGE_SIZE_U64 - 4, &[1, 2, 3, 4]).is_ok());
    }

    #[test]
    fn grow_by_zero_reads_the_size() {
        let mut mem = memory(1, 1);
        assert_eq!(mem.grow(0), Some(1));
        assert_eq!(mem.size(), 1);
    }
}
