//! Low-level abstraction for allocating and managing zero-filled pages
//! of memory.

use anyhow::{Context, Result};
use more_asserts::assert_le;
use std::ptr;
use std::slice;

#[cfg(not(unix))]
compile_error!("the wasmcell virtual-memory layer currently supports unix hosts only");

/// Returns the host's page size in bytes, discovered once per process.
///
/// The page size is asserted to be a power of two; every address handed to
/// this module must be aligned to it.
pub fn page_size() -> usize {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let size = region::page::size();
        assert!(size.is_power_of_two(), "page size {} not a power of two", size);
    });
    region::page::size()
}

/// Rounds `size` up to the next multiple of the host page size.
pub fn round_up_to_page_size(size: usize) -> usize {
    round_up(size, page_size())
}

/// Memory protection applied to a range of pages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protection {
    /// Pages may not be accessed at all.
    None,
    /// Pages may be read.
    Read,
    /// Pages may be read and written.
    ReadWrite,
    /// Pages may be read and executed.
    ReadExecute,
    /// Pages may be read, written, and executed.
    ReadWriteExecute,
}

impl Protection {
    fn to_region(self) -> region::Protection {
        match self {
            Protection::None => region::Protection::NONE,
            Protection::Read => region::Protection::READ,
            Protection::ReadWrite => region::Protection::READ_WRITE,
            Protection::ReadExecute => region::Protection::READ_EXECUTE,
            Protection::ReadWriteExecute => region::Protection::READ_WRITE_EXECUTE,
        }
    }
}

/// A simple struct consisting of a page-aligned pointer to page-aligned
/// and initially-zeroed memory and a length.
#[derive(Debug)]
pub struct Mmap {
    // Note that this is stored as a `usize` instead of a `*const` or `*mut`
    // pointer to allow this structure to be natively `Send` and `Sync` without
    // `unsafe impl`. This type is sendable across threads and shareable since
    // the coordination all happens at the OS layer.
    ptr: usize,
    len: usize,
}

impl Mmap {
    /// Construct a new empty instance of `Mmap`.
    pub fn new() -> Self {
        // Rust's slices require non-null pointers, even when empty. `Vec`
        // contains code to create a non-null dangling pointer value when
        // constructed empty, so we reuse that here.
        let empty = Vec::<u8>::new();
        Self {
            ptr: empty.as_ptr() as usize,
            len: 0,
        }
    }

    /// Create a new `Mmap` pointing to at least `size` bytes of page-aligned
    /// accessible memory.
    pub fn with_at_least(size: usize) -> Result<Self> {
        let rounded_size = round_up(size, page_size());
        Self::accessible_reserved(rounded_size, rounded_size)
    }

    /// Create a new `Mmap` pointing to `accessible_size` bytes of page-aligned
    /// accessible memory, within a reserved mapping of `mapping_size` bytes.
    /// `accessible_size` and `mapping_size` must be native page-size multiples.
    pub fn accessible_reserved(accessible_size: usize, mapping_size: usize) -> Result<Self> {
        let page_size = page_size();
        assert_le!(accessible_size, mapping_size);
        assert_eq!(mapping_size & (page_size - 1), 0);
        assert_eq!(accessible_size & (page_size - 1), 0);

        // Mmap may return EINVAL if the size is zero, so just special-case
        // that.
        if mapping_size == 0 {
            return Ok(Self::new());
        }

        Ok(if accessible_size == mapping_size {
            // Allocate a single read-write region at once.
            let ptr = unsafe {
                rustix::mm::mmap_anonymous(
                    ptr::null_mut(),
                    mapping_size,
                    rustix::mm::ProtFlags::READ | rustix::mm::ProtFlags::WRITE,
                    rustix::mm::MapFlags::PRIVATE,
                )
                .context(format!("mmap failed to allocate {:#x} bytes", mapping_size))?
            };

            Self {
                ptr: ptr as usize,
                len: mapping_size,
            }
        } else {
            // Reserve the mapping size.
            let ptr = unsafe {
                rustix::mm::mmap_anonymous(
                    ptr::null_mut(),
                    mapping_size,
                    rustix::mm::ProtFlags::empty(),
                    rustix::mm::MapFlags::PRIVATE,
                )
                .context(format!("mmap failed to reserve {:#x} bytes", mapping_size))?
            };

            let mut result = Self {
                ptr: ptr as usize,
                len: mapping_size,
            };

            if accessible_size != 0 {
                // Commit the accessible size.
                result.make_accessible(0, accessible_size)?;
            }

            result
        })
    }

    /// Create a reservation of `size` bytes whose base address is a multiple
    /// of `align`, returning the mapping and the offset of the aligned base
    /// within it.
    ///
    /// When `align` exceeds the page size this over-reserves by `align`
    /// bytes, frees the probe, and re-reserves just the aligned interior.
    /// Another thread can win the race for the freed range, so the re-reserve
    /// is retried a bounded number of times; if every retry loses, the padded
    /// probe mapping is kept and the aligned base points into it.
    pub fn reserve_aligned(size: usize, align: usize) -> Result<(Self, usize)> {
        let page_size = page_size();
        assert!(align.is_power_of_two());
        assert_eq!(size & (page_size - 1), 0);

        if align <= page_size {
            return Ok((Self::accessible_reserved(0, size)?, 0));
        }

        const MAX_RETRIES: usize = 10;
        for _ in 0..MAX_RETRIES {
            let probe = Self::accessible_reserved(0, size + align)?;
            let aligned_start = round_up(probe.ptr, align);
            if aligned_start == probe.ptr {
                // The over-reservation happened to be aligned; trim nothing
                // and carry the padding.
                return Ok((probe, 0));
            }
            drop(probe);

            let ptr = unsafe {
                rustix::mm::mmap_anonymous(
                    aligned_start as *mut _,
                    size,
                    rustix::mm::ProtFlags::empty(),
                    rustix::mm::MapFlags::PRIVATE,
                )
                .context(format!("mmap failed to re-reserve {:#x} bytes", size))?
            };
            if ptr as usize == aligned_start {
                return Ok((
                    Self {
                        ptr: ptr as usize,
                        len: size,
                    },
                    0,
                ));
            }
            // Lost the race; the kernel placed us elsewhere. Give the range
            // back and try again.
            unsafe {
                rustix::mm::munmap(ptr, size).context("munmap failed")?;
            }
        }

        // Out of retries: keep the padded reservation and point at the
        // aligned interior.
        let probe = Self::accessible_reserved(0, size + align)?;
        let offset = round_up(probe.ptr, align) - probe.ptr;
        Ok((probe, offset))
    }

    /// Make the memory starting at `start` and extending for `len` bytes
    /// accessible. `start` and `len` must be native page-size multiples and
    /// describe a range within `self`'s reserved memory.
    pub fn make_accessible(&mut self, start: usize, len: usize) -> Result<()> {
        self.set_access(start, len, Protection::ReadWrite)
    }

    /// Change the protection of `len` bytes starting at `start`, both
    /// page-size multiples describing a range within the mapping.
    pub fn set_access(&mut self, start: usize, len: usize, protection: Protection) -> Result<()> {
        let page_size = page_size();
        assert_eq!(start & (page_size - 1), 0);
        assert_eq!(len & (page_size - 1), 0);
        assert_le!(len, self.len);
        assert_le!(start, self.len - len);

        let ptr = self.ptr as *const u8;
        unsafe {
            region::protect(ptr.add(start), len, protection.to_region())
                .context("mprotect failed")?;
        }

        Ok(())
    }

    /// Return `len` bytes starting at `start` to reserved-but-inaccessible
    /// state, releasing their backing. A later `make_accessible` of the same
    /// range yields fresh zero pages.
    ///
    /// Misaligned requests are a caller bug, not an environmental failure.
    pub fn decommit(&mut self, start: usize, len: usize) {
        let page_size = page_size();
        assert_eq!(start & (page_size - 1), 0, "decommit of unaligned address");
        assert_eq!(len & (page_size - 1), 0, "decommit of unaligned length");
        assert_le!(len, self.len);
        assert_le!(start, self.len - len);

        if len == 0 {
            return;
        }

        unsafe {
            let ptr = (self.ptr + start) as *mut libc::c_void;
            let rc = libc::madvise(ptr, len, libc::MADV_DONTNEED);
            assert_eq!(rc, 0, "madvise failed during decommit");
            region::protect(ptr as *const u8, len, region::Protection::NONE)
                .expect("mprotect failed during decommit");
        }
    }

    /// Return the allocated memory as a slice of u8.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }

    /// Return the allocated memory as a mutable slice of u8.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr as *mut u8, self.len) }
    }

    /// Return the allocated memory as a pointer to u8.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    /// Return the allocated memory as a mutable pointer to u8.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }

    /// Return the length of the allocated memory.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Return whether any memory has been allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        if self.len != 0 {
            unsafe { rustix::mm::munmap(self.ptr as *mut std::ffi::c_void, self.len) }
                .expect("munmap failed");
        }
    }
}

fn round_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).unwrap() & !(align - 1)
}

fn _assert() {
    fn _assert_send_sync<T: Send + Sync>() {}
    _assert_send_sync::<Mmap>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_pages_are_zeroed_and_writable() {
        let page = page_size();
        let mut mmap = Mmap::accessible_reserved(page, 4 * page).unwrap();
        assert!(mmap.as_slice()[..page].iter().all(|&b| b == 0));
        mmap.as_mut_slice()[0] = 0xaa;
        assert_eq!(mmap.as_slice()[0], 0xaa);
    }

    #[test]
    fn growth_commits_in_place() {
        let page = page_size();
        let mut mmap = Mmap::accessible_reserved(page, 4 * page).unwrap();
        let base = mmap.as_ptr();
        mmap.make_accessible(page, page).unwrap();
        assert_eq!(mmap.as_ptr(), base);
        assert!(mmap.as_slice()[page..2 * page].iter().all(|&b| b == 0));
    }

    #[test]
    fn decommitted_pages_read_back_zero_after_recommit() {
        let page = page_size();
        let mut mmap = Mmap::with_at_least(page).unwrap();
        mmap.as_mut_slice()[0] = 0x55;
        mmap.decommit(0, page);
        mmap.make_accessible(0, page).unwrap();
        assert_eq!(mmap.as_slice()[0], 0);
    }

    #[test]
    fn aligned_reservations_are_aligned() {
        let page = page_size();
        let align = 1 << 20;
        let (mmap, offset) = Mmap::reserve_aligned(4 * page, align).unwrap();
        assert_eq!((mmap.as_ptr() as usize + offset) % align, 0);
    }

    #[test]
    fn empty_mmap_is_inert() {
        let mmap = Mmap::new();
        assert!(mmap.is_empty());
        assert_eq!(mmap.as_slice().len(), 0);
    }
}
