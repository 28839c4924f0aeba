//! Tunable parameters for memory planning.

/// Knobs controlling how linear memories are laid out in address space.
#[derive(Clone, Debug)]
pub struct Tunables {
    /// The size, in wasm pages, of the address-space reservation backing each
    /// linear memory. Growth commits pages inside this reservation, so the
    /// memory never moves.
    pub static_memory_bound: u64,

    /// The size, in bytes, of the inaccessible guard region kept reserved
    /// past the end of each linear memory so out-of-bounds accesses from
    /// compiled code fault deterministically.
    pub memory_guard_size: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            // 64-bit hosts get a full 4 GiB reservation per 32-bit memory plus
            // a 2 GiB guard; 32-bit hosts can't afford either.
            #[cfg(target_pointer_width = "64")]
            static_memory_bound: 0x1_0000,
            #[cfg(target_pointer_width = "64")]
            memory_guard_size: 0x8000_0000,

            #[cfg(target_pointer_width = "32")]
            static_memory_bound: 0x4000,
            #[cfg(target_pointer_width = "32")]
            memory_guard_size: 0x1_0000,
        }
    }
}
