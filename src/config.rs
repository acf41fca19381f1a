//! Compile-time layout constants, grounded on `NoAxiom/kernel/src/config/mm.rs`.

/// guest pages are 4 KiB, per spec.md §3 "Virtual memory"
pub const PAGE_WIDTH: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_WIDTH;
pub const PAGE_MASK: u32 = (PAGE_SIZE as u32) - 1;

/// guest address space is 32-bit (spec.md §3, §6)
pub const VA_WIDTH: usize = 32;

pub const USER_STACK_SIZE: usize = 8 * 1024 * 1024;
pub const USER_HEAP_SIZE_INIT: usize = 64 * PAGE_SIZE;

/// default high base for the interpreter / dynamic linker (spec.md §6)
pub const INTERP_BASE: u32 = 0x7000_0000;

/// default anonymous-mmap search base, used when a hint is unavailable
/// or already taken (spec.md §4.4 "Memory map")
pub const MMAP_BASE: u32 = 0x6000_0000;

pub const AT_RANDOM_BYTES: usize = 16;

pub const INIT_PROCESS_ID: u32 = 1;
