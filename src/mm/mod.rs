//! Memory management module
//!
//! Provides:
//! - Physical and virtual address types and the user address-space layout
//! - Page-table entries and typed permission bits
//! - Reference-counted physical frame allocation
//! - The page-mapper interface and its host implementation
//! - The mapping system calls (page alloc/map/unmap, kernel page, sbrk)
//!
//! # Security Principles
//! - All user addresses are bounds-checked against the ceiling
//! - Fresh pages are always zero-filled
//! - Unsafe code is not needed: frames are reached through the mapper

pub mod address;
pub mod frame;
pub mod mapper;
mod ops;
pub mod paging;

pub use address::{
    checked_page_round_up, PhysAddr, VirtAddr, ENTRIES_PER_TABLE, PAGE_MASK, PAGE_SHIFT,
    PAGE_SIZE, PT_SIZE, ULIM, UTOP,
};
pub use frame::{Frame, FrameAllocator};
pub use mapper::{AddressSpace, HostMemory, MemoryManager};
pub use paging::{MappingError, PageTableEntry, Perm};
