//! Physical and Virtual Address Types
//!
//! Type-safe wrappers for memory addresses that prevent mixing
//! physical and virtual addresses at compile time.
//!
//! # User Address-Space Layout
//! ```text
//!   ULIM  0xEF80_0000 ┬──────────────────────────────┐
//!                     │ kernel-shared, user readable │
//!   UTOP  0xEEC0_0000 ┼──────────────────────────────┤  <- ceiling
//!                     │ user-controlled mappings     │
//!                     │   heap grows up from         │
//!                     │   its base toward UTOP       │
//!      0  0x0000_0000 ┴──────────────────────────────┘
//! ```
//!
//! # Security Properties
//! - Physical addresses cannot be dereferenced directly
//! - Every user-supplied virtual address is checked against `UTOP`
//!   before it reaches a page table

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: usize = 4096;
/// Page size mask
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
/// Bits to shift for page number
pub const PAGE_SHIFT: usize = 12;

/// Number of entries per page table (1024 for two-level 32-bit paging)
pub const ENTRIES_PER_TABLE: usize = 1024;
/// Bytes mapped by one page table
pub const PT_SIZE: usize = PAGE_SIZE * ENTRIES_PER_TABLE;
/// Bits to shift for the page directory index
pub const PD_SHIFT: usize = 22;

/// Top of user-controlled memory. Every address a caller asks the kernel to
/// map, unmap or grow into must lie below this ceiling.
pub const UTOP: usize = 0xEEC0_0000;

/// Top of user-readable memory. Ranges handed to the memory-range check may
/// reach up to here (the window above `UTOP` is kernel-shared, read-only).
pub const ULIM: usize = 0xEF80_0000;

/// A physical memory address.
///
/// Physical addresses cannot be dereferenced; page contents are reached
/// through the memory manager.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(usize);

impl PhysAddr {
    /// Create a new physical address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#010x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A virtual memory address in some environment's address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    /// Create a new virtual address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// The null address.
    #[inline]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Align the address down to the nearest page boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Align the address up to the nearest page boundary.
    ///
    /// Returns `None` if rounding up wraps past the end of the address space.
    #[inline]
    pub const fn checked_align_up(self) -> Option<Self> {
        match self.0.checked_add(PAGE_MASK) {
            Some(v) => Some(Self(v & !PAGE_MASK)),
            None => None,
        }
    }

    /// Page directory index.
    #[inline]
    pub const fn pdx(self) -> usize {
        (self.0 >> PD_SHIFT) & (ENTRIES_PER_TABLE - 1)
    }

    /// Page table index.
    #[inline]
    pub const fn ptx(self) -> usize {
        (self.0 >> PAGE_SHIFT) & (ENTRIES_PER_TABLE - 1)
    }

    /// Get the page offset (lowest 12 bits).
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Add an offset to this address, failing on wrap-around.
    #[inline]
    pub const fn checked_add(self, offset: usize) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Check if the address is below the user ceiling.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < UTOP
    }

    /// Check if the address is a valid mapping target: page aligned and
    /// below the user ceiling.
    #[inline]
    pub const fn is_user_page(self) -> bool {
        self.is_user() && self.is_aligned()
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Round `len` up to a whole number of pages, failing on overflow.
#[inline]
pub const fn checked_page_round_up(len: usize) -> Option<usize> {
    match len.checked_add(PAGE_MASK) {
        Some(v) => Some(v & !PAGE_MASK),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_page_checks() {
        assert!(VirtAddr::new(0x0080_0000).is_user_page());
        assert!(!VirtAddr::new(0x0080_0010).is_user_page());
        assert!(!VirtAddr::new(UTOP).is_user_page());
        assert!(VirtAddr::new(UTOP - PAGE_SIZE).is_user_page());
    }

    #[test]
    fn test_page_alignment() {
        let addr = VirtAddr::new(0x4008_1234);
        assert_eq!(addr.align_down().as_usize(), 0x4008_1000);
        assert_eq!(addr.checked_align_up().unwrap().as_usize(), 0x4008_2000);
        assert_eq!(VirtAddr::new(usize::MAX).checked_align_up(), None);
    }

    #[test]
    fn test_table_indices() {
        let addr = VirtAddr::new(0x0040_3000);
        assert_eq!(addr.pdx(), 1);
        assert_eq!(addr.ptx(), 3);
        assert_eq!(checked_page_round_up(1), Some(PAGE_SIZE));
        assert_eq!(checked_page_round_up(0), Some(0));
    }
}
