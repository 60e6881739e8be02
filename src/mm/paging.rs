//! Page Table Entries and Permissions
//!
//! Two-level page tables with 4KB pages:
//! - Page directory: 1024 entries, each covers 4MB
//! - Page table: 1024 entries, each covers 4KB
//!
//! # Security Properties
//! - Permission bits are strictly typed (`Perm`), raw user input is only
//!   turned into a `Perm` after the allow-list check in `cap::rights`
//! - Entries never carry bits outside the permission mask

use bitflags::bitflags;

use super::address::{PhysAddr, PAGE_MASK};

bitflags! {
    /// Page table entry permission bits.
    ///
    /// The hardware layout of a 32-bit x86 PTE; the low 12 bits of an entry.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
    pub struct Perm: u32 {
        /// Entry is present.
        const PRESENT = 0x001;
        /// Page is writable.
        const WRITABLE = 0x002;
        /// Page is accessible from user mode.
        const USER = 0x004;
        /// Write-through caching.
        const WRITE_THROUGH = 0x008;
        /// Caching disabled.
        const CACHE_DISABLE = 0x010;
        /// Set by hardware on access.
        const ACCESSED = 0x020;
        /// Set by hardware on write.
        const DIRTY = 0x040;
        /// Large page (directory entries only).
        const PAGE_SIZE = 0x080;
        /// Global mapping.
        const GLOBAL = 0x100;
        /// Bits available for software use (e.g. copy-on-write, share).
        const AVAIL = 0xE00;

        /// The only bits a system call may request.
        const SYSCALL = Self::AVAIL.bits()
            | Self::PRESENT.bits()
            | Self::WRITABLE.bits()
            | Self::USER.bits();

        /// Present and user accessible, required on every user mapping.
        const USER_PRESENT = Self::PRESENT.bits() | Self::USER.bits();

        /// Present, user accessible and writable.
        const USER_RW = Self::USER_PRESENT.bits() | Self::WRITABLE.bits();
    }
}

/// A single page table entry: frame address in the high bits,
/// permissions in the low 12.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    /// Address mask for page table entries.
    const ADDR_MASK: u32 = !(PAGE_MASK as u32);

    /// Create a page entry mapping a physical frame.
    #[inline]
    pub fn page(phys: PhysAddr, perm: Perm) -> Self {
        debug_assert!(phys.is_aligned());
        Self((phys.as_usize() as u32 & Self::ADDR_MASK) | (perm | Perm::PRESENT).bits())
    }

    /// Check if the entry is valid (present).
    #[inline]
    pub fn is_valid(self) -> bool {
        self.perm().contains(Perm::PRESENT)
    }

    /// Get the physical address from this entry.
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        PhysAddr::new((self.0 & Self::ADDR_MASK) as usize)
    }

    /// Get the permission bits from this entry.
    #[inline]
    pub fn perm(self) -> Perm {
        Perm::from_bits_truncate(self.0 & !Self::ADDR_MASK)
    }

    /// Get the raw value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_valid() {
            write!(f, "PTE(addr={}, perm={:?})", self.addr(), self.perm())
        } else {
            write!(f, "PTE(invalid)")
        }
    }
}

/// Error type for page mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    /// No physical frames available for pages or page tables.
    OutOfMemory,
    /// The address is not properly aligned.
    MisalignedAddress,
    /// The virtual address is not mapped.
    NotMapped,
    /// The frame is not currently allocated.
    InvalidFrame,
    /// The address space handle does not name a live address space.
    NoSuchSpace,
}

impl core::fmt::Display for MappingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory for pages or page tables"),
            Self::MisalignedAddress => write!(f, "address not properly aligned"),
            Self::NotMapped => write!(f, "virtual address not mapped"),
            Self::InvalidFrame => write!(f, "frame is not allocated"),
            Self::NoSuchSpace => write!(f, "no such address space"),
        }
    }
}
