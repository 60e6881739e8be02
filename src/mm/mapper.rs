//! Address Spaces and the Page Mapper
//!
//! The syscall layer never touches page tables directly. It drives them
//! through [`MemoryManager`], the interface to the physical allocator and
//! page-table primitives: allocate, insert, remove and look up a mapping.
//!
//! [`HostMemory`] implements the interface over a [`FrameAllocator`] and
//! two-level page tables held in host memory. Page tables themselves consume
//! frames, so an insertion can run out of memory after the data page was
//! already allocated, exactly like the hardware-backed mapper.
//!
//! # Security Properties
//! - An [`AddressSpace`] handle is neither `Clone` nor `Copy`: exactly one
//!   environment owns a given page-table root
//! - Destroying a space drops every reference it holds, so shared frames
//!   survive exactly as long as some space still maps them

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::address::{PhysAddr, VirtAddr, PAGE_SIZE};
use super::frame::{Frame, FrameAllocator};
use super::paging::{MappingError, PageTableEntry, Perm};

/// Owning handle to the root of one page-table hierarchy.
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace(u32);

impl AddressSpace {
    /// Wrap a raw root identifier.
    ///
    /// Only a [`MemoryManager`] implementation should mint handles, and it
    /// must never hand out two handles for the same root.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw root identifier.
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

/// Physical allocator and page-table primitives consumed by the kernel.
pub trait MemoryManager {
    /// Create a fresh, empty user address space.
    fn create_space(&mut self) -> Result<AddressSpace, MappingError>;

    /// Tear down an address space, releasing every page it maps.
    fn destroy_space(&mut self, space: AddressSpace);

    /// Allocate one zero-filled page that nothing maps yet.
    fn alloc_page(&mut self) -> Result<Frame, MappingError>;

    /// Return a page obtained from `alloc_page` that was never mapped.
    fn free_page(&mut self, frame: Frame);

    /// Map `frame` at `va`, replacing (and releasing) any previous mapping.
    fn insert(
        &mut self,
        space: &AddressSpace,
        frame: Frame,
        va: VirtAddr,
        perm: Perm,
    ) -> Result<(), MappingError>;

    /// Remove the mapping at `va`, if any.
    fn remove(&mut self, space: &AddressSpace, va: VirtAddr);

    /// Frame and permissions mapped at the page containing `va`.
    fn lookup(&self, space: &AddressSpace, va: VirtAddr) -> Option<(Frame, Perm)>;

    /// Install `space` as the active translation root.
    fn activate(&mut self, space: &AddressSpace);

    /// Contents of an allocated frame.
    fn frame_bytes(&self, frame: Frame) -> Option<&[u8]>;

    /// Mutable contents of an allocated frame.
    fn frame_bytes_mut(&mut self, frame: Frame) -> Option<&mut [u8]>;

    /// Copy `buf.len()` bytes starting at `va` out of `space`.
    ///
    /// Permissions are not checked here; callers validate the range first.
    fn read_bytes(
        &self,
        space: &AddressSpace,
        va: VirtAddr,
        buf: &mut [u8],
    ) -> Result<(), MappingError> {
        let mut done = 0;
        while done < buf.len() {
            let cur = va.checked_add(done).ok_or(MappingError::NotMapped)?;
            let (frame, _) = self.lookup(space, cur).ok_or(MappingError::NotMapped)?;
            let page = self.frame_bytes(frame).ok_or(MappingError::InvalidFrame)?;
            let off = cur.page_offset();
            let n = (PAGE_SIZE - off).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&page[off..off + n]);
            done += n;
        }
        Ok(())
    }

    /// Copy `data` into `space` starting at `va`.
    ///
    /// Permissions are not checked here; callers validate the range first.
    fn write_bytes(
        &mut self,
        space: &AddressSpace,
        va: VirtAddr,
        data: &[u8],
    ) -> Result<(), MappingError> {
        let mut done = 0;
        while done < data.len() {
            let cur = va.checked_add(done).ok_or(MappingError::NotMapped)?;
            let (frame, _) = self.lookup(space, cur).ok_or(MappingError::NotMapped)?;
            let page = self.frame_bytes_mut(frame).ok_or(MappingError::InvalidFrame)?;
            let off = cur.page_offset();
            let n = (PAGE_SIZE - off).min(data.len() - done);
            page[off..off + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }
}

/// Second-level table: one frame plus its present entries.
struct PageTable {
    frame: Frame,
    entries: BTreeMap<usize, PageTableEntry>,
}

/// Page directory: one frame plus its second-level tables.
struct PageDirectory {
    frame: Frame,
    tables: BTreeMap<usize, PageTable>,
}

/// Host-memory implementation of [`MemoryManager`].
pub struct HostMemory {
    frames: FrameAllocator,
    spaces: Vec<Option<PageDirectory>>,
    active: Option<u32>,
}

impl HostMemory {
    /// Physical address of the first managed frame.
    pub const FRAME_BASE: usize = 0x0040_0000;

    /// Create a memory manager with `frames` physical pages.
    pub fn new(frames: usize) -> Self {
        Self {
            frames: FrameAllocator::new(PhysAddr::new(Self::FRAME_BASE), frames),
            spaces: Vec::new(),
            active: None,
        }
    }

    /// Allocate a page the kernel keeps for itself, for example the page
    /// shared with user space through map-kernel-page. The kernel holds a
    /// reference, so the page outlives every user mapping of it.
    pub fn reserve_kernel_page(&mut self) -> Result<Frame, MappingError> {
        let frame = self.frames.alloc().ok_or(MappingError::OutOfMemory)?;
        self.frames.incref(frame);
        Ok(frame)
    }

    /// Number of free physical frames.
    pub fn free_frames(&self) -> usize {
        self.frames.free_frames()
    }

    /// Number of mappings referring to `frame`.
    pub fn ref_count(&self, frame: Frame) -> u16 {
        self.frames.ref_count(frame)
    }

    /// Raw id of the active address space.
    pub fn active_space(&self) -> Option<u32> {
        self.active
    }

    /// Number of live address spaces.
    pub fn live_spaces(&self) -> usize {
        self.spaces.iter().filter(|s| s.is_some()).count()
    }

    fn directory(&self, space: &AddressSpace) -> Option<&PageDirectory> {
        self.spaces.get(space.0 as usize)?.as_ref()
    }
}

impl MemoryManager for HostMemory {
    fn create_space(&mut self) -> Result<AddressSpace, MappingError> {
        let frame = self.frames.alloc().ok_or(MappingError::OutOfMemory)?;
        self.frames.incref(frame);

        let dir = PageDirectory {
            frame,
            tables: BTreeMap::new(),
        };
        let slot = match self.spaces.iter().position(|s| s.is_none()) {
            Some(slot) => {
                self.spaces[slot] = Some(dir);
                slot
            }
            None => {
                self.spaces.push(Some(dir));
                self.spaces.len() - 1
            }
        };
        Ok(AddressSpace(slot as u32))
    }

    fn destroy_space(&mut self, space: AddressSpace) {
        let Some(dir) = self.spaces.get_mut(space.0 as usize).and_then(Option::take) else {
            return;
        };
        for table in dir.tables.values() {
            for pte in table.entries.values() {
                self.frames.decref(Frame::from_addr(pte.addr()));
            }
            self.frames.decref(table.frame);
        }
        self.frames.decref(dir.frame);

        if self.active == Some(space.0) {
            self.active = None;
        }
    }

    fn alloc_page(&mut self) -> Result<Frame, MappingError> {
        self.frames.alloc().ok_or(MappingError::OutOfMemory)
    }

    fn free_page(&mut self, frame: Frame) {
        if self.frames.is_allocated(frame) && self.frames.ref_count(frame) == 0 {
            self.frames.free(frame);
        }
    }

    fn insert(
        &mut self,
        space: &AddressSpace,
        frame: Frame,
        va: VirtAddr,
        perm: Perm,
    ) -> Result<(), MappingError> {
        if !va.is_aligned() {
            return Err(MappingError::MisalignedAddress);
        }
        if !self.frames.is_allocated(frame) {
            return Err(MappingError::InvalidFrame);
        }
        if !self.frames.can_incref(frame) {
            return Err(MappingError::OutOfMemory);
        }
        let dir = self
            .spaces
            .get_mut(space.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(MappingError::NoSuchSpace)?;

        if !dir.tables.contains_key(&va.pdx()) {
            let table_frame = self.frames.alloc().ok_or(MappingError::OutOfMemory)?;
            self.frames.incref(table_frame);
            dir.tables.insert(
                va.pdx(),
                PageTable {
                    frame: table_frame,
                    entries: BTreeMap::new(),
                },
            );
        }
        let Some(table) = dir.tables.get_mut(&va.pdx()) else {
            return Err(MappingError::NoSuchSpace);
        };

        // Take the new reference first so re-inserting the same frame
        // at the same address cannot free it.
        if !self.frames.incref(frame) {
            return Err(MappingError::OutOfMemory);
        }
        let old = table
            .entries
            .insert(va.ptx(), PageTableEntry::page(frame.addr(), perm));
        if let Some(old) = old {
            self.frames.decref(Frame::from_addr(old.addr()));
        }
        Ok(())
    }

    fn remove(&mut self, space: &AddressSpace, va: VirtAddr) {
        let Some(dir) = self.spaces.get_mut(space.0 as usize).and_then(Option::as_mut) else {
            return;
        };
        let Some(table) = dir.tables.get_mut(&va.pdx()) else {
            return;
        };
        if let Some(old) = table.entries.remove(&va.ptx()) {
            self.frames.decref(Frame::from_addr(old.addr()));
        }
    }

    fn lookup(&self, space: &AddressSpace, va: VirtAddr) -> Option<(Frame, Perm)> {
        let pte = self.directory(space)?.tables.get(&va.pdx())?.entries.get(&va.ptx())?;
        pte.is_valid()
            .then(|| (Frame::from_addr(pte.addr()), pte.perm()))
    }

    fn activate(&mut self, space: &AddressSpace) {
        self.active = Some(space.0);
    }

    fn frame_bytes(&self, frame: Frame) -> Option<&[u8]> {
        self.frames.bytes(frame)
    }

    fn frame_bytes_mut(&mut self, frame: Frame) -> Option<&mut [u8]> {
        self.frames.bytes_mut(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VA: VirtAddr = VirtAddr::new(0x0080_0000);

    #[test]
    fn test_insert_lookup_remove() {
        let mut mem = HostMemory::new(8);
        let space = mem.create_space().unwrap();
        let page = mem.alloc_page().unwrap();

        mem.insert(&space, page, VA, Perm::USER_RW).unwrap();
        assert_eq!(mem.lookup(&space, VA), Some((page, Perm::USER_RW)));
        assert_eq!(mem.ref_count(page), 1);

        mem.remove(&space, VA);
        assert_eq!(mem.lookup(&space, VA), None);
        assert_eq!(mem.ref_count(page), 0);
        // directory + one page table remain
        assert_eq!(mem.free_frames(), 6);
    }

    #[test]
    fn test_insert_replaces_previous_mapping() {
        let mut mem = HostMemory::new(8);
        let space = mem.create_space().unwrap();
        let first = mem.alloc_page().unwrap();
        let second = mem.alloc_page().unwrap();

        mem.insert(&space, first, VA, Perm::USER_RW).unwrap();
        mem.insert(&space, second, VA, Perm::USER_PRESENT).unwrap();
        assert_eq!(mem.lookup(&space, VA), Some((second, Perm::USER_PRESENT)));
        assert_eq!(mem.frame_bytes(first), None);
    }

    #[test]
    fn test_reinsert_same_frame_keeps_it_alive() {
        let mut mem = HostMemory::new(8);
        let space = mem.create_space().unwrap();
        let page = mem.alloc_page().unwrap();
        mem.insert(&space, page, VA, Perm::USER_RW).unwrap();
        mem.insert(&space, page, VA, Perm::USER_PRESENT).unwrap();
        assert_eq!(mem.ref_count(page), 1);
        assert!(mem.frame_bytes(page).is_some());
    }

    #[test]
    fn test_insert_fails_when_page_table_cannot_be_allocated() {
        let mut mem = HostMemory::new(2);
        let space = mem.create_space().unwrap();
        let page = mem.alloc_page().unwrap();
        assert_eq!(
            mem.insert(&space, page, VA, Perm::USER_RW),
            Err(MappingError::OutOfMemory)
        );
        mem.free_page(page);
        assert_eq!(mem.free_frames(), 1);
    }

    #[test]
    fn test_insert_fails_when_refcount_saturates() {
        let mut mem = HostMemory::new(128);
        let space = mem.create_space().unwrap();
        let page = mem.alloc_page().unwrap();
        for i in 0..u16::MAX as usize {
            let va = VirtAddr::new(0x0040_0000 + i * PAGE_SIZE);
            mem.insert(&space, page, va, Perm::USER_PRESENT).unwrap();
        }
        let next = VirtAddr::new(0x0040_0000 + u16::MAX as usize * PAGE_SIZE);
        let free = mem.free_frames();
        assert_eq!(
            mem.insert(&space, page, next, Perm::USER_PRESENT),
            Err(MappingError::OutOfMemory)
        );
        assert_eq!(mem.lookup(&space, next), None);
        assert_eq!(mem.free_frames(), free);
        assert_eq!(mem.ref_count(page), u16::MAX);
    }

    #[test]
    fn test_destroy_space_releases_frames() {
        let mut mem = HostMemory::new(8);
        let a = mem.create_space().unwrap();
        let b = mem.create_space().unwrap();
        let page = mem.alloc_page().unwrap();
        mem.insert(&a, page, VA, Perm::USER_RW).unwrap();
        mem.insert(&b, page, VA, Perm::USER_PRESENT).unwrap();

        mem.destroy_space(a);
        assert_eq!(mem.ref_count(page), 1);
        mem.destroy_space(b);
        assert_eq!(mem.free_frames(), 8);
        assert_eq!(mem.live_spaces(), 0);
    }

    #[test]
    fn test_read_write_across_page_boundary() {
        let mut mem = HostMemory::new(8);
        let space = mem.create_space().unwrap();
        for i in 0..2 {
            let page = mem.alloc_page().unwrap();
            let va = VA.checked_add(i * PAGE_SIZE).unwrap();
            mem.insert(&space, page, va, Perm::USER_RW).unwrap();
        }
        let start = VA.checked_add(PAGE_SIZE - 2).unwrap();
        mem.write_bytes(&space, start, b"abcd").unwrap();
        let mut out = [0u8; 4];
        mem.read_bytes(&space, start, &mut out).unwrap();
        assert_eq!(&out, b"abcd");

        let unmapped = VA.checked_add(2 * PAGE_SIZE - 1).unwrap();
        assert_eq!(
            mem.read_bytes(&space, unmapped, &mut out),
            Err(MappingError::NotMapped)
        );
    }
}
