//! Physical Frame Allocator
//!
//! Manages physical memory pages (frames) using a bitmap allocator with a
//! reference count per frame.
//!
//! # Design
//! - Each bit in the bitmap represents one 4KB frame
//! - Bit = 0: frame is free
//! - Bit = 1: frame is allocated
//! - A frame is returned to the pool when its last mapping goes away
//!
//! # Security Properties
//! - All allocated frames are zeroed before returning
//! - Double-free is detected and causes a panic
//! - A `Frame` is a plain handle: it does not keep the page alive

use alloc::vec;
use alloc::vec::Vec;

use super::address::{PhysAddr, PAGE_SHIFT, PAGE_SIZE};

/// Handle to one physical page.
///
/// Holding a `Frame` does not own the page; ownership is expressed through
/// the reference count kept by the allocator, which page-table insertions
/// increment and removals decrement.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Frame(PhysAddr);

impl Frame {
    /// Wrap a physical address as a frame handle.
    #[inline]
    pub const fn from_addr(addr: PhysAddr) -> Self {
        Self(addr)
    }

    /// Get the physical address of this frame.
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        self.0
    }
}

/// Bitmap frame allocator backed by host memory.
pub struct FrameAllocator {
    /// Bitmap tracking allocated frames (1 = allocated, 0 = free).
    bitmap: Vec<u8>,
    /// Mapping count per frame.
    refs: Vec<u16>,
    /// Backing storage, `PAGE_SIZE` bytes per frame.
    memory: Vec<u8>,
    /// Physical address of frame 0.
    base: PhysAddr,
    /// Number of free frames remaining.
    free_count: usize,
    /// Total frames under management.
    total_frames: usize,
}

impl FrameAllocator {
    /// Create an allocator managing `frames` pages starting at `base`.
    pub fn new(base: PhysAddr, frames: usize) -> Self {
        debug_assert!(base.is_aligned());
        Self {
            bitmap: vec![0; frames.div_ceil(8)],
            refs: vec![0; frames],
            memory: vec![0; frames * PAGE_SIZE],
            base,
            free_count: frames,
            total_frames: frames,
        }
    }

    /// Set a bit in the bitmap.
    #[inline]
    fn set_bit(&mut self, frame: usize, allocated: bool) {
        let byte_idx = frame / 8;
        let bit_idx = frame % 8;

        if allocated {
            self.bitmap[byte_idx] |= 1 << bit_idx;
        } else {
            self.bitmap[byte_idx] &= !(1 << bit_idx);
        }
    }

    /// Check if a frame index is allocated.
    #[inline]
    fn bit(&self, frame: usize) -> bool {
        let byte_idx = frame / 8;
        let bit_idx = frame % 8;

        match self.bitmap.get(byte_idx) {
            Some(byte) => (byte >> bit_idx) & 1 == 1,
            None => false,
        }
    }

    /// Frame index for a handle, if it lies in the managed range.
    fn index(&self, frame: Frame) -> Option<usize> {
        let addr = frame.addr();
        if !addr.is_aligned() || addr < self.base {
            return None;
        }
        let idx = (addr.as_usize() - self.base.as_usize()) >> PAGE_SHIFT;
        (idx < self.total_frames).then_some(idx)
    }

    /// Check whether `frame` is currently allocated.
    pub fn is_allocated(&self, frame: Frame) -> bool {
        self.index(frame).is_some_and(|idx| self.bit(idx))
    }

    /// Allocate a single zeroed frame with a reference count of zero.
    ///
    /// Returns `None` if no frames are available.
    pub fn alloc(&mut self) -> Option<Frame> {
        if self.free_count == 0 {
            return None;
        }

        // Linear search for a free frame
        let idx = (0..self.total_frames).find(|&i| !self.bit(i))?;
        self.set_bit(idx, true);
        self.free_count -= 1;
        self.refs[idx] = 0;

        // Zero the frame for security
        self.memory[idx * PAGE_SIZE..(idx + 1) * PAGE_SIZE].fill(0);

        Some(Frame(PhysAddr::new(self.base.as_usize() + (idx << PAGE_SHIFT))))
    }

    /// Free a previously allocated frame.
    ///
    /// # Panics
    /// Panics if:
    /// - The frame is outside the managed range
    /// - The frame was not allocated (double-free)
    /// - The frame is still mapped somewhere
    pub fn free(&mut self, frame: Frame) {
        let idx = match self.index(frame) {
            Some(idx) => idx,
            None => panic!("Attempted to free frame outside managed range: {:?}", frame),
        };

        if !self.bit(idx) {
            panic!("Double free detected for frame: {:?}", frame);
        }

        if self.refs[idx] != 0 {
            panic!("Freeing frame still referenced {} times: {:?}", self.refs[idx], frame);
        }

        self.set_bit(idx, false);
        self.free_count += 1;
    }

    /// Take one more reference to an allocated frame.
    ///
    /// Fails if the frame is not allocated or its count is saturated.
    pub fn incref(&mut self, frame: Frame) -> bool {
        let Some(idx) = self.index(frame).filter(|&idx| self.bit(idx)) else {
            return false;
        };
        match self.refs[idx].checked_add(1) {
            Some(n) => {
                self.refs[idx] = n;
                true
            }
            None => false,
        }
    }

    /// Whether `frame` can take another reference.
    pub fn can_incref(&self, frame: Frame) -> bool {
        self.index(frame)
            .is_some_and(|idx| self.bit(idx) && self.refs[idx] < u16::MAX)
    }

    /// Drop one reference; the frame is freed when the count reaches zero.
    ///
    /// Returns `true` if the frame was freed.
    pub fn decref(&mut self, frame: Frame) -> bool {
        let Some(idx) = self.index(frame).filter(|&idx| self.bit(idx)) else {
            return false;
        };
        self.refs[idx] = self.refs[idx].saturating_sub(1);
        if self.refs[idx] == 0 {
            self.free(frame);
            true
        } else {
            false
        }
    }

    /// Number of mappings currently referring to `frame`.
    pub fn ref_count(&self, frame: Frame) -> u16 {
        self.index(frame).map_or(0, |idx| self.refs[idx])
    }

    /// Contents of an allocated frame.
    pub fn bytes(&self, frame: Frame) -> Option<&[u8]> {
        let idx = self.index(frame).filter(|&idx| self.bit(idx))?;
        Some(&self.memory[idx * PAGE_SIZE..(idx + 1) * PAGE_SIZE])
    }

    /// Mutable contents of an allocated frame.
    pub fn bytes_mut(&mut self, frame: Frame) -> Option<&mut [u8]> {
        let idx = self.index(frame).filter(|&idx| self.bit(idx))?;
        Some(&mut self.memory[idx * PAGE_SIZE..(idx + 1) * PAGE_SIZE])
    }

    /// Get the number of free frames remaining.
    pub fn free_frames(&self) -> usize {
        self.free_count
    }

    /// Total frames under management.
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }
}
