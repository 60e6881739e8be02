//! Mapping System Calls
//!
//! Allocate, share and remove user pages, map the kernel-shared page and
//! grow the heap.
//!
//! # Security Considerations
//! - Every address is checked for alignment and the user ceiling before it
//!   reaches the page mapper
//! - Requested rights go through the allow-list, and a shared page can only
//!   be mapped with narrower rights than its source
//! - Failures after an allocation roll back, so no page leaks

use log::{debug, warn};

use super::address::{checked_page_round_up, VirtAddr, PAGE_SIZE, UTOP};
use super::mapper::MemoryManager;
use super::paging::Perm;
use crate::cap::{check_narrowing, check_syscall_perm, Ownership};
use crate::console::Console;
use crate::env::EnvId;
use crate::kernel::Kernel;
use crate::sched::Scheduler;
use crate::syscall::{Flow, SysResult, SyscallError};

impl<M: MemoryManager, S: Scheduler, C: Console> Kernel<M, S, C> {
    /// Allocate a zeroed page and map it at `va` in an owned environment,
    /// replacing whatever was mapped there.
    pub(crate) fn sys_page_alloc(&mut self, envid: EnvId, va: VirtAddr, perm: u32) -> SysResult {
        let slot = self.lookup_env(envid, Ownership::Required)?;
        if !va.is_user_page() {
            return Err(SyscallError::Inval);
        }
        let perm = check_syscall_perm(perm)?;

        let env = self.envs.get(slot);
        let space = env.space().ok_or(SyscallError::BadEnv)?;
        let frame = self.mem.alloc_page()?;
        if let Err(err) = self.mem.insert(space, frame, va, perm) {
            self.mem.free_page(frame);
            return Err(err.into());
        }
        debug!("[{}] page_alloc {} {:?}", env.id(), va, perm);
        Ok(Flow::Return(0))
    }

    /// Map the page at `srcva` in `srcenv` at `dstva` in `dstenv`.
    ///
    /// Both environments must be owned by the caller. `perm` may not grant
    /// write access unless the source mapping does.
    pub(crate) fn sys_page_map(
        &mut self,
        srcenv: EnvId,
        srcva: VirtAddr,
        dstenv: EnvId,
        dstva: VirtAddr,
        perm: u32,
    ) -> SysResult {
        let src = self.lookup_env(srcenv, Ownership::Required)?;
        let dst = self.lookup_env(dstenv, Ownership::Required)?;
        if !srcva.is_user_page() || !dstva.is_user_page() {
            return Err(SyscallError::Inval);
        }
        let perm = check_syscall_perm(perm)?;

        let src_space = self.envs.get(src).space().ok_or(SyscallError::BadEnv)?;
        let (frame, src_perm) = self.mem.lookup(src_space, srcva).ok_or(SyscallError::Inval)?;
        check_narrowing(perm, src_perm)?;

        let dst_space = self.envs.get(dst).space().ok_or(SyscallError::BadEnv)?;
        self.mem.insert(dst_space, frame, dstva, perm)?;
        debug!(
            "[{}] page_map {} -> [{}] {}",
            self.envs.get(src).id(),
            srcva,
            self.envs.get(dst).id(),
            dstva
        );
        Ok(Flow::Return(0))
    }

    /// Remove the mapping at `va` in an owned environment, if any.
    pub(crate) fn sys_page_unmap(&mut self, envid: EnvId, va: VirtAddr) -> SysResult {
        let slot = self.lookup_env(envid, Ownership::Required)?;
        if !va.is_user_page() {
            return Err(SyscallError::Inval);
        }
        let space = self.envs.get(slot).space().ok_or(SyscallError::BadEnv)?;
        self.mem.remove(space, va);
        Ok(Flow::Return(0))
    }

    /// Map the kernel-shared page, writable, at `va` in the caller's space.
    ///
    /// `kpage` must be the physical address of the configured page.
    pub(crate) fn sys_map_kernel_page(&mut self, kpage: usize, va: VirtAddr) -> SysResult {
        let cur = self.cur_slot()?;
        let frame = self
            .config
            .kernel_page()
            .filter(|f| f.addr().as_usize() == kpage)
            .ok_or(SyscallError::Inval)?;
        if !va.is_user_page() {
            return Err(SyscallError::Inval);
        }
        let space = self.envs.get(cur).space().ok_or(SyscallError::BadEnv)?;
        self.mem.insert(space, frame, va, Perm::USER_RW)?;
        Ok(Flow::Return(0))
    }

    /// Grow the caller's heap by `inc` bytes, rounded up to whole pages.
    ///
    /// Returns the new break, which stays below `UTOP`. Reaching `UTOP` (or
    /// wrapping) is fatal to the caller.
    pub(crate) fn sys_sbrk(&mut self, inc: u32) -> SysResult {
        let cur = self.cur_slot()?;
        let env = self.envs.get(cur);
        let (id, old) = (env.id(), env.heap_break());

        let new = checked_page_round_up(inc as usize)
            .and_then(|len| old.checked_add(len))
            .filter(|brk| brk.as_usize() < UTOP);
        let Some(new) = new else {
            warn!("[{}] sbrk out of range: break {} inc {:#x}", id, old, inc);
            self.destroy_env(cur);
            return Ok(Flow::Reschedule);
        };

        let mut va = old;
        while va < new {
            if let Err(err) = self.map_heap_page(cur, va) {
                self.unmap_range(cur, old, va);
                warn!("[{}] sbrk failed at {}: {}", id, va, err);
                return Err(err);
            }
            va = va.checked_add(PAGE_SIZE).ok_or(SyscallError::Inval)?;
        }

        self.envs.get_mut(cur).heap_break = new;
        debug!("[{}] sbrk {} -> {}", id, old, new);
        Ok(Flow::Return(new.as_usize() as i32))
    }

    /// Back one heap page with a fresh writable frame.
    fn map_heap_page(&mut self, slot: usize, va: VirtAddr) -> Result<(), SyscallError> {
        let space = self.envs.get(slot).space().ok_or(SyscallError::BadEnv)?;
        let frame = self.mem.alloc_page()?;
        if let Err(err) = self.mem.insert(space, frame, va, Perm::USER_RW) {
            self.mem.free_page(frame);
            return Err(err.into());
        }
        Ok(())
    }

    /// Remove the mappings of `[start, end)`.
    fn unmap_range(&mut self, slot: usize, start: VirtAddr, end: VirtAddr) {
        let Some(space) = self.envs.get(slot).space() else {
            return;
        };
        let mut va = start;
        while va < end {
            self.mem.remove(space, va);
            match va.checked_add(PAGE_SIZE) {
                Some(next) => va = next,
                None => break,
            }
        }
    }
}
