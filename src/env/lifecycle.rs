//! Environment Lifecycle
//!
//! Fork, status changes, register-state replacement, destruction and
//! exec-commit.
//!
//! # Security Considerations
//! - Every target id goes through the ownership check before anything is
//!   touched
//! - A user-supplied register snapshot is sanitized before it is stored
//! - Destruction clears every IPC link pointing at the dead environment, so
//!   no survivor stays blocked on a stale id

use alloc::vec::Vec;

use log::{debug, info};

use super::{EnvId, EnvStatus, Trapframe};
use crate::cap::Ownership;
use crate::console::Console;
use crate::kernel::Kernel;
use crate::mm::{MemoryManager, VirtAddr};
use crate::sched::Scheduler;
use crate::syscall::{Access, Flow, SysResult, SyscallError};

impl<M: MemoryManager, S: Scheduler, C: Console> Kernel<M, S, C> {
    /// Tear down the environment in `slot`.
    ///
    /// Senders blocked on it are woken and see their send fail with
    /// `BadEnv`. The slot returns to the free list and its address space is
    /// released.
    pub(crate) fn destroy_env(&mut self, slot: usize) {
        let env = self.envs.get_mut(slot);
        let id = env.id;
        env.status = EnvStatus::Dying;

        let waiting: Vec<usize> = self
            .envs
            .iter_live()
            .filter(|(_, e)| e.ipc.pending.is_some_and(|p| p.target == id))
            .map(|(s, _)| s)
            .collect();
        for sender in waiting {
            let env = self.envs.get_mut(sender);
            debug!("[{}] send to {} aborted", env.id, id);
            env.ipc.pending = None;
            env.status = EnvStatus::Runnable;
            env.pending_result = Some(SyscallError::BadEnv.code());
        }

        if let Some(space) = self.envs.release(slot) {
            self.mem.destroy_space(space);
        }
        debug!("[{}] freed", id);
    }

    /// Destroy an environment the caller owns.
    ///
    /// Destroying the caller itself does not return.
    pub(crate) fn sys_env_destroy(&mut self, envid: EnvId) -> SysResult {
        let slot = self.lookup_env(envid, Ownership::Required)?;
        let cur = self.cur_slot()?;
        let caller = self.envs.get(cur).id;
        if slot == cur {
            info!("[{}] exiting gracefully", caller);
        } else {
            info!("[{}] destroying {}", caller, self.envs.get(slot).id);
        }
        self.destroy_env(slot);
        Ok(Flow::Return(0))
    }

    /// Allocate a child environment that is a register-level copy of the
    /// caller.
    ///
    /// The child starts `NotRunnable` with an empty address space; when it
    /// is first resumed its fork call returns 0. The parent gets the
    /// child's id.
    pub(crate) fn sys_exofork(&mut self) -> SysResult {
        let cur = self.cur_slot()?;
        let parent = self.envs.get(cur);
        let (parent_id, tf, heap_break) = (parent.id, parent.tf, parent.heap_break);

        let slot = self.alloc_env(parent_id)?;
        let child = self.envs.get_mut(slot);
        child.tf = tf;
        child.heap_break = heap_break;
        child.pending_result = Some(0);
        debug!("[{}] exofork {}", parent_id, child.id);
        Ok(Flow::Return(child.id.raw() as i32))
    }

    /// Set an owned environment's status to `Runnable` or `NotRunnable`.
    pub(crate) fn sys_env_set_status(&mut self, envid: EnvId, status: u32) -> SysResult {
        let slot = self.lookup_env(envid, Ownership::Required)?;
        let status = match EnvStatus::from_raw(status) {
            Some(s @ (EnvStatus::Runnable | EnvStatus::NotRunnable)) => s,
            _ => return Err(SyscallError::Inval),
        };
        self.envs.get_mut(slot).status = status;
        Ok(Flow::Return(0))
    }

    /// Replace an owned environment's register snapshot with one read from
    /// the caller's memory at `tf`.
    ///
    /// # Security
    /// - The snapshot must be readable by the caller; otherwise the caller
    ///   is destroyed
    /// - The stored copy is forced to user mode with interrupts enabled
    pub(crate) fn sys_env_set_trapframe(&mut self, envid: EnvId, tf: VirtAddr) -> SysResult {
        let cur = self.cur_slot()?;
        let range = self.user_mem_assert(cur, tf, Trapframe::SIZE, Access::Read)?;
        let slot = self.lookup_env(envid, Ownership::Required)?;

        let bytes = range.copy_in(&self.mem, self.envs.get(cur))?;
        let raw: &[u8; Trapframe::SIZE] = bytes.as_slice().try_into().map_err(|_| SyscallError::Inval)?;
        let mut frame = Trapframe::from_bytes(raw);
        frame.sanitize_for_user();
        self.envs.get_mut(slot).tf = frame;
        Ok(Flow::Return(0))
    }

    /// Set the page-fault entry point of an owned environment.
    ///
    /// The address is not checked here; address 0 clears the upcall.
    pub(crate) fn sys_env_set_pgfault_upcall(&mut self, envid: EnvId, func: VirtAddr) -> SysResult {
        let slot = self.lookup_env(envid, Ownership::Required)?;
        self.envs.get_mut(slot).pgfault_upcall = (func.as_usize() != 0).then_some(func);
        Ok(Flow::Return(0))
    }

    /// Adopt the image prepared in child `envid`.
    ///
    /// The caller takes over the child's registers, upcall, heap break and
    /// address space; the child gets the caller's old space and is
    /// destroyed with it. On success the caller resumes under the new
    /// image and the call does not return.
    pub(crate) fn sys_exec_commit(&mut self, envid: EnvId) -> SysResult {
        let cur = self.cur_slot()?;
        let slot = self.lookup_env(envid, Ownership::Required)?;
        let (caller, image) = self.envs.pair_mut(cur, slot).ok_or(SyscallError::Inval)?;

        caller.tf = image.tf;
        caller.pgfault_upcall = image.pgfault_upcall;
        caller.heap_break = image.heap_break;
        core::mem::swap(&mut caller.space, &mut image.space);
        caller.pending_result = None;
        if let Some(space) = caller.space.as_ref() {
            self.mem.activate(space);
        }
        info!("[{}] exec commit from {}", caller.id, image.id);

        self.destroy_env(slot);
        Ok(Flow::Resume)
    }
}
