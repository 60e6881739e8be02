//! Environment Ownership
//!
//! Resolves environment ids passed to system calls and decides whether the
//! caller may act on the target.
//!
//! # Rules
//! - Id 0 names the caller itself
//! - Stale ids (freed or reused slots) never resolve
//! - Where ownership is required, the target must be the caller or one of
//!   its immediate children

use crate::console::Console;
use crate::env::EnvId;
use crate::kernel::Kernel;
use crate::mm::MemoryManager;
use crate::sched::Scheduler;
use crate::syscall::SyscallError;

/// Whether an operation may only touch environments the caller owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Target must be the caller or its direct child.
    Required,
    /// Any live environment is a valid target.
    NotRequired,
}

impl<M: MemoryManager, S: Scheduler, C: Console> Kernel<M, S, C> {
    /// Convert an id into the slot of a live environment.
    ///
    /// # Errors
    /// `BadEnv` if the id does not name a live environment, or if
    /// `ownership` is required and the caller neither is nor created the
    /// target.
    pub(crate) fn lookup_env(&self, id: EnvId, ownership: Ownership) -> Result<usize, SyscallError> {
        let cur = self.cur_slot()?;
        if id.is_none() {
            return Ok(cur);
        }

        let slot = self.envs.resolve(id).ok_or(SyscallError::BadEnv)?;
        if ownership == Ownership::Required && slot != cur {
            let caller = self.envs.get(cur).id();
            if self.envs.get(slot).parent_id() != caller {
                return Err(SyscallError::BadEnv);
            }
        }
        Ok(slot)
    }
}
