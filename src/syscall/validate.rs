//! User Memory Validation
//!
//! Checks that a caller-supplied byte range is mapped in the caller's own
//! address space with sufficient permissions.
//!
//! # Security Principles
//! - Validate ALL ranges before use
//! - Fail-secure: a bad range is a protection violation, and the offending
//!   environment is destroyed on the spot
//! - Copy into kernel memory before use, so later remapping by another
//!   environment cannot change what was validated

use alloc::vec;
use alloc::vec::Vec;

use log::warn;

use crate::console::Console;
use crate::env::Env;
use crate::kernel::Kernel;
use crate::mm::{AddressSpace, MemoryManager, Perm, VirtAddr, PAGE_SIZE, ULIM};
use crate::sched::Scheduler;

use super::handler::SyscallError;

/// Kind of access the kernel will perform on behalf of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The kernel reads the range.
    Read,
    /// The kernel writes the range.
    Write,
}

impl Access {
    /// Permission bits every page of the range must carry.
    fn required(self) -> Perm {
        match self {
            Self::Read => Perm::USER_PRESENT,
            Self::Write => Perm::USER_RW,
        }
    }
}

/// First address of a range that failed the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessViolation {
    pub va: VirtAddr,
}

/// A validated user range.
///
/// Only constructed after `check_user_range` succeeds for the space it is
/// later read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRange {
    va: VirtAddr,
    len: usize,
}

impl UserRange {
    /// Start address.
    pub fn va(&self) -> VirtAddr {
        self.va
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check for the empty range.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the range into kernel memory.
    pub fn copy_in<M: MemoryManager>(&self, mem: &M, env: &Env) -> Result<Vec<u8>, SyscallError> {
        let mut buf = vec![0u8; self.len];
        if self.len == 0 {
            return Ok(buf);
        }
        let space = env.space().ok_or(SyscallError::BadEnv)?;
        mem.read_bytes(space, self.va, &mut buf)?;
        Ok(buf)
    }
}

/// Validate a user range against the mappings of `space`.
///
/// # Security Checks
/// 1. The range does not wrap around the address space
/// 2. Every page touched lies below `ULIM`
/// 3. Every page touched is mapped with `access`'s permission bits
pub fn check_user_range<M: MemoryManager>(
    mem: &M,
    space: &AddressSpace,
    va: VirtAddr,
    len: usize,
    access: Access,
) -> Result<UserRange, AccessViolation> {
    // Zero-length ranges are valid
    if len == 0 {
        return Ok(UserRange { va, len });
    }

    let end = va
        .checked_add(len)
        .and_then(VirtAddr::checked_align_up)
        .ok_or(AccessViolation { va })?;
    let required = access.required();

    let mut page = va.align_down();
    while page < end {
        // Report the caller's own address for the first page.
        let fault = AccessViolation { va: page.max(va) };
        if page.as_usize() >= ULIM {
            return Err(fault);
        }
        match mem.lookup(space, page) {
            Some((_, perm)) if perm.contains(required) => {}
            _ => return Err(fault),
        }
        page = page.checked_add(PAGE_SIZE).ok_or(fault)?;
    }

    Ok(UserRange { va, len })
}

impl<M: MemoryManager, S: Scheduler, C: Console> Kernel<M, S, C> {
    /// Validate a range in the address space of the environment in `slot`,
    /// destroying that environment if the check fails.
    pub(crate) fn user_mem_assert(
        &mut self,
        slot: usize,
        va: VirtAddr,
        len: usize,
        access: Access,
    ) -> Result<UserRange, SyscallError> {
        let env = self.envs.get(slot);
        let id = env.id();
        let checked = match env.space() {
            Some(space) => check_user_range(&self.mem, space, va, len, access),
            None => Err(AccessViolation { va }),
        };

        match checked {
            Ok(range) => Ok(range),
            Err(violation) => {
                warn!("[{}] user_mem_check assertion failure for va {}", id, violation.va);
                self.destroy_env(slot);
                Err(SyscallError::Fault)
            }
        }
    }
}
