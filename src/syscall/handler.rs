//! System Call Handler
//!
//! Dispatches system calls to their handlers and implements the console
//! and identity calls.
//!
//! # Security Considerations
//! - Unknown syscall numbers return `Inval`, never fault
//! - Dispatch itself validates nothing; every handler checks its own
//!   arguments before mutating any state

use log::{debug, warn};

use crate::cap::RightsError;
use crate::console::Console;
use crate::env::EnvId;
use crate::kernel::Kernel;
use crate::mm::{MappingError, MemoryManager, VirtAddr};
use crate::sched::Scheduler;

use super::validate::Access;

/// System call numbers
pub mod numbers {
    pub const SYS_CPUTS: u32 = 0;
    pub const SYS_CGETC: u32 = 1;
    pub const SYS_GETENVID: u32 = 2;
    pub const SYS_ENV_DESTROY: u32 = 3;
    pub const SYS_MAP_KERNEL_PAGE: u32 = 4;
    pub const SYS_YIELD: u32 = 5;
    pub const SYS_EXOFORK: u32 = 6;
    pub const SYS_ENV_SET_STATUS: u32 = 7;
    pub const SYS_ENV_SET_TRAPFRAME: u32 = 8;
    pub const SYS_ENV_SET_PGFAULT_UPCALL: u32 = 9;
    pub const SYS_EXEC_COMMIT: u32 = 10;
    pub const SYS_PAGE_ALLOC: u32 = 11;
    pub const SYS_PAGE_MAP: u32 = 12;
    pub const SYS_PAGE_UNMAP: u32 = 13;
    pub const SYS_IPC_TRY_SEND: u32 = 14;
    pub const SYS_IPC_RECV: u32 = 15;
    pub const SYS_SBRK: u32 = 16;
}

/// System call error codes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// Unspecified or unknown problem
    Unspecified = -1,
    /// Environment doesn't exist or caller lacks permission
    BadEnv = -2,
    /// Invalid argument
    Inval = -3,
    /// Out of physical memory
    NoMem = -4,
    /// No free environment slot
    NoFreeEnv = -5,
    /// Bad user memory access; the caller has been destroyed
    Fault = -6,
    /// Receiver can never be ready
    IpcNotRecv = -7,
}

impl SyscallError {
    /// Negative code handed back to user space.
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl core::fmt::Display for SyscallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified error"),
            Self::BadEnv => write!(f, "bad environment"),
            Self::Inval => write!(f, "invalid parameter"),
            Self::NoMem => write!(f, "out of memory"),
            Self::NoFreeEnv => write!(f, "out of environments"),
            Self::Fault => write!(f, "segmentation fault"),
            Self::IpcNotRecv => write!(f, "env is not recving"),
        }
    }
}

impl From<MappingError> for SyscallError {
    fn from(err: MappingError) -> Self {
        match err {
            MappingError::OutOfMemory => Self::NoMem,
            MappingError::MisalignedAddress
            | MappingError::NotMapped
            | MappingError::InvalidFrame => Self::Inval,
            MappingError::NoSuchSpace => Self::BadEnv,
        }
    }
}

impl From<RightsError> for SyscallError {
    fn from(_: RightsError) -> Self {
        Self::Inval
    }
}

/// What happens to the caller once a handler finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Resume the caller with this return value.
    Return(i32),
    /// Resume the caller under its saved state as is.
    Resume,
    /// The caller does not continue now (blocked, yielded or gone);
    /// the scheduler picks who runs next.
    Reschedule,
}

/// Result of a syscall handler.
pub type SysResult = Result<Flow, SyscallError>;

/// Dispatch a system call
///
/// # Arguments
/// * `kernel` - Kernel state, with the caller as the current environment
/// * `num` - System call number
/// * `args` - Up to five word-sized arguments
///
/// # Returns
/// What the caller observes: a value (errors become their negative code),
/// a plain resume, or a reschedule.
///
/// # Security
/// - Unknown syscall numbers are rejected with `Inval`
/// - Each handler validates its own arguments
pub fn dispatch<M, S, C>(kernel: &mut Kernel<M, S, C>, num: u32, args: [u32; 5]) -> Flow
where
    M: MemoryManager,
    S: Scheduler,
    C: Console,
{
    use numbers::*;

    let [a1, a2, a3, a4, a5] = args;
    let result = match num {
        SYS_CPUTS => kernel.sys_cputs(VirtAddr::new(a1 as usize), a2 as usize),
        SYS_CGETC => kernel.sys_cgetc(),
        SYS_GETENVID => kernel.sys_getenvid(),
        SYS_ENV_DESTROY => kernel.sys_env_destroy(EnvId::from_raw(a1)),
        SYS_MAP_KERNEL_PAGE => kernel.sys_map_kernel_page(a1 as usize, VirtAddr::new(a2 as usize)),
        SYS_YIELD => kernel.sys_yield(),
        SYS_EXOFORK => kernel.sys_exofork(),
        SYS_ENV_SET_STATUS => kernel.sys_env_set_status(EnvId::from_raw(a1), a2),
        SYS_ENV_SET_TRAPFRAME => {
            kernel.sys_env_set_trapframe(EnvId::from_raw(a1), VirtAddr::new(a2 as usize))
        }
        SYS_ENV_SET_PGFAULT_UPCALL => {
            kernel.sys_env_set_pgfault_upcall(EnvId::from_raw(a1), VirtAddr::new(a2 as usize))
        }
        SYS_EXEC_COMMIT => kernel.sys_exec_commit(EnvId::from_raw(a1)),
        SYS_PAGE_ALLOC => kernel.sys_page_alloc(EnvId::from_raw(a1), VirtAddr::new(a2 as usize), a3),
        SYS_PAGE_MAP => kernel.sys_page_map(
            EnvId::from_raw(a1),
            VirtAddr::new(a2 as usize),
            EnvId::from_raw(a3),
            VirtAddr::new(a4 as usize),
            a5,
        ),
        SYS_PAGE_UNMAP => kernel.sys_page_unmap(EnvId::from_raw(a1), VirtAddr::new(a2 as usize)),
        SYS_IPC_TRY_SEND => {
            kernel.sys_ipc_try_send(EnvId::from_raw(a1), a2, VirtAddr::new(a3 as usize), a4)
        }
        SYS_IPC_RECV => kernel.sys_ipc_recv(VirtAddr::new(a1 as usize)),
        SYS_SBRK => kernel.sys_sbrk(a1),
        _ => {
            warn!("[SYSCALL] Unknown syscall: {}", num);
            Err(SyscallError::Inval)
        }
    };

    match result {
        Ok(flow) => flow,
        Err(err) => {
            debug!("[SYSCALL] {} failed: {}", num, err);
            Flow::Return(err.code())
        }
    }
}

impl<M: MemoryManager, S: Scheduler, C: Console> Kernel<M, S, C> {
    /// Print a string to the system console.
    ///
    /// # Security
    /// - The whole range must be readable by the caller; otherwise the
    ///   caller is destroyed
    pub(crate) fn sys_cputs(&mut self, s: VirtAddr, len: usize) -> SysResult {
        let cur = self.cur_slot()?;
        let range = self.user_mem_assert(cur, s, len, Access::Read)?;
        let bytes = range.copy_in(&self.mem, self.envs.get(cur))?;
        self.console.write_bytes(&bytes);
        Ok(Flow::Return(0))
    }

    /// Read a character from the console without blocking.
    ///
    /// Returns the character, or 0 if there is no input waiting.
    pub(crate) fn sys_cgetc(&mut self) -> SysResult {
        Ok(Flow::Return(self.console.read_byte().map_or(0, i32::from)))
    }

    /// Returns the current environment's id.
    pub(crate) fn sys_getenvid(&mut self) -> SysResult {
        let cur = self.cur_slot()?;
        Ok(Flow::Return(self.envs.get(cur).id().raw() as i32))
    }

    /// Give up the CPU; the caller stays runnable and later sees 0.
    pub(crate) fn sys_yield(&mut self) -> SysResult {
        let cur = self.cur_slot()?;
        self.envs.get_mut(cur).pending_result = Some(0);
        Ok(Flow::Reschedule)
    }
}

#[cfg(test)]
mod tests {
    use super::numbers::*;
    use super::*;
    use crate::mm::{Perm, PAGE_SIZE};
    use crate::testing::{boot, ret, write_user};

    #[test]
    fn test_unknown_syscall_is_inval() {
        let (mut k, _) = boot(16);
        assert_eq!(ret(k.syscall(999, [0; 5])), SyscallError::Inval.code());
    }

    #[test]
    fn test_getenvid() {
        let (mut k, root) = boot(16);
        assert_eq!(ret(k.syscall(SYS_GETENVID, [0; 5])), root.raw() as i32);
    }

    #[test]
    fn test_cputs_writes_console() {
        let (mut k, root) = boot(16);
        let va = 0x0080_0000;
        k.sys_page_alloc(EnvId::NONE, VirtAddr::new(va), Perm::USER_RW.bits())
            .unwrap();
        write_user(&mut k, root, va + 10, b"hello");

        let r = k.syscall(SYS_CPUTS, [(va + 10) as u32, 5, 0, 0, 0]);
        assert_eq!(ret(r), 0);
        assert_eq!(k.console().output(), b"hello");
    }

    #[test]
    fn test_cputs_bad_pointer_destroys_caller() {
        let (mut k, root) = boot(16);
        let r = k.syscall(SYS_CPUTS, [0x0080_0000, PAGE_SIZE as u32, 0, 0, 0]);
        assert!(r.is_none());
        assert!(k.env(root).is_none());
        assert!(k.console().output().is_empty());
    }

    #[test]
    fn test_cgetc() {
        let (mut k, _) = boot(16);
        assert_eq!(ret(k.syscall(SYS_CGETC, [0; 5])), 0);
        k.console_mut().push_input(b"x");
        assert_eq!(ret(k.syscall(SYS_CGETC, [0; 5])), b'x' as i32);
    }

    #[test]
    fn test_yield_returns_zero_to_sole_env() {
        let (mut k, root) = boot(16);
        let r = k.syscall(SYS_YIELD, [0; 5]).unwrap();
        assert_eq!(r.env, root);
        assert_eq!(r.frame.return_value(), 0);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SyscallError::BadEnv.code(), -2);
        assert_eq!(SyscallError::from(MappingError::OutOfMemory), SyscallError::NoMem);
        assert_eq!(SyscallError::from(MappingError::NotMapped), SyscallError::Inval);
    }
}
