//! System Call Entry
//!
//! Where the low-level trap stub hands control to the syscall layer.
//!
//! # Calling Convention
//! | register | on entry       | on exit      |
//! |----------|----------------|--------------|
//! | eax      | syscall number | return value |
//! | edx      | arg 1          |              |
//! | ecx      | arg 2          |              |
//! | ebx      | arg 3          |              |
//! | edi      | arg 4          |              |
//! | esi      | arg 5          |              |
//!
//! # Security Considerations
//! - One lock serializes every system call; a handler never runs
//!   concurrently with another
//! - The caller's registers are saved before dispatch, so a call that blocks
//!   resumes exactly where it trapped

use spin::{Mutex, MutexGuard};

use crate::console::Console;
use crate::env::Trapframe;
use crate::kernel::{Kernel, Resumption};
use crate::mm::MemoryManager;
use crate::sched::Scheduler;

/// The kernel behind the single kernel-wide lock.
pub struct KernelLock<M, S, C> {
    inner: Mutex<Kernel<M, S, C>>,
}

impl<M: MemoryManager, S: Scheduler, C: Console> KernelLock<M, S, C> {
    /// Wrap a kernel.
    pub const fn new(kernel: Kernel<M, S, C>) -> Self {
        Self {
            inner: Mutex::new(kernel),
        }
    }

    /// Take the lock, for boot-time setup and inspection.
    pub fn lock(&self) -> MutexGuard<'_, Kernel<M, S, C>> {
        self.inner.lock()
    }

    /// Handle a system call trapped with register state `frame`.
    ///
    /// Returns what the exit path restores, or `None` if nothing is
    /// runnable and the CPU should idle.
    pub fn sysenter(&self, num: u32, args: [u32; 5], frame: &Trapframe) -> Option<Resumption> {
        let mut kernel = self.inner.lock();
        kernel.capture(frame);
        kernel.syscall(num, args)
    }

    /// Decode the syscall registers of `frame` and handle the call.
    pub fn trap_syscall(&self, frame: &Trapframe) -> Option<Resumption> {
        let regs = &frame.regs;
        let args = [regs.edx, regs.ecx, regs.ebx, regs.edi, regs.esi];
        self.sysenter(regs.eax, args, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::console::BufferConsole;
    use crate::env::EnvId;
    use crate::mm::HostMemory;
    use crate::sched::RoundRobin;
    use crate::syscall::numbers::*;

    fn booted() -> (KernelLock<HostMemory, RoundRobin, BufferConsole>, Resumption) {
        let kernel =
            Kernel::new(KernelConfig::new(), HostMemory::new(16), RoundRobin, BufferConsole::new()).unwrap();
        let lock = KernelLock::new(kernel);
        let start = {
            let mut k = lock.lock();
            let root = k.create_env(EnvId::NONE, 0x0080_0020, 0xEEBF_E000).unwrap();
            k.run(root).unwrap()
        };
        (lock, start)
    }

    #[test]
    fn test_trap_decodes_registers() {
        let (lock, start) = booted();
        let mut frame = start.frame;
        frame.regs.eax = SYS_GETENVID;
        frame.eip = 0x0080_0040;

        let r = lock.trap_syscall(&frame).unwrap();
        assert_eq!(r.env, start.env);
        assert_eq!(r.frame.return_value(), start.env.raw() as i32);
        assert_eq!(r.frame.eip, 0x0080_0040);
    }

    #[test]
    fn test_trap_passes_arguments_in_order() {
        let (lock, start) = booted();
        let mut frame = start.frame;
        frame.regs.eax = SYS_PAGE_ALLOC;
        frame.regs.edx = 0;
        frame.regs.ecx = 0x0080_0000;
        frame.regs.ebx = 0x7;

        assert_eq!(lock.trap_syscall(&frame).unwrap().frame.return_value(), 0);
        let k = lock.lock();
        let space = k.env(start.env).unwrap().space().unwrap();
        assert!(k.memory().lookup(space, crate::mm::VirtAddr::new(0x0080_0000)).is_some());
    }

    #[test]
    fn test_blocked_receiver_resumes_at_trap_point() {
        let (lock, start) = booted();
        let other = {
            let mut k = lock.lock();
            k.create_env(EnvId::NONE, 0x0090_0000, 0xEEBF_E000).unwrap()
        };

        let mut frame = start.frame;
        frame.regs.eax = SYS_IPC_RECV;
        frame.regs.edx = crate::mm::UTOP as u32;
        frame.eip = 0x0080_0066;
        let r = lock.trap_syscall(&frame).unwrap();
        assert_eq!(r.env, other);

        let mut frame = r.frame;
        frame.regs.eax = SYS_IPC_TRY_SEND;
        frame.regs.edx = start.env.raw();
        frame.regs.ecx = 99;
        frame.regs.ebx = crate::mm::UTOP as u32;
        assert_eq!(lock.trap_syscall(&frame).unwrap().env, other);

        frame.regs.eax = SYS_YIELD;
        let r = lock.trap_syscall(&frame).unwrap();
        assert_eq!(r.env, start.env);
        assert_eq!(r.frame.eip, 0x0080_0066);
        assert_eq!(r.frame.return_value(), 0);
        assert_eq!(lock.lock().env(start.env).unwrap().ipc().value, 99);
    }
}
