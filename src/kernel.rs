//! Kernel State
//!
//! Everything the syscall layer mutates lives in one [`Kernel`]: the
//! environment table, the memory manager, the scheduler and the console.
//! A single lock around it (see [`crate::trap::KernelLock`]) serializes all
//! system calls, so multi-record operations such as the IPC handshake or
//! exec-commit's address-space swap are all-or-nothing.
//!
//! # Resumption
//! Every environment carries a pending result. Whoever decides what a
//! suspended call returns (a handler finishing synchronously, a sender
//! completing a receive, fork preparing a child) stores it there; the
//! resume path loads it into the return register.

use log::{debug, info};

use crate::config::{ConfigError, KernelConfig};
use crate::console::Console;
use crate::env::{Env, EnvId, EnvStatus, EnvTable, Trapframe};
use crate::mm::MemoryManager;
use crate::sched::Scheduler;
use crate::syscall::{self, Flow, SyscallError};

/// What the trap-exit path restores next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resumption {
    /// Environment to run.
    pub env: EnvId,
    /// Register state to restore, return value already loaded.
    pub frame: Trapframe,
}

/// The syscall layer's state.
pub struct Kernel<M, S, C> {
    pub(crate) config: KernelConfig,
    pub(crate) envs: EnvTable,
    pub(crate) mem: M,
    pub(crate) sched: S,
    pub(crate) console: C,
    /// Slot of the environment whose system call is executing, or that ran
    /// most recently.
    pub(crate) current: Option<usize>,
}

impl<M: MemoryManager, S: Scheduler, C: Console> Kernel<M, S, C> {
    /// Create a kernel with an empty environment table.
    pub fn new(config: KernelConfig, mem: M, sched: S, console: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            envs: EnvTable::new(config.env_capacity()),
            config,
            mem,
            sched,
            console,
            current: None,
        })
    }

    /// Create a runnable environment at boot.
    ///
    /// The environment gets a fresh address space, a user-mode register
    /// snapshot starting at `entry` and the configured heap base.
    pub fn create_env(&mut self, parent: EnvId, entry: u32, stack_top: u32) -> Result<EnvId, SyscallError> {
        let slot = self.alloc_env(parent)?;
        let env = self.envs.get_mut(slot);
        env.tf = Trapframe::new_user(entry, stack_top);
        env.status = EnvStatus::Runnable;
        info!("[{}] new env {}", parent, env.id);
        Ok(env.id)
    }

    /// Claim a slot and an empty address space. The new environment is
    /// `NotRunnable`, with its heap break at the configured base.
    pub(crate) fn alloc_env(&mut self, parent: EnvId) -> Result<usize, SyscallError> {
        let slot = self.envs.find_free().ok_or(SyscallError::NoFreeEnv)?;
        let space = self.mem.create_space()?;
        self.envs.occupy(slot, parent, space);
        self.envs.get_mut(slot).heap_break = self.config.heap_base();
        Ok(slot)
    }

    /// Make the environment named by `id` current and resume it.
    pub fn run(&mut self, id: EnvId) -> Result<Resumption, SyscallError> {
        let slot = self.envs.resolve(id).ok_or(SyscallError::BadEnv)?;
        Ok(self.resume(slot))
    }

    /// Store the register snapshot captured at kernel entry.
    pub fn capture(&mut self, frame: &Trapframe) {
        if let Some(slot) = self.current {
            let env = self.envs.get_mut(slot);
            if env.is_live() {
                env.tf = *frame;
            }
        }
    }

    /// Run one system call for the current environment.
    ///
    /// Returns what to resume afterwards, or `None` when nothing is
    /// runnable.
    pub fn syscall(&mut self, num: u32, args: [u32; 5]) -> Option<Resumption> {
        let Some(slot) = self.current else {
            return self.reschedule();
        };
        let caller = self.envs.get(slot).id;

        let flow = syscall::dispatch(self, num, args);

        // The caller may have destroyed itself, or been destroyed for a
        // protection violation.
        if self.envs.resolve(caller) != Some(slot) {
            return self.reschedule();
        }

        match flow {
            Flow::Return(value) => {
                self.envs.get_mut(slot).pending_result = Some(value);
                Some(self.resume(slot))
            }
            Flow::Resume => Some(self.resume(slot)),
            Flow::Reschedule => self.reschedule(),
        }
    }

    /// Ask the scheduler for the next environment and resume it.
    pub(crate) fn reschedule(&mut self) -> Option<Resumption> {
        match self.sched.pick_next(&self.envs, self.current) {
            Some(slot) => Some(self.resume(slot)),
            None => {
                debug!("no runnable environments");
                self.current = None;
                None
            }
        }
    }

    /// Resume the environment in `slot`, delivering its pending result.
    pub(crate) fn resume(&mut self, slot: usize) -> Resumption {
        let env = self.envs.get_mut(slot);
        if let Some(value) = env.pending_result.take() {
            env.tf.set_return(value);
        }
        env.runs += 1;
        if let Some(space) = env.space.as_ref() {
            self.mem.activate(space);
        }
        self.current = Some(slot);
        Resumption {
            env: env.id,
            frame: env.tf,
        }
    }

    /// Slot of the calling environment.
    pub(crate) fn cur_slot(&self) -> Result<usize, SyscallError> {
        self.current
            .filter(|&slot| self.envs.get(slot).is_live())
            .ok_or(SyscallError::BadEnv)
    }

    /// Id of the current environment.
    pub fn current_id(&self) -> Option<EnvId> {
        self.cur_slot().ok().map(|slot| self.envs.get(slot).id)
    }

    /// Live environment named by `id`.
    pub fn env(&self, id: EnvId) -> Option<&Env> {
        self.envs.lookup(id)
    }

    /// The environment table.
    pub fn envs(&self) -> &EnvTable {
        &self.envs
    }

    /// Configuration in force.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The memory manager.
    pub fn memory(&self) -> &M {
        &self.mem
    }

    /// Mutable access to the memory manager.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    /// The console.
    pub fn console(&self) -> &C {
        &self.console
    }

    /// Mutable access to the console.
    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::BufferConsole;
    use crate::mm::HostMemory;
    use crate::sched::RoundRobin;
    use crate::testing::boot;

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = KernelConfig::new().with_env_capacity(3);
        let k = Kernel::new(cfg, HostMemory::new(4), RoundRobin, BufferConsole::new());
        assert!(matches!(k, Err(ConfigError::CapacityNotPowerOfTwo)));
    }

    #[test]
    fn test_create_env_defaults() {
        let (k, root) = boot(16);
        let env = k.env(root).unwrap();
        assert_eq!(env.status(), EnvStatus::Runnable);
        assert_eq!(env.parent_id(), EnvId::NONE);
        assert_eq!(env.heap_break(), KernelConfig::DEFAULT_HEAP_BASE);
        assert_eq!(env.trapframe().cs, 0x1B);
        assert_eq!(k.current_id(), Some(root));
    }

    #[test]
    fn test_table_exhaustion() {
        let cfg = KernelConfig::new().with_env_capacity(2);
        let mut k = Kernel::new(cfg, HostMemory::new(16), RoundRobin, BufferConsole::new()).unwrap();
        k.create_env(EnvId::NONE, 0, 0).unwrap();
        k.create_env(EnvId::NONE, 0, 0).unwrap();
        assert_eq!(k.create_env(EnvId::NONE, 0, 0), Err(SyscallError::NoFreeEnv));
    }

    #[test]
    fn test_out_of_memory_for_address_space() {
        let mut k = Kernel::new(KernelConfig::new(), HostMemory::new(0), RoundRobin, BufferConsole::new())
            .unwrap();
        assert_eq!(k.create_env(EnvId::NONE, 0, 0), Err(SyscallError::NoMem));
        assert_eq!(k.envs().live_count(), 0);
    }

    #[test]
    fn test_resume_delivers_pending_result_once() {
        let (mut k, root) = boot(16);
        let slot = k.envs().resolve(root).unwrap();
        k.envs.get_mut(slot).pending_result = Some(-3);
        let r = k.run(root).unwrap();
        assert_eq!(r.frame.return_value(), -3);
        assert_eq!(k.env(root).unwrap().pending_result(), None);
        assert_eq!(k.memory().active_space(), Some(0));
    }

    #[test]
    fn test_capture_stores_snapshot() {
        let (mut k, root) = boot(16);
        let mut tf = *k.env(root).unwrap().trapframe();
        tf.eip = 0x0080_1234;
        k.capture(&tf);
        assert_eq!(k.env(root).unwrap().trapframe().eip, 0x0080_1234);
    }
}
