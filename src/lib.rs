//! envkernel - Environment, Memory and IPC System Calls
//!
//! The syscall layer of a small exokernel-style teaching kernel. User
//! programs run in *environments*; each owns an address space and asks the
//! kernel, through a fixed table of system calls, to fork, map pages, share
//! them and exchange messages.
//!
//! # Layers
//! - `mm`: addresses, permissions, the page-mapper interface and the
//!   mapping syscalls
//! - `env`: the environment table, register snapshots and lifecycle
//!   syscalls
//! - `ipc`: the send/receive rendezvous
//! - `cap`: ownership and rights checks shared by all of the above
//! - `syscall`: numbers, error codes, dispatch and user-memory validation
//! - `trap`: entry under the kernel-wide lock
//!
//! # Security Features
//! - Every argument is validated before any state changes
//! - Generation-tagged ids: a stale environment id never resolves
//! - Page rights can be narrowed but never widened when shared
//! - Bad user pointers are fatal to the caller, never to the kernel
//!
//! # Platform
//! The crate is `no_std` and links into the kernel image; page tables,
//! scheduling and the console are reached through traits. Host
//! implementations of those traits ship alongside, so the whole layer runs
//! under the ordinary test harness.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod cap;
pub mod config;
pub mod console;
pub mod env;
pub mod ipc;
pub mod kernel;
pub mod mm;
pub mod sched;
pub mod syscall;
pub mod trap;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, KernelConfig};
pub use console::{BufferConsole, Console};
pub use env::{Env, EnvId, EnvStatus, EnvTable, Trapframe};
pub use kernel::{Kernel, Resumption};
pub use mm::{AddressSpace, Frame, HostMemory, MappingError, MemoryManager, Perm, VirtAddr};
pub use sched::{RoundRobin, Scheduler};
pub use syscall::{numbers, Flow, SyscallError};
pub use trap::KernelLock;
