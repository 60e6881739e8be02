//! System Call Interface
//!
//! The boundary where environments request address-space manipulation,
//! lifecycle transitions and IPC.
//!
//! # Security Model
//! - Whitelist approach: only explicitly implemented syscalls are allowed
//! - All parameters are validated before use
//! - Invalid inputs return errors, never panic
//! - Bad user memory is fatal to the caller, not to the kernel
//!
//! # Syscalls
//! - console: cputs, cgetc
//! - identity and scheduling: getenvid, yield
//! - lifecycle: exofork, env_destroy, env_set_status, env_set_trapframe,
//!   env_set_pgfault_upcall, exec_commit
//! - memory: page_alloc, page_map, page_unmap, map_kernel_page, sbrk
//! - IPC: ipc_try_send, ipc_recv

mod handler;
mod validate;

pub use handler::{dispatch, numbers, Flow, SysResult, SyscallError};
pub use validate::{check_user_range, Access, AccessViolation, UserRange};
