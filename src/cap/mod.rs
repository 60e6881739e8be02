//! Capability Checks
//!
//! The two questions asked before any system call mutates state:
//! may the caller act on this environment, and may it ask for these
//! mapping rights.
//!
//! # Security Properties
//! - Environment ids cannot be forged into access: stale ids never resolve
//!   thanks to generation numbers, and ownership is checked against the
//!   parent link
//! - Rights can only be reduced, never increased

pub mod ownership;
pub mod rights;

pub use ownership::Ownership;
pub use rights::{check_narrowing, check_syscall_perm, RightsError};
