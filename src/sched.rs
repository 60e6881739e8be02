//! Scheduler Interface
//!
//! The syscall layer decides *when* the running environment gives up the
//! CPU; the scheduler decides *who* runs next.

use crate::env::{EnvStatus, EnvTable};

/// Dispatch policy consulted whenever the caller does not continue.
pub trait Scheduler {
    /// Choose the slot to resume.
    ///
    /// `last` is the slot that ran most recently, if any. Returns
    /// `None` when nothing is runnable.
    fn pick_next(&mut self, envs: &EnvTable, last: Option<usize>) -> Option<usize>;
}

/// Circular scan starting after the last environment that ran.
///
/// The last environment itself is considered only after every other slot,
/// so a yield hands the CPU to someone else whenever possible.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobin;

impl Scheduler for RoundRobin {
    fn pick_next(&mut self, envs: &EnvTable, last: Option<usize>) -> Option<usize> {
        let n = envs.capacity();
        let start = last.map_or(0, |s| s + 1);
        (0..n)
            .map(|i| (start + i) % n)
            .find(|&slot| envs.get(slot).status() == EnvStatus::Runnable)
    }
}
