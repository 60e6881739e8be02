//! Environment Table
//!
//! A fixed-size arena of environment records, indexed by slot.
//!
//! # Design
//! - Capacity is fixed when the kernel is configured
//! - Free slots form an implicit free list: any record with status `Free`
//! - A freed record keeps its last id so the next incarnation of the slot
//!   gets a fresh generation

use alloc::vec::Vec;

use super::id::{EnvId, MAX_ENVS};
use super::trapframe::Trapframe;
use crate::ipc::IpcState;
use crate::mm::{AddressSpace, VirtAddr};

/// Lifecycle state of an environment slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(u32)]
pub enum EnvStatus {
    /// Slot is unused.
    #[default]
    Free = 0,
    /// Being torn down.
    Dying = 1,
    /// Eligible to run.
    Runnable = 2,
    /// Blocked, or not yet started.
    NotRunnable = 4,
}

impl EnvStatus {
    /// Decode a status passed in a syscall argument.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Free),
            1 => Some(Self::Dying),
            2 => Some(Self::Runnable),
            4 => Some(Self::NotRunnable),
            _ => None,
        }
    }
}

/// One environment record.
#[derive(Debug, Default)]
pub struct Env {
    pub(crate) id: EnvId,
    pub(crate) parent_id: EnvId,
    pub(crate) status: EnvStatus,
    pub(crate) space: Option<AddressSpace>,
    pub(crate) tf: Trapframe,
    pub(crate) heap_break: VirtAddr,
    pub(crate) pgfault_upcall: Option<VirtAddr>,
    /// Value the interrupted system call returns when this environment is
    /// next resumed. `None` leaves the return register untouched.
    pub(crate) pending_result: Option<i32>,
    pub(crate) ipc: IpcState,
    pub(crate) runs: u32,
}

impl Env {
    /// Current id of this slot.
    pub fn id(&self) -> EnvId {
        self.id
    }

    /// Id of the creating environment.
    pub fn parent_id(&self) -> EnvId {
        self.parent_id
    }

    /// Lifecycle state.
    pub fn status(&self) -> EnvStatus {
        self.status
    }

    /// Address space owned by this environment.
    pub fn space(&self) -> Option<&AddressSpace> {
        self.space.as_ref()
    }

    /// Saved register snapshot.
    pub fn trapframe(&self) -> &Trapframe {
        &self.tf
    }

    /// Current top of the heap.
    pub fn heap_break(&self) -> VirtAddr {
        self.heap_break
    }

    /// Page-fault entry point.
    pub fn pgfault_upcall(&self) -> Option<VirtAddr> {
        self.pgfault_upcall
    }

    /// Result queued for the next resume.
    pub fn pending_result(&self) -> Option<i32> {
        self.pending_result
    }

    /// IPC fields.
    pub fn ipc(&self) -> &IpcState {
        &self.ipc
    }

    /// Number of times this environment has been resumed.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    /// Check if the slot currently holds a live environment.
    #[inline]
    pub fn is_live(&self) -> bool {
        !matches!(self.status, EnvStatus::Free | EnvStatus::Dying)
    }
}

/// Fixed-capacity environment arena.
#[derive(Debug)]
pub struct EnvTable {
    envs: Vec<Env>,
}

impl EnvTable {
    /// Create a table with `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity <= MAX_ENVS);
        let mut envs = Vec::with_capacity(capacity);
        envs.resize_with(capacity, Env::default);
        Self { envs }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.envs.len()
    }

    /// Record in `slot`.
    #[inline]
    pub fn get(&self, slot: usize) -> &Env {
        &self.envs[slot]
    }

    /// Mutable record in `slot`.
    #[inline]
    pub(crate) fn get_mut(&mut self, slot: usize) -> &mut Env {
        &mut self.envs[slot]
    }

    /// Two distinct records at once. Returns `None` if `a == b`.
    pub(crate) fn pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut Env, &mut Env)> {
        if a == b {
            return None;
        }
        if a < b {
            let (lo, hi) = self.envs.split_at_mut(b);
            Some((&mut lo[a], &mut hi[0]))
        } else {
            let (lo, hi) = self.envs.split_at_mut(a);
            Some((&mut hi[0], &mut lo[b]))
        }
    }

    /// Slot of the live environment named by `id`.
    ///
    /// Stale ids (freed or reused slots) do not resolve.
    pub fn resolve(&self, id: EnvId) -> Option<usize> {
        let slot = id.slot();
        let env = self.envs.get(slot)?;
        (env.is_live() && env.id == id).then_some(slot)
    }

    /// Live environment named by `id`.
    pub fn lookup(&self, id: EnvId) -> Option<&Env> {
        self.resolve(id).map(|slot| &self.envs[slot])
    }

    /// Find a free slot.
    pub fn find_free(&self) -> Option<usize> {
        self.envs.iter().position(|e| e.status == EnvStatus::Free)
    }

    /// Claim a free slot for a new incarnation.
    ///
    /// The record is reset, given a fresh-generation id and left
    /// `NotRunnable`.
    pub(crate) fn occupy(&mut self, slot: usize, parent: EnvId, space: AddressSpace) -> EnvId {
        let env = &mut self.envs[slot];
        debug_assert_eq!(env.status, EnvStatus::Free);
        let id = EnvId::next_generation(env.id, slot);
        *env = Env {
            id,
            parent_id: parent,
            status: EnvStatus::NotRunnable,
            space: Some(space),
            ..Env::default()
        };
        id
    }

    /// Return a slot to the free list, handing back its address space.
    pub(crate) fn release(&mut self, slot: usize) -> Option<AddressSpace> {
        let env = &mut self.envs[slot];
        let id = env.id;
        let space = env.space.take();
        *env = Env {
            id,
            ..Env::default()
        };
        space
    }

    /// Iterate over live environments with their slots.
    pub fn iter_live(&self) -> impl Iterator<Item = (usize, &Env)> {
        self.envs.iter().enumerate().filter(|(_, e)| e.is_live())
    }

    /// Number of live environments.
    pub fn live_count(&self) -> usize {
        self.iter_live().count()
    }
}
