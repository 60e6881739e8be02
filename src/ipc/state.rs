//! Per-Environment IPC State
//!
//! Two halves live on every environment:
//! - the *receive* half, describing what it is waiting for and what it got
//! - the *pending send* half, a message it offered to a target that was not
//!   yet receiving

use crate::env::EnvId;
use crate::mm::{Frame, Perm, VirtAddr};

/// A page offered by a queued send.
///
/// The frame is not owned: it stays mapped in the sender's space, and the
/// receiver re-checks that mapping before aliasing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPage {
    /// Address of the page in the sender's space.
    pub va: VirtAddr,
    /// Frame mapped there when the send was queued.
    pub frame: Frame,
    /// Permissions the receiver will get.
    pub perm: Perm,
}

/// A message waiting for its target to call receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSend {
    /// Intended receiver.
    pub target: EnvId,
    /// Scalar payload.
    pub value: u32,
    /// Optional page payload.
    pub page: Option<PendingPage>,
}

/// IPC fields of one environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpcState {
    /// Blocked in receive, waiting for a sender.
    pub receiving: bool,
    /// Where an incoming page should be mapped; `None` refuses pages.
    pub dest: Option<VirtAddr>,
    /// Sender of the last received message.
    pub from: EnvId,
    /// Value of the last received message.
    pub value: u32,
    /// Permissions of the page received with the last message, empty when
    /// no page was transferred.
    pub perm: Perm,
    /// Message this environment is blocked sending.
    pub pending: Option<PendingSend>,
}

impl IpcState {
    /// Record a completed delivery.
    pub(crate) fn deliver(&mut self, from: EnvId, value: u32, perm: Perm) {
        self.receiving = false;
        self.from = from;
        self.value = value;
        self.perm = perm;
    }
}
