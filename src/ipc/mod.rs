//! Inter-Environment Communication
//!
//! A rendezvous that moves one word and optionally one shared page between
//! two environments, without requiring both to be runnable at once.

mod rendezvous;
pub mod state;

pub use state::{IpcState, PendingPage, PendingSend};
