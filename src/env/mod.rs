//! Environments
//!
//! An environment is the unit of isolation and scheduling: one address
//! space, one saved register snapshot, one slot in the environment table.
//!
//! # Design
//! - Records live in a fixed arena, never behind pointers
//! - Ids carry a generation, so stale references fail lookup

pub mod id;
mod lifecycle;
pub mod table;
pub mod trapframe;

pub use id::{EnvId, MAX_ENVS};
pub use table::{Env, EnvStatus, EnvTable};
pub use trapframe::Trapframe;
