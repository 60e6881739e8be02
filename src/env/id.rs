//! Environment Identifiers
//!
//! An id names one *incarnation* of an environment slot:
//! ```text
//! ┌───────────────────────────────┬──────────────┐
//! │ 31         generation      12 │ 11   slot  0 │
//! └───────────────────────────────┴──────────────┘
//! ```
//! Every allocation of a slot bumps the generation, so an id held by some
//! other environment after the slot was freed and reused no longer matches
//! and simply fails lookup, like a revoked capability.

use core::fmt;

/// Bits reserved for the slot index.
pub const ENV_GEN_SHIFT: u32 = 12;

/// Largest environment table the id layout supports.
pub const MAX_ENVS: usize = 1 << ENV_GEN_SHIFT;

const SLOT_MASK: u32 = (1 << ENV_GEN_SHIFT) - 1;

/// Generation-tagged environment identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EnvId(u32);

impl EnvId {
    /// The null id. As a syscall argument it means "the caller"; as a parent
    /// id it marks a root environment.
    pub const NONE: Self = Self(0);

    /// Wrap a raw id, typically a syscall argument.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value, as returned to user space.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Check for the null id.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Table slot encoded in this id.
    #[inline]
    pub const fn slot(self) -> usize {
        (self.0 & SLOT_MASK) as usize
    }

    /// Id for the next incarnation of `slot`, whose previous occupant had
    /// id `prev`.
    ///
    /// The generation never wraps into the sign bit, so ids stay positive
    /// when handed back through a signed return register.
    pub(crate) fn next_generation(prev: EnvId, slot: usize) -> Self {
        debug_assert!(slot < MAX_ENVS);
        let mut generation = prev.0.wrapping_add(1 << ENV_GEN_SHIFT) & !SLOT_MASK;
        if generation as i32 <= 0 {
            generation = 1 << ENV_GEN_SHIFT;
        }
        Self(generation | slot as u32)
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:08x})", self.0)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_generation() {
        let id = EnvId::next_generation(EnvId::NONE, 5);
        assert_eq!(id.raw(), 0x1005);
        assert_eq!(id.slot(), 5);
        assert!(!id.is_none());
    }

    #[test]
    fn test_reuse_changes_id() {
        let first = EnvId::next_generation(EnvId::NONE, 7);
        let second = EnvId::next_generation(first, 7);
        assert_ne!(first, second);
        assert_eq!(second.slot(), 7);
        assert_eq!(second.raw(), 0x2007);
    }

    #[test]
    fn test_generation_stays_positive() {
        let last = EnvId::from_raw(0x7FFF_F003);
        let next = EnvId::next_generation(last, 3);
        assert_eq!(next.raw(), 0x1003);
    }
}
