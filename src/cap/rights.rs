//! Mapping Rights
//!
//! Rules for the permission bits a caller may request on a user mapping.
//!
//! # Rules
//! - `PRESENT` and `USER` must be set
//! - `WRITABLE` and the software-available bits may be set
//! - Nothing else may be set
//! - Sharing a page can only narrow rights: a writable alias of a
//!   read-only page is refused

use crate::mm::Perm;

/// Why a permission request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RightsError {
    /// Required bits are missing or forbidden bits are present.
    NotAllowed,
    /// The request asks for more than the source mapping grants.
    Widening,
}

impl core::fmt::Display for RightsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotAllowed => write!(f, "permission bits not allowed"),
            Self::Widening => write!(f, "permission exceeds source mapping"),
        }
    }
}

/// Validate raw permission bits supplied by a system call.
///
/// Returns the typed permission set on success.
pub fn check_syscall_perm(raw: u32) -> Result<Perm, RightsError> {
    let perm = Perm::from_bits_retain(raw);
    if !perm.contains(Perm::USER_PRESENT) || !Perm::SYSCALL.contains(perm) {
        return Err(RightsError::NotAllowed);
    }
    Ok(perm)
}

/// Validate that `requested` does not widen the rights of an existing
/// mapping with permissions `source`.
pub fn check_narrowing(requested: Perm, source: Perm) -> Result<(), RightsError> {
    if requested.contains(Perm::WRITABLE) && !source.contains(Perm::WRITABLE) {
        return Err(RightsError::Widening);
    }
    Ok(())
}
