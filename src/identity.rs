//! Identity validation for adapters and transforms
//!
//! Identities key both the per-call options map and the transfer report, so
//! they must be usable as plain map keys and must not shadow the report's own
//! fields.

use crate::error::{ConduitError, IdentityKind, Result};

/// Keys owned by [`TransferReport`](crate::pipeline::TransferReport) and
/// [`TransferOptions`](crate::pipeline::TransferOptions)
pub const RESERVED: &[&str] = &["location", "adapter", "transforms", "directory", "name"];

/// Check that `identity` is usable
///
/// # Errors
///
/// Returns `ConduitError::InvalidIdentity` when the identity is empty, contains
/// whitespace or `/`, or is one of the [`RESERVED`] keys.
pub fn validate(kind: IdentityKind, identity: &str) -> Result<()> {
    let reason = if identity.is_empty() {
        Some("identity is empty")
    } else if identity.chars().any(char::is_whitespace) {
        Some("identity contains whitespace")
    } else if identity.contains('/') {
        Some("identity contains '/'")
    } else if RESERVED.contains(&identity) {
        Some("identity is a reserved key")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConduitError::InvalidIdentity {
            kind,
            identity: identity.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
