//! Storage locations
//!
//! A location is a relative, `/`-separated path understood by every adapter.
//! Locations are normalised before they reach an adapter: repeated separators
//! and `.` segments are dropped and `..` is resolved. A location may never be
//! empty, absolute, or climb above the storage root.

use crate::error::{ConduitError, Result};
use uuid::Uuid;

/// Build the location for an upload
///
/// `name` defaults to a fresh UUIDv4 when missing or empty.
///
/// # Example
///
/// ```
/// use conduit::location;
///
/// let loc = location::for_upload(Some("avatars/2024"), Some("me.png")).unwrap();
/// assert_eq!(loc, "avatars/2024/me.png");
/// ```
pub fn for_upload(directory: Option<&str>, name: Option<&str>) -> Result<String> {
    let name = match name.filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => Uuid::new_v4().to_string(),
    };

    match directory.filter(|d| !d.is_empty()) {
        Some(directory) => normalize(&format!("{}/{}", directory, name)),
        None => normalize(&name),
    }
}

/// Normalise and validate a location
///
/// # Errors
///
/// Returns `ConduitError::InvalidLocation` if the location is empty, absolute,
/// contains a NUL byte, or resolves outside the storage root.
pub fn normalize(location: &str) -> Result<String> {
    if location.is_empty() {
        return Err(ConduitError::invalid_location(location, "location is empty"));
    }
    if location.starts_with('/') {
        return Err(ConduitError::invalid_location(
            location,
            "location must be relative",
        ));
    }
    if location.contains('\0') {
        return Err(ConduitError::invalid_location(
            location,
            "location contains a NUL byte",
        ));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in location.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(ConduitError::invalid_location(
                        location,
                        "location escapes the storage root",
                    ));
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(ConduitError::invalid_location(
            location,
            "location resolves to the storage root",
        ));
    }

    Ok(segments.join("/"))
}
