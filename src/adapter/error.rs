//! Error types for storage adapters
//!
//! Adapters report failures in two ways: `remove()` and construction return
//! [`AdapterError`] directly, while stream failures travel as `io::Error` with the
//! `AdapterError` embedded so callers can downcast to it.

use std::fmt;
use std::io;

/// Result type alias for adapter operations
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Unified error type for adapter operations
#[derive(Debug)]
pub enum AdapterError {
    /// I/O error occurred during adapter operation
    Io(io::Error),

    /// Location not found on the backend
    NotFound { location: String, adapter: String },

    /// Permission denied accessing resource
    PermissionDenied { location: String, message: String },

    /// Connection to a remote backend could not be established
    ConnectionFailed {
        adapter: String,
        endpoint: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid configuration for adapter
    InvalidConfig { adapter: String, message: String },

    /// Location cannot be represented on this backend
    InvalidLocation { location: String, reason: String },

    /// Object already exists and overwriting was disabled
    AlreadyExists { location: String },

    /// Generic adapter error with context
    Other { adapter: String, message: String },
}

impl AdapterError {
    /// Check if this error is transient
    ///
    /// The pipeline never retries; this is for callers that do.
    pub fn is_retriable(&self) -> bool {
        match self {
            AdapterError::ConnectionFailed { .. } => true,
            AdapterError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            AdapterError::NotFound { .. }
            | AdapterError::PermissionDenied { .. }
            | AdapterError::InvalidConfig { .. }
            | AdapterError::InvalidLocation { .. }
            | AdapterError::AlreadyExists { .. }
            | AdapterError::Other { .. } => false,
        }
    }

    /// Check if this error indicates the resource was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound { .. })
    }

    /// Get the adapter identity associated with this error, if any
    pub fn adapter_identity(&self) -> Option<&str> {
        match self {
            AdapterError::NotFound { adapter, .. } => Some(adapter),
            AdapterError::ConnectionFailed { adapter, .. } => Some(adapter),
            AdapterError::InvalidConfig { adapter, .. } => Some(adapter),
            AdapterError::Other { adapter, .. } => Some(adapter),
            _ => None,
        }
    }

    /// Map an I/O error against a known location, keeping `NotFound` and
    /// `PermissionDenied` specific
    pub fn from_io(err: io::Error, location: &str, adapter: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => AdapterError::NotFound {
                location: location.to_string(),
                adapter: adapter.to_string(),
            },
            io::ErrorKind::PermissionDenied => AdapterError::PermissionDenied {
                location: location.to_string(),
                message: err.to_string(),
            },
            io::ErrorKind::AlreadyExists => AdapterError::AlreadyExists {
                location: location.to_string(),
            },
            _ => AdapterError::Io(err),
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            AdapterError::Io(e) => e.kind(),
            AdapterError::NotFound { .. } => io::ErrorKind::NotFound,
            AdapterError::PermissionDenied { .. } => io::ErrorKind::PermissionDenied,
            AdapterError::ConnectionFailed { .. } => io::ErrorKind::ConnectionRefused,
            AdapterError::InvalidConfig { .. } | AdapterError::InvalidLocation { .. } => {
                io::ErrorKind::InvalidInput
            }
            AdapterError::AlreadyExists { .. } => io::ErrorKind::AlreadyExists,
            AdapterError::Other { .. } => io::ErrorKind::Other,
        }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Io(err) => write!(f, "I/O error: {}", err),
            AdapterError::NotFound { location, adapter } => {
                write!(f, "Location not found on {}: {}", adapter, location)
            }
            AdapterError::PermissionDenied { location, message } => {
                write!(f, "Permission denied for {}: {}", location, message)
            }
            AdapterError::ConnectionFailed {
                adapter,
                endpoint,
                source,
            } => {
                if let Some(src) = source {
                    write!(
                        f,
                        "Connection to {} ({}) failed: {}",
                        adapter, endpoint, src
                    )
                } else {
                    write!(f, "Connection to {} ({}) failed", adapter, endpoint)
                }
            }
            AdapterError::InvalidConfig { adapter, message } => {
                write!(f, "Invalid configuration for {}: {}", adapter, message)
            }
            AdapterError::InvalidLocation { location, reason } => {
                write!(f, "Invalid location {}: {}", location, reason)
            }
            AdapterError::AlreadyExists { location } => {
                write!(f, "Location already exists: {}", location)
            }
            AdapterError::Other { adapter, message } => {
                write!(f, "Adapter error on {}: {}", adapter, message)
            }
        }
    }
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdapterError::Io(err) => Some(err),
            AdapterError::ConnectionFailed {
                source: Some(src), ..
            } => Some(src.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for AdapterError {
    fn from(err: io::Error) -> Self {
        AdapterError::Io(err)
    }
}

// Stream items are io::Result, so adapter failures ride inside io::Error
impl From<AdapterError> for io::Error {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Io(e) => e,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retriable() {
        let err = AdapterError::ConnectionFailed {
            adapter: "object-store".to_string(),
            endpoint: "gcs://bucket".to_string(),
            source: None,
        };
        assert!(err.is_retriable());

        let err = AdapterError::NotFound {
            location: "missing.txt".to_string(),
            adapter: "local".to_string(),
        };
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = AdapterError::InvalidConfig {
            adapter: "local".to_string(),
            message: "root must be a string".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration for local: root must be a string"
        );
    }

    #[test]
    fn test_from_io_maps_not_found() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = AdapterError::from_io(io_err, "a/b.txt", "local");
        assert!(err.is_not_found());
        assert_eq!(err.adapter_identity(), Some("local"));
    }

    #[test]
    fn test_into_io_error_is_downcastable() {
        let err = AdapterError::NotFound {
            location: "a.txt".to_string(),
            adapter: "memory".to_string(),
        };
        let io_err: io::Error = err.into();

        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
        let inner = io_err
            .get_ref()
            .and_then(|e| e.downcast_ref::<AdapterError>())
            .unwrap();
        assert!(inner.is_not_found());
    }

    #[test]
    fn test_plain_io_passes_through() {
        let err = AdapterError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(io_err.to_string(), "closed");
    }
}
