/*!
 * Error types for Conduit
 *
 * Two families of errors exist and they never mix:
 * - [`ConduitError`]: configuration mistakes, returned synchronously before any I/O starts
 * - [`TransferError`]: failures raised while bytes are moving, delivered through the
 *   transfer future
 */

use std::fmt;
use std::io;

use thiserror::Error;

use crate::adapter::AdapterError;

pub type Result<T> = std::result::Result<T, ConduitError>;

/// Configuration and setup errors
///
/// These indicate programmer error and are never retried.
#[derive(Error, Debug)]
pub enum ConduitError {
    /// A facade or pipeline was built without a storage adapter
    #[error("A configured adapter is required to operate")]
    MissingAdapter,

    /// An adapter or transform declared an unusable identity
    #[error("{kind} '{identity}' does not declare a valid identity: {reason}")]
    InvalidIdentity {
        kind: IdentityKind,
        identity: String,
        reason: String,
    },

    /// No adapter factory is registered under the requested identity
    #[error("Cannot find adapter '{0}' - is it registered?")]
    UnknownAdapter(String),

    /// `use_transform` referenced an identity missing from the registry
    #[error("Transform {0} is not registered")]
    TransformNotRegistered(String),

    /// The same transform was added twice to one pipeline
    #[error("Transform {0} is already used by this pipeline")]
    DuplicateTransform(String),

    /// Location is empty, absolute or escapes the storage root
    #[error("Invalid location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },

    /// A transform rejected its options
    #[error("Invalid options for {identity}: {message}")]
    InvalidOptions { identity: String, message: String },

    /// Adapter construction failed
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Configuration file or value error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConduitError {
    pub(crate) fn invalid_options(identity: &str, message: impl fmt::Display) -> Self {
        ConduitError::InvalidOptions {
            identity: identity.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn invalid_location(location: &str, reason: impl Into<String>) -> Self {
        ConduitError::InvalidLocation {
            location: location.to_string(),
            reason: reason.into(),
        }
    }
}

/// Which kind of pluggable unit an identity belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Adapter,
    Transform,
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKind::Adapter => write!(f, "Adapter"),
            IdentityKind::Transform => write!(f, "Transform"),
        }
    }
}

/// The participant of a transfer chain that raised an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Upload source stream or adapter read stream
    Source,
    /// A transform stage, by identity
    Transform(String),
    /// Adapter write stream or download destination
    Sink,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Source => write!(f, "source"),
            Stage::Transform(identity) => write!(f, "transform '{}'", identity),
            Stage::Sink => write!(f, "sink"),
        }
    }
}

/// A failure raised while data was flowing through a transfer chain
///
/// The original `io::Error` is kept as-is; `stage` only records who raised it.
#[derive(Error, Debug)]
#[error("Transfer failed at {stage}: {source}")]
pub struct TransferError {
    pub stage: Stage,
    #[source]
    pub source: io::Error,
}

impl TransferError {
    pub fn new(stage: Stage, source: io::Error) -> Self {
        Self { stage, source }
    }

    /// Error kind of the underlying I/O error
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    /// Give back the original error raised by the stage
    pub fn into_inner(self) -> io::Error {
        self.source
    }

    /// Downcast the original error to the adapter error that caused it, if any
    pub fn adapter_error(&self) -> Option<&AdapterError> {
        self.source
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<AdapterError>())
    }
}
