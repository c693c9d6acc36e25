/*!
 * Stream transforms
 *
 * A transform wraps the byte stream flowing between a source and a sink. A new
 * transform instance is created for every stage of every transfer, so per-stream
 * state (running hashes, byte counters, progress stats) never leaks between
 * transfers.
 *
 * Built-in transforms:
 * - [`Checksum`]: digest of all bytes that passed through
 * - [`Compress`]: gzip, deflate or zstd (de)compression
 * - [`Progress`]: byte counting with live progress events
 */

pub mod checksum;
pub mod compress;
pub mod progress;
pub mod registry;

pub use checksum::{Checksum, ChecksumAlgorithm, DigestEncoding};
pub use compress::{Compress, CompressionAlgorithm, CompressionMode};
pub use progress::{Progress, ProgressEvent, ProgressPublisher, ProgressSubscriber};
pub use registry::{TransformFactory, TransformRegistry};

use crate::adapter::ByteStream;
use crate::error::{ConduitError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Which way bytes are flowing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Caller source to adapter write stream
    Upload,
    /// Adapter read stream to caller destination
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Per-stage context handed to [`Transform::transform`]
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub direction: Direction,
    /// Normalised location of the transfer
    pub location: &'a str,
    /// Effective options: registration options overlaid by per-call options
    pub options: &'a Value,
}

/// A stream transform stage
///
/// # Example Implementation
///
/// ```ignore
/// use conduit::transform::{StageContext, Transform};
/// use conduit::adapter::ByteStream;
/// use serde_json::Value;
///
/// struct Passthrough;
///
/// impl Transform for Passthrough {
///     fn identity(&self) -> &str { "passthrough" }
///     fn transform(&mut self, upstream: ByteStream, _ctx: &StageContext<'_>) -> conduit::Result<ByteStream> {
///         Ok(upstream)
///     }
///     fn results(&mut self) -> Value { Value::Null }
/// }
/// ```
pub trait Transform: Send {
    /// Stable name; keys this stage's options and report entry
    fn identity(&self) -> &str;

    /// Wrap `upstream`
    ///
    /// Called once per instance. The returned stream must forward every upstream
    /// error. Returning `Err` aborts the transfer before any I/O starts.
    fn transform(&mut self, upstream: ByteStream, ctx: &StageContext<'_>) -> Result<ByteStream>;

    /// Side result of this stage
    ///
    /// Called once, after the sink has completed.
    fn results(&mut self) -> Value;
}

/// A transform type that can be registered by type
pub trait TransformKind: Transform + Sized + 'static {
    const IDENTITY: &'static str;

    /// Build an instance from its registration options
    fn new(options: &Value) -> Result<Self>;
}

/// Deserialize transform options, treating `null` as "all defaults"
pub(crate) fn parse_options<T>(identity: &str, options: &Value) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).map_err(|e| ConduitError::invalid_options(identity, e))
}

/// Lock shared stage state, recovering from a panicked holder
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Opts {
        level: u32,
    }

    #[test]
    fn test_parse_options_reports_identity() {
        let err = parse_options::<Opts>("compress", &json!({ "level": "max" })).unwrap_err();
        assert!(matches!(err, ConduitError::InvalidOptions { ref identity, .. } if identity == "compress"));

        let opts: Opts = parse_options("compress", &Value::Null).unwrap();
        assert_eq!(opts.level, 0);
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Direction::Upload).unwrap(), json!("upload"));
        assert_eq!(Direction::Download.to_string(), "download");
    }
}
