/*!
 * Conduit - storage-agnostic streaming transfers
 *
 * Upload and download byte streams against interchangeable storage backends,
 * optionally passing the data through an ordered chain of transforms:
 * - Pluggable adapters: local filesystem, in-memory, object storage
 * - Pluggable transforms: checksum, compression, progress monitoring
 * - One report per transfer aggregating every transform's result
 * - First-error-wins failure semantics across every stage
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod adapter;
pub mod conduit;
pub mod config;
pub mod error;
pub mod identity;
pub mod location;
pub mod logging;
pub mod pipeline;
pub mod stats;
pub mod transform;

// Re-export commonly used types
pub use conduit::{Conduit, ConduitBuilder};
pub use config::{ConduitConfig, MiddlewareConfig};
pub use error::{ConduitError, Result, Stage, TransferError};
pub use pipeline::{Pipeline, Removal, Transfer, TransferOptions, TransferReport};
pub use stats::Stats;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
