//! Storage adapter abstraction
//!
//! An adapter is the only place where bytes meet a backend. The pipeline never
//! talks to a filesystem or an object store directly; it asks the adapter for a
//! write stream (upload), a read stream (download) or a removal.
//!
//! # Features
//!
//! - **Lazy streams**: stream construction is synchronous and never does I/O;
//!   files are opened and connections established on first use
//! - **Errors as data**: stream failures travel as `io::Error` wrapping an [`AdapterError`]
//! - **Pluggable**: built-in adapters are pre-registered in [`AdapterRegistry`]
//!
//! # Examples
//!
//! ```no_run
//! use conduit::adapter::{Adapter, LocalAdapter, WriteStream};
//! use bytes::Bytes;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = LocalAdapter::with_root("/tmp/conduit");
//!     let mut sink = adapter.create_write_stream("docs/readme.txt", &json!({}));
//!     sink.write(Bytes::from_static(b"hello")).await?;
//!     sink.close().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod types;

mod local;
mod memory;
mod registry;

#[cfg(feature = "object-store")]
mod object_storage;

pub use error::{AdapterError, AdapterResult};
pub use local::LocalAdapter;
pub use memory::MemoryAdapter;
pub use registry::{AdapterFactory, AdapterRegistry};
pub use types::{bytes_stream, reader_stream, ByteStream, ReadStream, WriteStream, WriterStream};

#[cfg(feature = "object-store")]
pub use object_storage::{ObjectStoreAdapter, ObjectStoreConfig, StoreConnector, StoreProvider};

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use serde_json::Value;

/// Storage backend contract
///
/// Implementations must be `Send + Sync`: one adapter instance is shared by every
/// pipeline of a facade and by concurrent transfers.
///
/// # Example Implementation
///
/// ```ignore
/// use conduit::adapter::{Adapter, AdapterResult, ReadStream, WriteStream};
/// use async_trait::async_trait;
/// use serde_json::Value;
///
/// struct MyAdapter;
///
/// #[async_trait]
/// impl Adapter for MyAdapter {
///     fn identity(&self) -> &str { "my-adapter" }
///     fn create_write_stream(&self, location: &str, options: &Value) -> Box<dyn WriteStream> { todo!() }
///     fn create_read_stream(&self, location: &str, options: &Value) -> ReadStream { todo!() }
///     async fn remove(&self, location: &str) -> AdapterResult<()> { todo!() }
/// }
/// ```
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable name of the adapter
    ///
    /// Also the key under which per-call adapter options are looked up.
    fn identity(&self) -> &str;

    /// Open a write stream for `location`
    ///
    /// Must not perform I/O. Failures (missing directories that cannot be
    /// created, a connection that cannot be made) surface from `write` or `close`.
    fn create_write_stream(&self, location: &str, options: &Value) -> Box<dyn WriteStream>;

    /// Open a read stream for `location`
    ///
    /// Must not perform I/O. A missing location surfaces as the first stream item,
    /// with `io::ErrorKind::NotFound`.
    fn create_read_stream(&self, location: &str, options: &Value) -> ReadStream;

    /// Remove the object stored at `location`
    async fn remove(&self, location: &str) -> AdapterResult<()>;
}

/// An adapter type that can be built from configuration
///
/// Lets a facade be created from the type alone (`Conduit::with_kind::<LocalAdapter>`)
/// and lets [`AdapterRegistry`] register it without a hand-written factory.
pub trait AdapterKind: Adapter + Sized + 'static {
    /// Identity every instance of this kind reports
    const IDENTITY: &'static str;

    /// Build an instance from its JSON configuration
    fn from_config(config: &Value) -> AdapterResult<Self>;
}

/// A read stream that yields a single error
///
/// For adapters that can only detect a problem once asked for a stream.
pub fn failed_read_stream(err: AdapterError) -> ReadStream {
    Box::pin(stream::once(async move { Err(io::Error::from(err)) }))
}

/// A write stream that refuses every write and close with the same error
pub struct FailedWriteStream {
    error: Option<io::Error>,
    kind: io::ErrorKind,
    message: String,
}

impl FailedWriteStream {
    pub fn new(error: AdapterError) -> Self {
        let error = io::Error::from(error);
        Self {
            kind: error.kind(),
            message: error.to_string(),
            error: Some(error),
        }
    }

    fn fail(&mut self) -> io::Error {
        self.error
            .take()
            .unwrap_or_else(|| io::Error::new(self.kind, self.message.clone()))
    }
}

#[async_trait]
impl WriteStream for FailedWriteStream {
    async fn write(&mut self, _data: Bytes) -> io::Result<()> {
        Err(self.fail())
    }

    async fn close(&mut self) -> io::Result<()> {
        Err(self.fail())
    }
}

/// Deserialize adapter options, falling back to defaults for `null`
pub(crate) fn parse_options<T>(adapter: &str, options: &Value) -> AdapterResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).map_err(|e| AdapterError::InvalidConfig {
        adapter: adapter.to_string(),
        message: e.to_string(),
    })
}
