//! In-memory adapter
//!
//! Keeps every location in a shared map. Useful for tests and dry runs: clones of
//! a [`MemoryAdapter`] see the same objects, so a test can hand one clone to a
//! facade and inspect what was written through another.

use super::error::{AdapterError, AdapterResult};
use super::types::{ReadStream, WriteStream};
use super::{parse_options, Adapter, AdapterKind, FailedWriteStream};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream, TryStreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, PoisonError, RwLock};

const IDENTITY: &str = "memory";

const CHUNK_SIZE: usize = 64 * 1024;

type Objects = Arc<RwLock<HashMap<String, Bytes>>>;

/// In-memory storage adapter
///
/// # Example
///
/// ```rust
/// use conduit::adapter::MemoryAdapter;
///
/// let adapter = MemoryAdapter::new();
/// adapter.add_object("docs/a.txt", b"Hello, World!");
/// assert!(adapter.contains("docs/a.txt"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    objects: Objects,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct MemoryWriteOptions {
    overwrite: bool,
}

impl Default for MemoryWriteOptions {
    fn default() -> Self {
        Self { overwrite: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct MemoryReadOptions {
    chunk_size: usize,
}

impl Default for MemoryReadOptions {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl MemoryAdapter {
    /// Create a new empty adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing any pipeline
    pub fn add_object(&self, location: impl Into<String>, data: &[u8]) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location.into(), Bytes::copy_from_slice(data));
    }

    /// Get the stored bytes for a location
    pub fn get_object(&self, location: &str) -> Option<Bytes> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location)
            .cloned()
    }

    pub fn contains(&self, location: &str) -> bool {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(location)
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of stored locations
    pub fn locations(&self) -> Vec<String> {
        let mut locations: Vec<String> = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        locations.sort();
        locations
    }

    /// Drop every object
    pub fn clear(&self) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl AdapterKind for MemoryAdapter {
    const IDENTITY: &'static str = IDENTITY;

    fn from_config(_config: &Value) -> AdapterResult<Self> {
        Ok(Self::new())
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn identity(&self) -> &str {
        IDENTITY
    }

    fn create_write_stream(&self, location: &str, options: &Value) -> Box<dyn WriteStream> {
        match parse_options::<MemoryWriteOptions>(IDENTITY, options) {
            Ok(options) => Box::new(MemoryWriteStream {
                objects: Arc::clone(&self.objects),
                location: location.to_string(),
                overwrite: options.overwrite,
                buffer: BytesMut::new(),
            }),
            Err(e) => Box::new(FailedWriteStream::new(e)),
        }
    }

    fn create_read_stream(&self, location: &str, options: &Value) -> ReadStream {
        let options = match parse_options::<MemoryReadOptions>(IDENTITY, options) {
            Ok(options) => options,
            Err(e) => return super::failed_read_stream(e),
        };
        let chunk_size = options.chunk_size.max(1);
        let objects = Arc::clone(&self.objects);
        let location = location.to_string();

        // Looked up on first poll, not at construction
        let lookup = async move {
            let data = objects
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&location)
                .cloned()
                .ok_or_else(|| AdapterError::NotFound {
                    location: location.clone(),
                    adapter: IDENTITY.to_string(),
                })?;

            let chunks: Vec<io::Result<Bytes>> = (0..data.len())
                .step_by(chunk_size)
                .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
                .collect();
            Ok::<_, io::Error>(stream::iter(chunks))
        };

        Box::pin(stream::once(lookup).try_flatten())
    }

    async fn remove(&self, location: &str) -> AdapterResult<()> {
        let removed = self
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(location);

        match removed {
            Some(_) => Ok(()),
            None => Err(AdapterError::NotFound {
                location: location.to_string(),
                adapter: IDENTITY.to_string(),
            }),
        }
    }
}

/// Buffers writes and publishes the object on close
struct MemoryWriteStream {
    objects: Objects,
    location: String,
    overwrite: bool,
    buffer: BytesMut,
}

#[async_trait]
impl WriteStream for MemoryWriteStream {
    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        let mut objects = self
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if !self.overwrite && objects.contains_key(&self.location) {
            return Err(AdapterError::AlreadyExists {
                location: self.location.clone(),
            }
            .into());
        }

        let data = std::mem::take(&mut self.buffer).freeze();
        objects.insert(self.location.clone(), data);
        Ok(())
    }
}
