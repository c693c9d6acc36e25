//! Local filesystem adapter
//!
//! Stores every location as a file under a root directory using Tokio's async I/O.

use super::error::{AdapterError, AdapterResult};
use super::types::{ReadStream, WriteStream};
use super::{parse_options, Adapter, AdapterKind, FailedWriteStream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use serde::Deserialize;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const IDENTITY: &str = "local";

/// Default read chunk size (64 KiB)
const CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem adapter
///
/// # Example
///
/// ```no_run
/// use conduit::adapter::{Adapter, LocalAdapter};
/// use futures::TryStreamExt;
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let adapter = LocalAdapter::with_root("/var/data");
///     let chunks: Vec<_> = adapter
///         .create_read_stream("reports/q1.csv", &json!({}))
///         .try_collect()
///         .await?;
///     println!("{} chunks", chunks.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    /// Directory every location is resolved against
    root: PathBuf,
}

/// Per-call options accepted by [`LocalAdapter::create_write_stream`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LocalWriteOptions {
    /// Create missing parent directories on first write
    create_parents: bool,
    /// Replace an existing file
    overwrite: bool,
    /// Unix permission bits applied after close
    permissions: Option<u32>,
}

impl Default for LocalWriteOptions {
    fn default() -> Self {
        Self {
            create_parents: true,
            overwrite: true,
            permissions: None,
        }
    }
}

/// Per-call options accepted by [`LocalAdapter::create_read_stream`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LocalReadOptions {
    chunk_size: usize,
}

impl Default for LocalReadOptions {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LocalConfig {
    root: Option<PathBuf>,
}

impl LocalAdapter {
    /// Create an adapter rooted at the current directory
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }

    /// Create an adapter rooted at a specific directory
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a location against the root
    fn resolve_path(&self, location: &str) -> PathBuf {
        self.root.join(location.trim_start_matches('/'))
    }
}

impl Default for LocalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterKind for LocalAdapter {
    const IDENTITY: &'static str = IDENTITY;

    fn from_config(config: &Value) -> AdapterResult<Self> {
        let config: LocalConfig = parse_options(IDENTITY, config)?;
        Ok(match config.root {
            Some(root) => Self::with_root(root),
            None => Self::new(),
        })
    }
}

#[async_trait]
impl Adapter for LocalAdapter {
    fn identity(&self) -> &str {
        IDENTITY
    }

    fn create_write_stream(&self, location: &str, options: &Value) -> Box<dyn WriteStream> {
        match parse_options::<LocalWriteOptions>(IDENTITY, options) {
            Ok(options) => Box::new(LocalWriteStream {
                location: location.to_string(),
                path: self.resolve_path(location),
                options,
                file: None,
            }),
            Err(e) => Box::new(FailedWriteStream::new(e)),
        }
    }

    fn create_read_stream(&self, location: &str, options: &Value) -> ReadStream {
        let options = match parse_options::<LocalReadOptions>(IDENTITY, options) {
            Ok(options) => options,
            Err(e) => return super::failed_read_stream(e),
        };

        let state = ReadState::Pending {
            path: self.resolve_path(location),
            location: location.to_string(),
            chunk_size: options.chunk_size.max(1),
        };

        // The file is opened on first poll so that construction stays free of I/O
        let stream = stream::unfold(state, |state| async move {
            match state {
                ReadState::Pending {
                    path,
                    location,
                    chunk_size,
                } => match fs::File::open(&path).await {
                    Ok(file) => read_chunk(file, vec![0u8; chunk_size]).await,
                    Err(e) => Some((
                        Err(AdapterError::from_io(e, &location, IDENTITY).into()),
                        ReadState::Done,
                    )),
                },
                ReadState::Open { file, buffer } => read_chunk(file, buffer).await,
                ReadState::Done => None,
            }
        });

        Box::pin(stream)
    }

    #[tracing::instrument(skip(self), fields(adapter = IDENTITY))]
    async fn remove(&self, location: &str) -> AdapterResult<()> {
        let resolved = self.resolve_path(location);
        fs::remove_file(&resolved)
            .await
            .map_err(|e| AdapterError::from_io(e, location, IDENTITY))?;
        tracing::debug!(path = %resolved.display(), "Removed file");
        Ok(())
    }
}

enum ReadState {
    Pending {
        path: PathBuf,
        location: String,
        chunk_size: usize,
    },
    Open {
        file: fs::File,
        buffer: Vec<u8>,
    },
    Done,
}

async fn read_chunk(
    mut file: fs::File,
    mut buffer: Vec<u8>,
) -> Option<(io::Result<Bytes>, ReadState)> {
    match file.read(&mut buffer).await {
        Ok(0) => None, // EOF
        Ok(n) => {
            let data = Bytes::copy_from_slice(&buffer[..n]);
            Some((Ok(data), ReadState::Open { file, buffer }))
        }
        Err(e) => Some((Err(e), ReadState::Done)),
    }
}

/// Write stream for a single local file
///
/// Parent directories and the file itself are created on the first write, or on
/// close when nothing was written, so an empty upload still produces a file.
struct LocalWriteStream {
    location: String,
    path: PathBuf,
    options: LocalWriteOptions,
    file: Option<fs::File>,
}

impl LocalWriteStream {
    async fn open(&mut self) -> io::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        if self.options.create_parents {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AdapterError::from_io(e, &self.location, IDENTITY))?;
            }
        }

        let mut open = fs::OpenOptions::new();
        open.write(true);
        if self.options.overwrite {
            open.create(true).truncate(true);
        } else {
            open.create_new(true);
        }

        let file = open
            .open(&self.path)
            .await
            .map_err(|e| AdapterError::from_io(e, &self.location, IDENTITY))?;

        tracing::trace!(path = %self.path.display(), "Opened file for writing");
        self.file = Some(file);
        Ok(())
    }

    #[cfg(unix)]
    async fn apply_permissions(&self) -> io::Result<()> {
        if let Some(mode) = self.options.permissions {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(mode);
            fs::set_permissions(&self.path, perms).await?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn apply_permissions(&self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl WriteStream for LocalWriteStream {
    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        self.open().await?;
        match self.file.as_mut() {
            Some(file) => file.write_all(&data).await,
            None => Err(io::Error::other("file is not open")),
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush().await,
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.open().await?;
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        self.apply_permissions().await
    }
}
