//! Object storage adapter using the object_store crate
//!
//! One adapter covers every provider `object_store` supports. The in-memory
//! provider is always available; Google Cloud Storage, Azure Blob Storage and S3
//! need the `gcs`, `azure` and `aws` features.
//!
//! Authentication comes from the provider's usual environment variables
//! (`GOOGLE_APPLICATION_CREDENTIALS`, `AZURE_STORAGE_ACCOUNT_NAME`, `AWS_ACCESS_KEY_ID`, ...).
//!
//! # Example
//!
//! ```no_run
//! use conduit::adapter::{ObjectStoreAdapter, ObjectStoreConfig, StoreProvider};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = ObjectStoreAdapter::new(ObjectStoreConfig {
//!     provider: StoreProvider::Gcs,
//!     bucket: Some("my-bucket".to_string()),
//!     prefix: Some("uploads".to_string()),
//! })?;
//! # Ok(())
//! # }
//! ```

use super::error::{AdapterError, AdapterResult};
use super::types::{ReadStream, WriteStream};
use super::{parse_options, Adapter, AdapterKind};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::{stream, TryStreamExt};
use object_store::memory::InMemory;
use object_store::{path::Path as ObjectPath, ObjectStore};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::OnceCell;

const IDENTITY: &str = "object-store";

/// Async constructor for the underlying store
///
/// Called at most once per adapter, on first use.
pub type StoreConnector =
    Arc<dyn Fn() -> BoxFuture<'static, AdapterResult<Arc<dyn ObjectStore>>> + Send + Sync>;

/// Object storage provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreProvider {
    /// Process-local store, lost on drop
    #[default]
    Memory,
    Gcs,
    Azure,
    S3,
}

impl fmt::Display for StoreProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreProvider::Memory => write!(f, "memory"),
            StoreProvider::Gcs => write!(f, "gcs"),
            StoreProvider::Azure => write!(f, "azure"),
            StoreProvider::S3 => write!(f, "s3"),
        }
    }
}

/// Configuration for [`ObjectStoreAdapter`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub provider: StoreProvider,
    /// Bucket (or Azure container); required for cloud providers
    pub bucket: Option<String>,
    /// Key prefix prepended to every location
    pub prefix: Option<String>,
}

/// Object storage adapter
///
/// Cloning is cheap and clones share the same connection.
#[derive(Clone)]
pub struct ObjectStoreAdapter {
    handle: Arc<StoreHandle>,
}

struct StoreHandle {
    endpoint: String,
    prefix: Option<String>,
    connector: StoreConnector,
    store: OnceCell<Arc<dyn ObjectStore>>,
}

impl StoreHandle {
    /// Connected store; concurrent first callers share one connect
    async fn store(&self) -> AdapterResult<Arc<dyn ObjectStore>> {
        let store = self
            .store
            .get_or_try_init(|| async {
                tracing::debug!(endpoint = %self.endpoint, "Connecting to object store");
                (self.connector)().await
            })
            .await?;
        Ok(Arc::clone(store))
    }

    /// Convert a location to an object key
    fn object_path(&self, location: &str) -> ObjectPath {
        let object_name = location.trim_start_matches('/');

        let full_path = if let Some(prefix) = &self.prefix {
            format!("{}/{}", prefix.trim_end_matches('/'), object_name)
        } else {
            object_name.to_string()
        };

        ObjectPath::from(full_path)
    }
}

impl ObjectStoreAdapter {
    /// Create an adapter from configuration
    ///
    /// Nothing is contacted here; the connection is made on first use.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::InvalidConfig` if a cloud provider is missing its
    /// bucket or was not compiled in.
    pub fn new(config: ObjectStoreConfig) -> AdapterResult<Self> {
        let endpoint = match &config.bucket {
            Some(bucket) => format!("{}://{}", config.provider, bucket),
            None => format!("{}://", config.provider),
        };
        let connector = connector_for(&config)?;
        Ok(Self::with_connector(endpoint, config.prefix, connector))
    }

    /// Create an adapter around a custom connector
    pub fn with_connector(
        endpoint: impl Into<String>,
        prefix: Option<String>,
        connector: StoreConnector,
    ) -> Self {
        Self {
            handle: Arc::new(StoreHandle {
                endpoint: endpoint.into(),
                prefix,
                connector,
                store: OnceCell::new(),
            }),
        }
    }

    /// Create an adapter over an already constructed store
    pub fn from_store(store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        let endpoint = store.to_string();
        Self::with_connector(
            endpoint,
            prefix,
            Arc::new(move || {
                let store = Arc::clone(&store);
                Box::pin(async move { Ok(store) })
            }),
        )
    }

    /// Whether the store has been connected yet
    pub fn is_connected(&self) -> bool {
        self.handle.store.initialized()
    }

    pub fn endpoint(&self) -> &str {
        &self.handle.endpoint
    }
}

impl fmt::Debug for ObjectStoreAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreAdapter")
            .field("endpoint", &self.handle.endpoint)
            .field("prefix", &self.handle.prefix)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl AdapterKind for ObjectStoreAdapter {
    const IDENTITY: &'static str = IDENTITY;

    fn from_config(config: &Value) -> AdapterResult<Self> {
        Self::new(parse_options(IDENTITY, config)?)
    }
}

#[async_trait]
impl Adapter for ObjectStoreAdapter {
    fn identity(&self) -> &str {
        IDENTITY
    }

    fn create_write_stream(&self, location: &str, _options: &Value) -> Box<dyn WriteStream> {
        Box::new(ObjectWriteStream {
            handle: Arc::clone(&self.handle),
            location: location.to_string(),
            store: None,
            buffer: BytesMut::new(),
        })
    }

    fn create_read_stream(&self, location: &str, _options: &Value) -> ReadStream {
        let handle = Arc::clone(&self.handle);
        let location = location.to_string();

        let open = async move {
            let store = handle.store().await?;
            let object_path = handle.object_path(&location);
            let result = store
                .get(&object_path)
                .await
                .map_err(|e| map_store_error(e, &location))?;
            Ok::<_, io::Error>(result.into_stream().map_err(io::Error::other))
        };

        Box::pin(stream::once(open).try_flatten())
    }

    #[tracing::instrument(skip(self), fields(adapter = IDENTITY, endpoint = %self.handle.endpoint))]
    async fn remove(&self, location: &str) -> AdapterResult<()> {
        let store = self.handle.store().await?;
        let object_path = self.handle.object_path(location);
        store
            .delete(&object_path)
            .await
            .map_err(|e| map_store_error(e, location))?;
        tracing::debug!(object = %object_path, "Deleted object");
        Ok(())
    }
}

/// Buffers the whole object and `put`s it on close
///
/// object_store's `put` needs all data upfront.
struct ObjectWriteStream {
    handle: Arc<StoreHandle>,
    location: String,
    store: Option<Arc<dyn ObjectStore>>,
    buffer: BytesMut,
}

impl ObjectWriteStream {
    async fn connect(&mut self) -> io::Result<Arc<dyn ObjectStore>> {
        match &self.store {
            Some(store) => Ok(Arc::clone(store)),
            None => {
                let store = self.handle.store().await?;
                self.store = Some(Arc::clone(&store));
                Ok(store)
            }
        }
    }
}

#[async_trait]
impl WriteStream for ObjectWriteStream {
    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        self.connect().await?;
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        let store = self.connect().await?;
        let object_path = self.handle.object_path(&self.location);
        let data = self.buffer.split().freeze();
        let size = data.len();

        store
            .put(&object_path, data.into())
            .await
            .map_err(|e| map_store_error(e, &self.location))?;

        tracing::debug!(object = %object_path, size, "Put object");
        Ok(())
    }
}

fn map_store_error(err: object_store::Error, location: &str) -> AdapterError {
    match err {
        object_store::Error::NotFound { .. } => AdapterError::NotFound {
            location: location.to_string(),
            adapter: IDENTITY.to_string(),
        },
        object_store::Error::AlreadyExists { .. } => AdapterError::AlreadyExists {
            location: location.to_string(),
        },
        other => AdapterError::Other {
            adapter: IDENTITY.to_string(),
            message: other.to_string(),
        },
    }
}

fn connector_for(config: &ObjectStoreConfig) -> AdapterResult<StoreConnector> {
    match config.provider {
        StoreProvider::Memory => Ok(Arc::new(|| {
            Box::pin(async { Ok(Arc::new(InMemory::new()) as Arc<dyn ObjectStore>) })
        })),
        StoreProvider::Gcs => gcs_connector(require_bucket(config)?),
        StoreProvider::Azure => azure_connector(require_bucket(config)?),
        StoreProvider::S3 => s3_connector(require_bucket(config)?),
    }
}

fn require_bucket(config: &ObjectStoreConfig) -> AdapterResult<String> {
    config
        .bucket
        .clone()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AdapterError::InvalidConfig {
            adapter: IDENTITY.to_string(),
            message: format!("provider '{}' requires a bucket", config.provider),
        })
}

#[cfg(any(feature = "gcs", feature = "azure", feature = "aws"))]
fn connection_failed(endpoint: String) -> impl FnOnce(object_store::Error) -> AdapterError {
    move |e| AdapterError::ConnectionFailed {
        adapter: IDENTITY.to_string(),
        endpoint,
        source: Some(Box::new(e)),
    }
}

#[cfg(not(all(feature = "gcs", feature = "azure", feature = "aws")))]
fn provider_disabled(provider: StoreProvider, feature: &str) -> AdapterError {
    AdapterError::InvalidConfig {
        adapter: IDENTITY.to_string(),
        message: format!(
            "provider '{}' is not available; rebuild with the '{}' feature",
            provider, feature
        ),
    }
}

#[cfg(feature = "gcs")]
fn gcs_connector(bucket: String) -> AdapterResult<StoreConnector> {
    use object_store::gcp::GoogleCloudStorageBuilder;

    Ok(Arc::new(move || {
        let bucket = bucket.clone();
        Box::pin(async move {
            let store = GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(&bucket)
                .build()
                .map_err(connection_failed(format!("gcs://{}", bucket)))?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        })
    }))
}

#[cfg(not(feature = "gcs"))]
fn gcs_connector(_bucket: String) -> AdapterResult<StoreConnector> {
    Err(provider_disabled(StoreProvider::Gcs, "gcs"))
}

#[cfg(feature = "azure")]
fn azure_connector(container: String) -> AdapterResult<StoreConnector> {
    use object_store::azure::MicrosoftAzureBuilder;

    Ok(Arc::new(move || {
        let container = container.clone();
        Box::pin(async move {
            let store = MicrosoftAzureBuilder::from_env()
                .with_container_name(&container)
                .build()
                .map_err(connection_failed(format!("azure://{}", container)))?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        })
    }))
}

#[cfg(not(feature = "azure"))]
fn azure_connector(_container: String) -> AdapterResult<StoreConnector> {
    Err(provider_disabled(StoreProvider::Azure, "azure"))
}

#[cfg(feature = "aws")]
fn s3_connector(bucket: String) -> AdapterResult<StoreConnector> {
    use object_store::aws::AmazonS3Builder;

    Ok(Arc::new(move || {
        let bucket = bucket.clone();
        Box::pin(async move {
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(&bucket)
                .build()
                .map_err(connection_failed(format!("s3://{}", bucket)))?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        })
    }))
}

#[cfg(not(feature = "aws"))]
fn s3_connector(_bucket: String) -> AdapterResult<StoreConnector> {
    Err(provider_disabled(StoreProvider::S3, "aws"))
}
