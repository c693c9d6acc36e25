/*!
 * Conduit facade
 *
 * Owns the storage adapter and the transform registry, and hands out
 * pipelines bound to both. Multiple pipelines can share one adapter (and its
 * connection) while keeping independent middleware chains.
 */

use crate::adapter::{Adapter, AdapterKind, AdapterRegistry, AdapterResult, WriteStream};
use crate::config::{ConduitConfig, MiddlewareConfig};
use crate::error::{ConduitError, IdentityKind, Result};
use crate::identity;
use crate::pipeline::{Pipeline, Removal, Transfer, TransferOptions};
use crate::transform::{TransformFactory, TransformKind, TransformRegistry};
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Entry point: one adapter, one transform registry
///
/// ```no_run
/// use conduit::{Conduit, TransferOptions};
/// use conduit::adapter::LocalAdapter;
///
/// # async fn run() -> anyhow::Result<()> {
/// let conduit = Conduit::with_kind::<LocalAdapter>(&serde_json::json!({ "root": "/srv/files" }))?;
/// let pipeline = conduit.pipeline().use_transform("checksum")?;
///
/// let file = tokio::fs::File::open("avatar.png").await?;
/// let report = pipeline
///     .upload_reader(file, TransferOptions::new().directory("avatars"))?
///     .await?;
/// println!("{}", serde_json::to_string(&report)?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Conduit {
    adapter: Arc<dyn Adapter>,
    transforms: Arc<TransformRegistry>,
}

impl Conduit {
    /// Wrap a ready-made adapter; built-in transforms are registered
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::InvalidIdentity` if the adapter's identity is unusable.
    pub fn new(adapter: Arc<dyn Adapter>) -> Result<Self> {
        Self::builder().adapter(adapter).build()
    }

    /// Build an adapter of type `A` from `config`
    pub fn with_kind<A: AdapterKind>(config: &Value) -> Result<Self> {
        let adapter = A::from_config(config)?;
        Self::new(Arc::new(adapter))
    }

    /// Resolve `identity` in `registry` and build the adapter from `config`
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::UnknownAdapter` if nothing is registered under `identity`.
    pub fn from_registry(registry: &AdapterRegistry, identity: &str, config: &Value) -> Result<Self> {
        let adapter = registry.create(identity, config)?;
        Self::new(adapter)
    }

    /// Build from configuration, resolving the adapter through the built-in registry
    pub fn from_config(config: &ConduitConfig) -> Result<Self> {
        Self::from_registry(
            &AdapterRegistry::new(),
            &config.adapter.identity,
            &config.adapter.config,
        )
    }

    pub fn builder() -> ConduitBuilder {
        ConduitBuilder::default()
    }

    /// Register a transform type under its own identity
    pub fn register_transform<T: TransformKind>(&self) -> Result<&Self> {
        self.transforms.register::<T>()?;
        Ok(self)
    }

    /// Register a transform factory under `identity`
    pub fn register_transform_factory(
        &self,
        identity: impl Into<String>,
        factory: TransformFactory,
    ) -> Result<&Self> {
        self.transforms.register_factory(identity, factory)?;
        Ok(self)
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn transforms(&self) -> &Arc<TransformRegistry> {
        &self.transforms
    }

    /// New pipeline sharing this facade's adapter and registry
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::bound(Arc::clone(&self.adapter), Arc::clone(&self.transforms))
    }

    /// New pipeline with the configured middleware applied in order
    pub fn pipeline_from(&self, middleware: &[MiddlewareConfig]) -> Result<Pipeline> {
        middleware.iter().try_fold(self.pipeline(), |pipeline, stage| {
            pipeline.use_transform_with(&stage.identity, stage.options.clone())
        })
    }

    /// Upload through a pipeline with no middleware
    pub fn upload<S>(&self, source: S, options: TransferOptions) -> Result<Transfer>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.pipeline().upload(source, options)
    }

    /// Upload from a reader through a pipeline with no middleware
    pub fn upload_reader<R>(&self, reader: R, options: TransferOptions) -> Result<Transfer>
    where
        R: AsyncRead + Send + 'static,
    {
        self.pipeline().upload_reader(reader, options)
    }

    /// Download through a pipeline with no middleware
    pub fn download<W>(&self, location: &str, destination: W, options: TransferOptions) -> Result<Transfer>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.pipeline().download(location, destination, options)
    }

    /// Download into a [`WriteStream`] through a pipeline with no middleware
    pub fn download_to(
        &self,
        location: &str,
        destination: Box<dyn WriteStream>,
        options: TransferOptions,
    ) -> Result<Transfer> {
        self.pipeline().download_to(location, destination, options)
    }

    /// Remove `location`; resolves with the location as passed in
    pub fn remove(&self, location: &str) -> Result<Removal> {
        self.pipeline().remove(location)
    }

    /// Remove and await in one step
    pub async fn remove_now(&self, location: &str) -> Result<String> {
        let removed: AdapterResult<String> = self.remove(location)?.await;
        Ok(removed?)
    }
}

impl fmt::Debug for Conduit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conduit")
            .field("adapter", &self.adapter.identity())
            .field("transforms", &self.transforms.list_transforms())
            .finish()
    }
}

/// Builder for [`Conduit`]
#[derive(Default)]
pub struct ConduitBuilder {
    adapter: Option<Arc<dyn Adapter>>,
    transforms: Option<Arc<TransformRegistry>>,
}

impl ConduitBuilder {
    pub fn adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Use `registry` instead of a fresh one with the built-ins
    pub fn transforms(mut self, registry: Arc<TransformRegistry>) -> Self {
        self.transforms = Some(registry);
        self
    }

    /// # Errors
    ///
    /// - `MissingAdapter` if no adapter was set
    /// - `InvalidIdentity` if the adapter's identity is unusable
    pub fn build(self) -> Result<Conduit> {
        let adapter = self.adapter.ok_or(ConduitError::MissingAdapter)?;
        identity::validate(IdentityKind::Adapter, adapter.identity())?;

        let transforms = self
            .transforms
            .unwrap_or_else(|| Arc::new(TransformRegistry::with_builtins()));

        tracing::debug!(
            adapter = adapter.identity(),
            transforms = ?transforms.list_transforms(),
            "Conduit ready"
        );
        Ok(Conduit { adapter, transforms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{bytes_stream, LocalAdapter, MemoryAdapter, ReadStream};
    use crate::logging::init_test_logging;
    use crate::transform::{Checksum, Transform};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct Nameless;

    #[async_trait]
    impl Adapter for Nameless {
        fn identity(&self) -> &str {
            ""
        }

        fn create_write_stream(&self, _location: &str, _options: &Value) -> Box<dyn WriteStream> {
            Box::new(crate::adapter::WriterStream::new(tokio::io::sink()))
        }

        fn create_read_stream(&self, _location: &str, _options: &Value) -> ReadStream {
            bytes_stream(Vec::new())
        }

        async fn remove(&self, _location: &str) -> AdapterResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_builder_requires_adapter() {
        let err = Conduit::builder().build().unwrap_err();
        assert!(matches!(err, ConduitError::MissingAdapter));
        assert_eq!(err.to_string(), "A configured adapter is required to operate");
    }

    #[test]
    fn test_rejects_adapter_without_identity() {
        let err = Conduit::new(Arc::new(Nameless)).unwrap_err();
        assert!(matches!(
            err,
            ConduitError::InvalidIdentity {
                kind: IdentityKind::Adapter,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_adapter_identity() {
        let err = Conduit::from_registry(&AdapterRegistry::new(), "gridfs", &Value::Null).unwrap_err();
        assert!(matches!(err, ConduitError::UnknownAdapter(ref id) if id == "gridfs"));
    }

    #[test]
    fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = ConduitConfig::default();
        config.adapter.config = json!({ "root": dir.path() });

        let conduit = Conduit::from_config(&config).unwrap();
        assert_eq!(conduit.adapter().identity(), "local");
    }

    #[test]
    fn test_register_transform_validates_identity() {
        let conduit = Conduit::new(Arc::new(MemoryAdapter::new())).unwrap();
        let factory: TransformFactory =
            Arc::new(|options: &Value| Ok(Box::new(Checksum::new(options)?) as Box<dyn Transform>));

        assert!(conduit.register_transform_factory("bad name", factory.clone()).is_err());
        assert!(conduit.register_transform_factory("location", factory.clone()).is_err());
        conduit.register_transform_factory("digest", factory).unwrap();
        assert!(conduit.transforms().is_registered("digest"));
    }

    #[test]
    fn test_pipelines_are_independent() {
        let conduit = Conduit::new(Arc::new(MemoryAdapter::new())).unwrap();
        let with_checksum = conduit.pipeline().use_transform("checksum").unwrap();
        let plain = conduit.pipeline();

        assert_eq!(with_checksum.transforms(), vec!["checksum"]);
        assert!(plain.transforms().is_empty());
        assert!(Arc::ptr_eq(with_checksum.adapter(), plain.adapter()));
    }

    #[test]
    fn test_pipeline_from_config() {
        let conduit = Conduit::new(Arc::new(MemoryAdapter::new())).unwrap();
        let pipeline = conduit
            .pipeline_from(&[
                MiddlewareConfig::with_options("checksum", json!({ "algorithm": "sha1" })),
                MiddlewareConfig::new("compress"),
            ])
            .unwrap();
        assert_eq!(pipeline.transforms(), vec!["checksum", "compress"]);

        let err = conduit
            .pipeline_from(&[MiddlewareConfig::new("encrypt")])
            .unwrap_err();
        assert!(matches!(err, ConduitError::TransformNotRegistered(_)));
    }

    #[tokio::test]
    async fn test_convenience_round_trip() {
        init_test_logging();
        let dir = TempDir::new().unwrap();
        let conduit = Conduit::new(Arc::new(LocalAdapter::with_root(dir.path()))).unwrap();

        let report = conduit
            .upload(
                bytes_stream(vec![Bytes::from_static(b"payload")]),
                TransferOptions::new().directory("nested/dir").name("file.bin"),
            )
            .unwrap()
            .await
            .unwrap();
        assert_eq!(report.location, "nested/dir/file.bin");
        assert!(report.transforms.is_empty());
        assert!(dir.path().join("nested/dir/file.bin").exists());

        let (mut reader, writer) = tokio::io::duplex(1024);
        let report = conduit
            .download("nested/dir/file.bin", writer, TransferOptions::new())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(report.adapter, "local");

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"payload");

        let removed = conduit.remove_now("nested/dir/file.bin").await.unwrap();
        assert_eq!(removed, "nested/dir/file.bin");
        assert!(!dir.path().join("nested/dir/file.bin").exists());
    }
}
