/*!
 * Transfer pipeline
 *
 * A pipeline binds one storage adapter to an ordered list of transforms
 * ("middleware") and runs uploads, downloads and removals through them.
 *
 * Every call builds its own linear chain:
 *
 * ```text
 * upload:    source -> T1 -> ... -> Tn -> adapter write stream
 * download:  adapter read stream -> T1 -> ... -> Tn -> destination
 * ```
 *
 * Fresh transform instances are created for each call, so concurrent calls on
 * one pipeline never share stage state. Configuration mistakes fail
 * synchronously with [`ConduitError`]; everything that happens once bytes move
 * is reported through the returned [`Transfer`] future as a [`TransferError`].
 */

mod chain;
pub mod options;
pub mod report;

pub use options::TransferOptions;
pub use report::TransferReport;

use crate::adapter::{reader_stream, Adapter, AdapterResult, ByteStream, WriteStream, WriterStream};
use crate::error::{ConduitError, IdentityKind, Result, Stage, TransferError};
use crate::identity;
use crate::location;
use crate::transform::{Direction, StageContext, Transform, TransformFactory, TransformRegistry};
use bytes::Bytes;
use chain::Settlement;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, info_span, warn, Instrument};

/// A transform registered on a pipeline
#[derive(Clone)]
struct Middleware {
    identity: String,
    factory: TransformFactory,
    options: Value,
}

/// Bound adapter plus ordered transform chain
///
/// Cloning is cheap: the adapter and registry are shared, the middleware list
/// is copied.
#[derive(Clone)]
pub struct Pipeline {
    adapter: Arc<dyn Adapter>,
    registry: Arc<TransformRegistry>,
    middleware: Vec<Middleware>,
}

impl Pipeline {
    /// Create a pipeline with no middleware
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::InvalidIdentity` if the adapter's identity is unusable.
    pub fn new(adapter: Arc<dyn Adapter>, registry: Arc<TransformRegistry>) -> Result<Self> {
        identity::validate(IdentityKind::Adapter, adapter.identity())?;
        Ok(Self::bound(adapter, registry))
    }

    /// Pipeline over an adapter whose identity was already validated
    pub(crate) fn bound(adapter: Arc<dyn Adapter>, registry: Arc<TransformRegistry>) -> Self {
        Self {
            adapter,
            registry,
            middleware: Vec::new(),
        }
    }

    /// Append the transform registered as `identity`, with no registration options
    pub fn use_transform(self, identity: &str) -> Result<Self> {
        self.use_transform_with(identity, Value::Null)
    }

    /// Append the transform registered as `identity`
    ///
    /// `options` are handed to the transform's constructor on every call and
    /// form the base that per-call options overlay.
    ///
    /// # Errors
    ///
    /// - `TransformNotRegistered` if the registry has no such identity
    /// - `DuplicateTransform` if the pipeline already uses it
    /// - `InvalidIdentity` if it collides with the adapter identity
    pub fn use_transform_with(mut self, identity: &str, options: Value) -> Result<Self> {
        let factory = self
            .registry
            .get(identity)
            .ok_or_else(|| ConduitError::TransformNotRegistered(identity.to_string()))?;

        if self.middleware.iter().any(|m| m.identity == identity) {
            return Err(ConduitError::DuplicateTransform(identity.to_string()));
        }
        if identity == self.adapter.identity() {
            return Err(ConduitError::InvalidIdentity {
                kind: IdentityKind::Transform,
                identity: identity.to_string(),
                reason: "collides with the adapter identity".to_string(),
            });
        }

        debug!(transform = identity, position = self.middleware.len(), "Transform added");
        self.middleware.push(Middleware {
            identity: identity.to_string(),
            factory,
            options,
        });
        Ok(self)
    }

    /// Identities of the pipeline's transforms, in execution order
    pub fn transforms(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.identity.as_str()).collect()
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// Upload `source` through the chain into the adapter
    ///
    /// The location is `options.directory` joined with `options.name` (a UUIDv4
    /// when absent). The returned [`Transfer`] resolves once the adapter has
    /// committed the data.
    ///
    /// # Errors
    ///
    /// Fails before any I/O on an invalid location or when a transform cannot
    /// be built or wired.
    pub fn upload<S>(&self, source: S, options: TransferOptions) -> Result<Transfer>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let location = location::for_upload(options.directory.as_deref(), options.name.as_deref())?;
        let adapter_options = options.scoped(self.adapter.identity());
        let sink = self.adapter.create_write_stream(&location, &adapter_options);

        let reported = location.clone();
        self.start(Direction::Upload, location, reported, Box::pin(source), sink, &options)
    }

    /// Upload everything read from `reader`
    pub fn upload_reader<R>(&self, reader: R, options: TransferOptions) -> Result<Transfer>
    where
        R: AsyncRead + Send + 'static,
    {
        self.upload(reader_stream(reader), options)
    }

    /// Download `location` through the chain into `destination`
    ///
    /// The returned [`Transfer`] resolves after `destination` has been flushed
    /// and shut down.
    pub fn download<W>(&self, location: &str, destination: W, options: TransferOptions) -> Result<Transfer>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.download_to(location, Box::new(WriterStream::new(destination)), options)
    }

    /// Download `location` through the chain into any [`WriteStream`]
    ///
    /// The report carries `location` exactly as passed in; the adapter sees
    /// its normalized form.
    pub fn download_to(
        &self,
        location: &str,
        destination: Box<dyn WriteStream>,
        options: TransferOptions,
    ) -> Result<Transfer> {
        let normalized = location::normalize(location)?;
        let adapter_options = options.scoped(self.adapter.identity());
        let source = self.adapter.create_read_stream(&normalized, &adapter_options);

        self.start(
            Direction::Download,
            normalized,
            location.to_string(),
            source,
            destination,
            &options,
        )
    }

    /// Remove `location` from storage
    ///
    /// Resolves with the location exactly as passed in, whatever the adapter
    /// reports on success. Adapter errors are returned unchanged.
    pub fn remove(&self, location: &str) -> Result<Removal> {
        let normalized = location::normalize(location)?;
        let original = location.to_string();
        let adapter = Arc::clone(&self.adapter);
        let span = info_span!("remove", adapter = %adapter.identity(), location = %normalized);

        Ok(async move {
            match adapter.remove(&normalized).await {
                Ok(()) => {
                    info!("Removed");
                    Ok(original)
                }
                Err(e) => {
                    warn!(error = %e, "Remove failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .boxed())
    }

    /// Wire the chain for one call and hand back its future
    ///
    /// `location` is what the adapter and stages see; `reported` goes into the
    /// report and [`Transfer::location`].
    fn start(
        &self,
        direction: Direction,
        location: String,
        reported: String,
        source: ByteStream,
        sink: Box<dyn WriteStream>,
        options: &TransferOptions,
    ) -> Result<Transfer> {
        let settlement = Settlement::new();
        let (stream, stages) = self.build_chain(direction, &location, source, options, &settlement)?;

        let adapter = self.adapter.identity().to_string();
        let span = match direction {
            Direction::Upload => info_span!("upload", adapter = %adapter, location = %location),
            Direction::Download => info_span!("download", adapter = %adapter, location = %location),
        };

        let report_location = reported.clone();
        let future = async move {
            match chain::drive(stream, sink, settlement).await {
                Ok(written) => {
                    let mut report = TransferReport::new(report_location, adapter);
                    for (identity, mut stage) in stages {
                        let result = stage.results();
                        report.push(identity, result);
                    }
                    info!(bytes = written, transforms = report.transforms.len(), "Transfer complete");
                    Ok(report)
                }
                Err(e) => {
                    warn!(stage = %e.stage, error = %e.source, "Transfer failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .boxed();

        Ok(Transfer {
            location: reported,
            future,
        })
    }

    /// Instantiate every middleware and link it behind `source`
    ///
    /// Both directions use registration order.
    fn build_chain(
        &self,
        direction: Direction,
        location: &str,
        source: ByteStream,
        options: &TransferOptions,
        settlement: &Settlement,
    ) -> Result<(ByteStream, Vec<(String, Box<dyn Transform>)>)> {
        let mut stream = chain::tap(source, Stage::Source, settlement.clone());
        let mut stages = Vec::with_capacity(self.middleware.len());

        for middleware in &self.middleware {
            let mut stage = (middleware.factory)(&middleware.options)?;
            let effective = options.effective(&middleware.identity, &middleware.options);
            let ctx = StageContext {
                direction,
                location,
                options: &effective,
            };

            stream = stage.transform(stream, &ctx)?;
            stream = chain::tap(
                stream,
                Stage::Transform(middleware.identity.clone()),
                settlement.clone(),
            );
            debug!(transform = %middleware.identity, %direction, location, "Stage wired");

            stages.push((middleware.identity.clone(), stage));
        }

        Ok((stream, stages))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("adapter", &self.adapter.identity())
            .field("transforms", &self.transforms())
            .finish()
    }
}

/// Pending removal; resolves with the removed location
pub type Removal = BoxFuture<'static, AdapterResult<String>>;

/// A running upload or download
///
/// Resolves exactly once, to the report or to the first error raised by any
/// stage. Dropping it abandons the transfer. It is `Send + 'static` and can be
/// handed to `tokio::spawn`.
#[must_use = "transfers do nothing unless awaited"]
pub struct Transfer {
    location: String,
    future: BoxFuture<'static, std::result::Result<TransferReport, TransferError>>,
}

impl Transfer {
    /// Location the transfer reads from or writes to
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl Future for Transfer {
    type Output = std::result::Result<TransferReport, TransferError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{bytes_stream, MemoryAdapter};
    use crate::transform::{Checksum, TransformKind};
    use futures::stream;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_pipeline() -> (MemoryAdapter, Pipeline) {
        let adapter = MemoryAdapter::new();
        let pipeline = Pipeline::new(
            Arc::new(adapter.clone()),
            Arc::new(TransformRegistry::with_builtins()),
        )
        .unwrap();
        (adapter, pipeline)
    }

    fn hello() -> ByteStream {
        bytes_stream(vec![Bytes::from_static(b"hello "), Bytes::from_static(b"world")])
    }

    /// Appends a marker to each chunk so stage order is visible in the output
    struct Tag(&'static str);

    impl Transform for Tag {
        fn identity(&self) -> &str {
            self.0
        }

        fn transform(&mut self, upstream: ByteStream, _ctx: &StageContext<'_>) -> Result<ByteStream> {
            use futures::StreamExt;
            let tag = self.0;
            Ok(Box::pin(upstream.map(move |item| {
                item.map(|chunk| {
                    let mut out = chunk.to_vec();
                    out.extend_from_slice(tag.as_bytes());
                    Bytes::from(out)
                })
            })))
        }

        fn results(&mut self) -> Value {
            json!(self.0)
        }
    }

    fn tag_factory(tag: &'static str) -> TransformFactory {
        Arc::new(move |_: &Value| Ok(Box::new(Tag(tag)) as Box<dyn Transform>))
    }

    #[tokio::test]
    async fn test_upload_with_checksum() {
        let (adapter, pipeline) = memory_pipeline();
        let pipeline = pipeline.use_transform(Checksum::IDENTITY).unwrap();

        let transfer = pipeline
            .upload(hello(), TransferOptions::new().directory("docs").name("hello.txt"))
            .unwrap();
        assert_eq!(transfer.location(), "docs/hello.txt");

        let report = transfer.await.unwrap();
        assert_eq!(report.location, "docs/hello.txt");
        assert_eq!(report.adapter, "memory");
        assert_eq!(report.transforms, vec!["checksum"]);
        assert_eq!(
            report.result("checksum").unwrap()["value"],
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(adapter.get_object("docs/hello.txt").unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_registration_order_is_execution_order() {
        let registry = Arc::new(TransformRegistry::new());
        registry.register_factory("first", tag_factory("1")).unwrap();
        registry.register_factory("second", tag_factory("2")).unwrap();

        let adapter = MemoryAdapter::new();
        let pipeline = Pipeline::new(Arc::new(adapter.clone()), registry)
            .unwrap()
            .use_transform("first")
            .unwrap()
            .use_transform("second")
            .unwrap();

        pipeline
            .upload(bytes_stream(vec![Bytes::from_static(b"x")]), TransferOptions::new().name("up"))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(adapter.get_object("up").unwrap(), "x12");
    }

    #[tokio::test]
    async fn test_download_order() {
        let registry = Arc::new(TransformRegistry::new());
        registry.register_factory("first", tag_factory("1")).unwrap();
        registry.register_factory("second", tag_factory("2")).unwrap();

        let adapter = MemoryAdapter::new();
        adapter.add_object("in", b"x");
        let pipeline = Pipeline::new(Arc::new(adapter), registry)
            .unwrap()
            .use_transform("first")
            .unwrap()
            .use_transform("second")
            .unwrap();

        let (reader, writer) = tokio::io::duplex(64);
        let report = pipeline
            .download("in", writer, TransferOptions::new())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(report.transforms, vec!["first", "second"]);
        assert_eq!(report.result("second").unwrap(), &json!("2"));

        let mut out = Vec::new();
        let mut reader = reader;
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"x12");
    }

    #[test]
    fn test_use_transform_errors_synchronously() {
        let (_, pipeline) = memory_pipeline();
        let err = pipeline.clone().use_transform("nonexistent").unwrap_err();
        assert_eq!(err.to_string(), "Transform nonexistent is not registered");

        let err = pipeline
            .use_transform("checksum")
            .unwrap()
            .use_transform("checksum")
            .unwrap_err();
        assert!(matches!(err, ConduitError::DuplicateTransform(_)));
    }

    #[test]
    fn test_transform_cannot_shadow_adapter() {
        let registry = Arc::new(TransformRegistry::new());
        registry.register_factory("memory", tag_factory("m")).unwrap();
        let pipeline = Pipeline::new(Arc::new(MemoryAdapter::new()), registry).unwrap();

        let err = pipeline.use_transform("memory").unwrap_err();
        assert!(matches!(err, ConduitError::InvalidIdentity { .. }));
    }

    #[test]
    fn test_invalid_locations_fail_before_io() {
        let (_, pipeline) = memory_pipeline();
        assert!(matches!(
            pipeline.upload(hello(), TransferOptions::new().directory("../up").name("x")),
            Err(ConduitError::InvalidLocation { .. })
        ));
        assert!(matches!(
            pipeline.download("", Vec::<u8>::new(), TransferOptions::new()),
            Err(ConduitError::InvalidLocation { .. })
        ));
        assert!(matches!(
            pipeline.remove("/etc/passwd"),
            Err(ConduitError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn test_bad_options_fail_synchronously() {
        let (_, pipeline) = memory_pipeline();
        let pipeline = pipeline.use_transform("compress").unwrap();

        let result = pipeline.upload(
            hello(),
            TransferOptions::new().with("compress", json!({ "mode": "sideways" })),
        );
        assert!(matches!(result, Err(ConduitError::InvalidOptions { .. })));
    }

    #[tokio::test]
    async fn test_one_instance_per_stage_per_call() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let registry = Arc::new(TransformRegistry::new());
        registry
            .register_factory(
                "counted",
                Arc::new(move |_: &Value| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Box::new(Tag("c")) as Box<dyn Transform>)
                }),
            )
            .unwrap();

        let pipeline = Pipeline::new(Arc::new(MemoryAdapter::new()), registry)
            .unwrap()
            .use_transform("counted")
            .unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 0);

        for _ in 0..3 {
            pipeline.upload(hello(), TransferOptions::new()).unwrap().await.unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unique_locations_without_name() {
        let (adapter, pipeline) = memory_pipeline();
        let a = pipeline.upload(hello(), TransferOptions::new()).unwrap().await.unwrap();
        let b = pipeline.upload(hello(), TransferOptions::new()).unwrap().await.unwrap();

        assert!(!a.location.is_empty());
        assert_ne!(a.location, b.location);
        assert_eq!(adapter.len(), 2);
    }

    #[tokio::test]
    async fn test_source_error_rejects_with_original() {
        let (adapter, pipeline) = memory_pipeline();
        let pipeline = pipeline.use_transform("checksum").unwrap();

        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
        ]);
        let err = pipeline
            .upload(source, TransferOptions::new().name("broken"))
            .unwrap()
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Source);
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(err.into_inner().to_string(), "reset by peer");
        assert!(!adapter.contains("broken"));
    }

    #[tokio::test]
    async fn test_missing_download_is_not_found() {
        let (_, pipeline) = memory_pipeline();
        let err = pipeline
            .download("nope.txt", Vec::<u8>::new(), TransferOptions::new())
            .unwrap()
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Source);
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.adapter_error().is_some_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn test_remove_resolves_with_location() {
        let (adapter, pipeline) = memory_pipeline();
        adapter.add_object("a/b.txt", b"data");

        let removed = pipeline.remove("a/b.txt").unwrap().await.unwrap();
        assert_eq!(removed, "a/b.txt");
        assert!(!adapter.contains("a/b.txt"));

        let err = pipeline.remove("a/b.txt").unwrap().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_download_reports_location_as_passed() {
        let (adapter, pipeline) = memory_pipeline();
        adapter.add_object("a/b.txt", b"data");

        let transfer = pipeline
            .download("a//b.txt", Vec::<u8>::new(), TransferOptions::new())
            .unwrap();
        assert_eq!(transfer.location(), "a//b.txt");

        let report = transfer.await.unwrap();
        assert_eq!(report.location, "a//b.txt");
    }
}
