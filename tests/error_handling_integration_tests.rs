/*!
 * Integration tests for transfer failure semantics
 *
 * Configuration mistakes must fail synchronously; failures while bytes move
 * must reject the transfer exactly once, with the original error.
 */

use async_trait::async_trait;
use bytes::Bytes;
use conduit::adapter::{
    bytes_stream, Adapter, AdapterError, AdapterResult, ByteStream, MemoryAdapter, ReadStream,
    WriteStream,
};
use conduit::error::IdentityKind;
use conduit::transform::{StageContext, Transform, TransformRegistry};
use conduit::{Conduit, ConduitError, Stage, TransferOptions};
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Adapter whose write streams fail on the first write
struct BrokenSink {
    closes: Arc<AtomicUsize>,
}

struct BrokenWriter {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl WriteStream for BrokenWriter {
    async fn write(&mut self, _data: Bytes) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "disk full"))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Adapter for BrokenSink {
    fn identity(&self) -> &str {
        "broken"
    }

    fn create_write_stream(&self, _location: &str, _options: &Value) -> Box<dyn WriteStream> {
        Box::new(BrokenWriter {
            closes: Arc::clone(&self.closes),
        })
    }

    fn create_read_stream(&self, location: &str, _options: &Value) -> ReadStream {
        conduit::adapter::failed_read_stream(AdapterError::NotFound {
            location: location.to_string(),
            adapter: "broken".to_string(),
        })
    }

    async fn remove(&self, location: &str) -> AdapterResult<()> {
        Err(AdapterError::PermissionDenied {
            location: location.to_string(),
            message: "read-only bucket".to_string(),
        })
    }
}

/// Drops every upstream error and appends a trailer
struct Swallow;

impl Transform for Swallow {
    fn identity(&self) -> &str {
        "swallow"
    }

    fn transform(&mut self, upstream: ByteStream, _ctx: &StageContext<'_>) -> conduit::Result<ByteStream> {
        Ok(Box::pin(
            upstream
                .filter_map(|item| async move { item.ok() })
                .chain(stream::iter(vec![Bytes::from_static(b"trailer")]))
                .map(Ok::<Bytes, io::Error>),
        ))
    }

    fn results(&mut self) -> Value {
        Value::Null
    }
}

/// Fails on its second chunk with its own error
struct FailSecond;

impl Transform for FailSecond {
    fn identity(&self) -> &str {
        "fail-second"
    }

    fn transform(&mut self, upstream: ByteStream, _ctx: &StageContext<'_>) -> conduit::Result<ByteStream> {
        Ok(Box::pin(upstream.enumerate().map(|(i, item)| {
            if i == 1 {
                Err(io::Error::new(io::ErrorKind::InvalidData, "stage rejected chunk"))
            } else {
                item
            }
        })))
    }

    fn results(&mut self) -> Value {
        Value::Null
    }
}

/// Download destination that fails on write or on shutdown
struct FailingDestination {
    fail_write: bool,
}

impl AsyncWrite for FailingDestination {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.fail_write {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::WriteZero, "destination refused data")));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::PermissionDenied, "quota exceeded")))
    }
}

fn registry() -> Arc<TransformRegistry> {
    let registry = TransformRegistry::with_builtins();
    registry
        .register_factory("swallow", Arc::new(|_: &Value| Ok(Box::new(Swallow) as Box<dyn Transform>)))
        .unwrap();
    registry
        .register_factory(
            "fail-second",
            Arc::new(|_: &Value| Ok(Box::new(FailSecond) as Box<dyn Transform>)),
        )
        .unwrap();
    Arc::new(registry)
}

fn memory_conduit(adapter: &MemoryAdapter) -> Conduit {
    Conduit::builder()
        .adapter(Arc::new(adapter.clone()))
        .transforms(registry())
        .build()
        .unwrap()
}

#[test]
fn test_missing_adapter() {
    let err = Conduit::builder().build().unwrap_err();
    assert!(matches!(err, ConduitError::MissingAdapter));
}

#[test]
fn test_transform_without_identity_rejected() {
    let conduit = Conduit::new(Arc::new(MemoryAdapter::new())).unwrap();
    let err = conduit
        .register_transform_factory("", Arc::new(|_: &Value| Ok(Box::new(Swallow) as Box<dyn Transform>)))
        .unwrap_err();

    assert!(matches!(
        err,
        ConduitError::InvalidIdentity {
            kind: IdentityKind::Transform,
            ..
        }
    ));
}

#[test]
fn test_unknown_compression_fails_before_io() {
    let adapter = MemoryAdapter::new();
    let conduit = memory_conduit(&adapter);
    let pipeline = conduit
        .pipeline()
        .use_transform_with("compress", json!({ "algorithm": "lz77" }))
        .unwrap();

    let err = pipeline
        .upload(bytes_stream(vec![Bytes::from_static(b"x")]), TransferOptions::new())
        .unwrap_err();
    assert!(matches!(err, ConduitError::InvalidOptions { ref identity, .. } if identity == "compress"));
    assert!(adapter.is_empty());
}

#[tokio::test]
async fn test_sink_error_rejects_once_without_commit() {
    let closes = Arc::new(AtomicUsize::new(0));
    let conduit = Conduit::new(Arc::new(BrokenSink {
        closes: Arc::clone(&closes),
    }))
    .unwrap();
    let pipeline = conduit.pipeline().use_transform("checksum").unwrap();

    let err = pipeline
        .upload(
            bytes_stream(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]),
            TransferOptions::new(),
        )
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Sink);
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    assert_eq!(err.to_string(), "Transfer failed at sink: disk full");
    assert_eq!(closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_transform_error_is_attributed_to_stage() {
    let adapter = MemoryAdapter::new();
    let conduit = memory_conduit(&adapter);
    let pipeline = conduit
        .pipeline()
        .use_transform("checksum")
        .unwrap()
        .use_transform("fail-second")
        .unwrap();

    let err = pipeline
        .upload(
            bytes_stream(vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]),
            TransferOptions::new().name("partial"),
        )
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Transform("fail-second".to_string()));
    assert_eq!(err.into_inner().to_string(), "stage rejected chunk");
    assert!(!adapter.contains("partial"));
}

#[tokio::test]
async fn test_first_error_wins_over_later_stages() {
    let adapter = MemoryAdapter::new();
    let conduit = memory_conduit(&adapter);
    let pipeline = conduit
        .pipeline()
        .use_transform("progress")
        .unwrap()
        .use_transform("fail-second")
        .unwrap();

    // fail-second replaces the forwarded source error with its own; the source still wins
    let source = stream::iter(vec![
        Ok(Bytes::from_static(b"1")),
        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client went away")),
        Ok(Bytes::from_static(b"3")),
    ]);
    let err = pipeline
        .upload(source, TransferOptions::new())
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Source);
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    assert_eq!(err.into_inner().to_string(), "client went away");
}

#[tokio::test]
async fn test_swallowed_error_still_fails_transfer() {
    let adapter = MemoryAdapter::new();
    let conduit = memory_conduit(&adapter);
    let pipeline = conduit.pipeline().use_transform("swallow").unwrap();

    let source = stream::iter(vec![
        Ok(Bytes::from_static(b"ok")),
        Err(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted")),
    ]);
    let err = pipeline
        .upload(source, TransferOptions::new().name("swallowed"))
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Source);
    assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    assert!(!adapter.contains("swallowed"));
}

#[tokio::test]
async fn test_remove_passes_adapter_error_through() {
    let conduit = Conduit::new(Arc::new(BrokenSink {
        closes: Arc::new(AtomicUsize::new(0)),
    }))
    .unwrap();

    let err = conduit.remove("locked.txt").unwrap().await.unwrap_err();
    assert!(matches!(err, AdapterError::PermissionDenied { ref location, .. } if location == "locked.txt"));
}

#[tokio::test]
async fn test_download_error_is_downcastable() {
    let conduit = Conduit::new(Arc::new(BrokenSink {
        closes: Arc::new(AtomicUsize::new(0)),
    }))
    .unwrap();

    let err = conduit
        .download("gone.txt", Vec::<u8>::new(), TransferOptions::new())
        .unwrap()
        .await
        .unwrap_err();

    let adapter_err = err.adapter_error().unwrap();
    assert_eq!(adapter_err.adapter_identity(), Some("broken"));
    assert!(adapter_err.is_not_found());
}

#[tokio::test]
async fn test_download_destination_write_error() {
    let adapter = MemoryAdapter::new();
    adapter.add_object("report.csv", b"a,b,c");
    let conduit = memory_conduit(&adapter);

    let destination = FailingDestination {
        fail_write: true,
    };
    let err = conduit
        .download("report.csv", destination, TransferOptions::new())
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Sink);
    assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    assert_eq!(err.into_inner().to_string(), "destination refused data");
}

#[tokio::test]
async fn test_download_destination_shutdown_error() {
    let adapter = MemoryAdapter::new();
    adapter.add_object("report.csv", b"a,b,c");
    let conduit = memory_conduit(&adapter);
    let pipeline = conduit.pipeline().use_transform("checksum").unwrap();

    let destination = FailingDestination {
        fail_write: false,
    };
    let err = pipeline
        .download("report.csv", destination, TransferOptions::new())
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Sink);
    assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn test_truncated_compressed_download_fails() {
    let payload: Vec<u8> = (0..80_000u32).map(|i| (i % 251) as u8).collect();

    for algorithm in ["gzip", "deflate", "zstd"] {
        let adapter = MemoryAdapter::new();
        let conduit = memory_conduit(&adapter);
        let pipeline = conduit
            .pipeline()
            .use_transform_with("compress", json!({ "algorithm": algorithm }))
            .unwrap();

        pipeline
            .upload(
                bytes_stream(vec![Bytes::from(payload.clone())]),
                TransferOptions::new().name("data.bin"),
            )
            .unwrap()
            .await
            .unwrap();

        let stored = adapter.get_object("data.bin").unwrap();
        adapter.add_object("data.bin", &stored[..stored.len() / 2]);

        let err = pipeline
            .download("data.bin", Vec::<u8>::new(), TransferOptions::new())
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Transform("compress".to_string()), "{algorithm}");
    }
}
