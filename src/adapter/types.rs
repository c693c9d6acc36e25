//! Stream types shared by adapters, transforms and the pipeline

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// Async stream of file data
///
/// Used for upload sources, adapter read streams and every transform stage.
/// Errors travel as stream items; the stream ends after yielding one.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Adapter read stream, an alias kept for readability at adapter boundaries
pub type ReadStream = ByteStream;

/// Async write sink for file data
///
/// `close()` completing is the sole success signal for a write: adapters
/// commit data (flush files, `put` objects) there.
#[async_trait]
pub trait WriteStream: Send {
    /// Write bytes to the stream
    async fn write(&mut self, data: Bytes) -> io::Result<()>;

    /// Flush any buffered data
    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Finish the stream and commit everything written
    async fn close(&mut self) -> io::Result<()>;
}

/// Wrap any `AsyncWrite` as a [`WriteStream`]
///
/// `close()` flushes and shuts the writer down.
pub struct WriterStream<W> {
    writer: W,
}

impl<W> WriterStream<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> WriteStream for WriterStream<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        self.writer.write_all(&data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.flush().await?;
        self.writer.shutdown().await
    }
}

/// Turn any `AsyncRead` into a [`ByteStream`]
pub fn reader_stream<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(ReaderStream::new(reader))
}

/// Build a [`ByteStream`] over in-memory chunks
pub fn bytes_stream<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Bytes>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures::stream::iter(
        chunks.into_iter().map(Ok::<Bytes, io::Error>),
    ))
}
