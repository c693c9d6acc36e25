/*!
 * Compression transform
 *
 * Compresses or decompresses the stream with gzip, deflate (zlib or raw) or
 * zstd. Uploads compress and downloads decompress unless `mode` says otherwise.
 */

use super::{lock, parse_options, Direction, StageContext, Transform, TransformKind};
use crate::adapter::ByteStream;
use crate::error::{ConduitError, Result};
use bytes::Bytes;
use flate2::write::{DeflateEncoder, GzDecoder, GzEncoder, ZlibEncoder};
use flate2::{Compression, Decompress, FlushDecompress, Status};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use zstd::stream::raw::{Decoder as ZstdRawDecoder, InBuffer, Operation, OutBuffer};

const IDENTITY: &str = "compress";

/// Default zstd level, matching the zstd CLI
const ZSTD_DEFAULT_LEVEL: i32 = 3;

/// Default gzip/deflate level
const FLATE_DEFAULT_LEVEL: i32 = 6;

/// Decoder output is produced in steps of this size
const DECODE_STEP: usize = 32 * 1024;

/// Compression algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    Gzip,
    /// zlib-wrapped deflate, or bare deflate with `raw = true`
    Deflate,
    Zstd,
}

impl CompressionAlgorithm {
    fn default_level(self) -> i32 {
        match self {
            CompressionAlgorithm::Gzip | CompressionAlgorithm::Deflate => FLATE_DEFAULT_LEVEL,
            CompressionAlgorithm::Zstd => ZSTD_DEFAULT_LEVEL,
        }
    }

    fn validate_level(self, level: i32) -> std::result::Result<(), String> {
        let valid = match self {
            CompressionAlgorithm::Gzip | CompressionAlgorithm::Deflate => (0..=9).contains(&level),
            CompressionAlgorithm::Zstd => zstd::compression_level_range().contains(&level),
        };
        if valid {
            Ok(())
        } else {
            Err(format!("level {} is out of range for {}", level, self))
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::Gzip => write!(f, "gzip"),
            CompressionAlgorithm::Deflate => write!(f, "deflate"),
            CompressionAlgorithm::Zstd => write!(f, "zstd"),
        }
    }
}

/// Whether the stage compresses or decompresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    Compress,
    Decompress,
}

impl CompressionMode {
    fn parse(mode: &str) -> Option<Self> {
        match mode {
            "compress" => Some(CompressionMode::Compress),
            "decompress" => Some(CompressionMode::Decompress),
            _ => None,
        }
    }

    fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::Upload => CompressionMode::Compress,
            Direction::Download => CompressionMode::Decompress,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CompressOptions {
    algorithm: CompressionAlgorithm,
    raw: bool,
    level: Option<i32>,
    /// Kept as text so an unknown mode is only rejected when the stage is wired
    mode: Option<String>,
}

impl CompressOptions {
    fn level(&self) -> i32 {
        self.level.unwrap_or_else(|| self.algorithm.default_level())
    }
}

#[derive(Debug, Default)]
struct CompressState {
    mode: Option<CompressionMode>,
    bytes_in: u64,
    bytes_out: u64,
}

/// Compression transform
///
/// Options: `algorithm` (`gzip` by default, also `deflate`, `zstd`), `raw`
/// (bare deflate without zlib framing), `level` and `mode`
/// (`compress`/`decompress`).
pub struct Compress {
    options: CompressOptions,
    state: Arc<Mutex<CompressState>>,
}

impl Compress {
    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.options.algorithm
    }
}

impl TransformKind for Compress {
    const IDENTITY: &'static str = IDENTITY;

    fn new(options: &Value) -> Result<Self> {
        let options: CompressOptions = parse_options(IDENTITY, options)?;
        options
            .algorithm
            .validate_level(options.level())
            .map_err(|e| ConduitError::invalid_options(IDENTITY, e))?;

        Ok(Self {
            options,
            state: Arc::new(Mutex::new(CompressState::default())),
        })
    }
}

impl Transform for Compress {
    fn identity(&self) -> &str {
        IDENTITY
    }

    fn transform(&mut self, upstream: ByteStream, ctx: &StageContext<'_>) -> Result<ByteStream> {
        let options: CompressOptions = parse_options(IDENTITY, ctx.options)?;
        let mode = match options.mode.as_deref() {
            None => CompressionMode::for_direction(ctx.direction),
            Some(mode) => CompressionMode::parse(mode).ok_or_else(|| {
                ConduitError::invalid_options(
                    IDENTITY,
                    format!("invalid mode '{}', expected 'compress' or 'decompress'", mode),
                )
            })?,
        };
        let level = options.level();
        options
            .algorithm
            .validate_level(level)
            .map_err(|e| ConduitError::invalid_options(IDENTITY, e))?;

        let codec = build_codec(options.algorithm, options.raw, level, mode)?;
        tracing::debug!(
            algorithm = %options.algorithm,
            ?mode,
            level,
            location = ctx.location,
            "Wiring compression stage"
        );

        self.options = options;
        lock(&self.state).mode = Some(mode);

        Ok(drive(upstream, codec, Arc::clone(&self.state)))
    }

    fn results(&mut self) -> Value {
        let state = lock(&self.state);
        json!({
            "algorithm": self.options.algorithm,
            "raw": self.options.raw,
            "level": self.options.level(),
            "mode": state.mode,
            "bytes_in": state.bytes_in,
            "bytes_out": state.bytes_out,
        })
    }
}

/// A push-style (de)compressor writing into an in-memory buffer
trait Codec: Write + Send {
    /// Output produced so far
    fn output(&mut self) -> &mut Vec<u8>;

    /// Flush trailing output (footers, checksums)
    fn finish(&mut self) -> io::Result<()>;
}

macro_rules! flate_codec {
    ($($ty:ident),*) => {
        $(
            impl Codec for $ty<Vec<u8>> {
                fn output(&mut self) -> &mut Vec<u8> {
                    self.get_mut()
                }

                fn finish(&mut self) -> io::Result<()> {
                    self.try_finish()
                }
            }
        )*
    };
}

flate_codec!(GzEncoder, GzDecoder, ZlibEncoder, DeflateEncoder);

impl Codec for zstd::stream::write::Encoder<'static, Vec<u8>> {
    fn output(&mut self) -> &mut Vec<u8> {
        self.get_mut()
    }

    fn finish(&mut self) -> io::Result<()> {
        self.do_finish()
    }
}

/// zlib or raw deflate decoder that insists on seeing the final block
struct FlateDecoder {
    inner: Decompress,
    out: Vec<u8>,
    ended: bool,
}

impl FlateDecoder {
    fn new(zlib_header: bool) -> Self {
        Self {
            inner: Decompress::new(zlib_header),
            out: Vec::new(),
            ended: false,
        }
    }
}

impl Write for FlateDecoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut input = buf;
        while !input.is_empty() {
            if self.ended {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "trailing data after end of deflate stream",
                ));
            }

            self.out.reserve(DECODE_STEP);
            let (in_before, out_before) = (self.inner.total_in(), self.inner.total_out());
            let status = self
                .inner
                .decompress_vec(input, &mut self.out, FlushDecompress::None)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let consumed = (self.inner.total_in() - in_before) as usize;
            let produced = self.inner.total_out() - out_before;
            input = &input[consumed..];

            match status {
                Status::StreamEnd => self.ended = true,
                _ if consumed == 0 && produced == 0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "deflate decoder made no progress",
                    ));
                }
                _ => {}
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Codec for FlateDecoder {
    fn output(&mut self) -> &mut Vec<u8> {
        &mut self.out
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.ended {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "deflate stream ended before its final block",
            ))
        }
    }
}

/// zstd decoder that fails when input stops in the middle of a frame
struct ZstdDecoder {
    inner: ZstdRawDecoder<'static>,
    scratch: Vec<u8>,
    out: Vec<u8>,
    /// Last hint from the decoder; zero once a frame is complete
    pending: usize,
}

impl ZstdDecoder {
    fn new() -> io::Result<Self> {
        Ok(Self {
            inner: ZstdRawDecoder::new()?,
            scratch: vec![0; DECODE_STEP],
            out: Vec::new(),
            pending: 1,
        })
    }
}

impl Write for ZstdDecoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut input = InBuffer::around(buf);
        loop {
            let (hint, produced) = {
                let mut output = OutBuffer::around(&mut self.scratch[..]);
                let hint = self.inner.run(&mut input, &mut output)?;
                (hint, output.pos())
            };
            self.out.extend_from_slice(&self.scratch[..produced]);
            self.pending = hint;

            // A full scratch buffer may leave output buffered inside the decoder
            if input.pos() == buf.len() && produced < self.scratch.len() {
                break;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Codec for ZstdDecoder {
    fn output(&mut self) -> &mut Vec<u8> {
        &mut self.out
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.pending == 0 {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "zstd stream ended inside a frame",
            ))
        }
    }
}

fn build_codec(
    algorithm: CompressionAlgorithm,
    raw: bool,
    level: i32,
    mode: CompressionMode,
) -> Result<Box<dyn Codec>> {
    // Ignored by zstd, whose levels may be negative
    let flate_level = Compression::new(level.max(0) as u32);
    let codec: Box<dyn Codec> = match (algorithm, mode, raw) {
        (CompressionAlgorithm::Gzip, CompressionMode::Compress, _) => {
            Box::new(GzEncoder::new(Vec::new(), flate_level))
        }
        (CompressionAlgorithm::Gzip, CompressionMode::Decompress, _) => {
            Box::new(GzDecoder::new(Vec::new()))
        }
        (CompressionAlgorithm::Deflate, CompressionMode::Compress, false) => {
            Box::new(ZlibEncoder::new(Vec::new(), flate_level))
        }
        (CompressionAlgorithm::Deflate, CompressionMode::Decompress, false) => {
            Box::new(FlateDecoder::new(true))
        }
        (CompressionAlgorithm::Deflate, CompressionMode::Compress, true) => {
            Box::new(DeflateEncoder::new(Vec::new(), flate_level))
        }
        (CompressionAlgorithm::Deflate, CompressionMode::Decompress, true) => {
            Box::new(FlateDecoder::new(false))
        }
        (CompressionAlgorithm::Zstd, CompressionMode::Compress, _) => Box::new(
            zstd::stream::write::Encoder::new(Vec::new(), level)
                .map_err(|e| ConduitError::invalid_options(IDENTITY, e))?,
        ),
        (CompressionAlgorithm::Zstd, CompressionMode::Decompress, _) => Box::new(
            ZstdDecoder::new().map_err(|e| ConduitError::invalid_options(IDENTITY, e))?,
        ),
    };
    Ok(codec)
}

struct CodecStream {
    upstream: ByteStream,
    /// `None` once the stream has finished or failed
    codec: Option<Box<dyn Codec>>,
    state: Arc<Mutex<CompressState>>,
}

/// Push every upstream chunk through `codec`, yielding whatever it produced
fn drive(upstream: ByteStream, codec: Box<dyn Codec>, state: Arc<Mutex<CompressState>>) -> ByteStream {
    let init = CodecStream {
        upstream,
        codec: Some(codec),
        state,
    };

    let stream = stream::unfold(init, |mut s| async move {
        loop {
            let codec = s.codec.as_mut()?;

            match s.upstream.next().await {
                Some(Ok(chunk)) => {
                    let produced = codec
                        .write_all(&chunk)
                        .map(|()| std::mem::take(codec.output()));
                    lock(&s.state).bytes_in += chunk.len() as u64;

                    match produced {
                        Ok(out) if out.is_empty() => continue,
                        Ok(out) => {
                            lock(&s.state).bytes_out += out.len() as u64;
                            return Some((Ok(Bytes::from(out)), s));
                        }
                        Err(e) => {
                            s.codec = None;
                            return Some((Err(e), s));
                        }
                    }
                }
                Some(Err(e)) => {
                    s.codec = None;
                    return Some((Err(e), s));
                }
                None => {
                    let mut codec = s.codec.take()?;
                    match codec.finish().map(|()| std::mem::take(codec.output())) {
                        Ok(out) if out.is_empty() => return None,
                        Ok(out) => {
                            lock(&s.state).bytes_out += out.len() as u64;
                            return Some((Ok(Bytes::from(out)), s));
                        }
                        Err(e) => return Some((Err(e), s)),
                    }
                }
            }
        }
    });

    Box::pin(stream)
}
