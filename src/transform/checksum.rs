/*!
 * Streaming checksum transform
 *
 * Hashes every chunk as it passes through and reports the digest once the
 * transfer has completed. Bytes are forwarded unchanged.
 */

use super::{lock, parse_options, StageContext, Transform, TransformKind};
use crate::adapter::ByteStream;
use crate::error::Result;
use base64::Engine;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Digest;
use std::fmt;
use std::sync::{Arc, Mutex};

const IDENTITY: &str = "checksum";

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
            ChecksumAlgorithm::Sha1 => write!(f, "sha1"),
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
            ChecksumAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

/// How the digest is rendered in the transfer report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestEncoding {
    #[default]
    Hex,
    Base64,
    /// JSON array of byte values
    Bytes,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ChecksumOptions {
    algorithm: ChecksumAlgorithm,
    encoding: DigestEncoding,
    /// Shorthand for `encoding = "bytes"`
    buffer: bool,
}

impl ChecksumOptions {
    fn encoding(&self) -> DigestEncoding {
        if self.buffer {
            DigestEncoding::Bytes
        } else {
            self.encoding
        }
    }
}

/// Streaming hasher over every supported algorithm
enum StreamingHasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl StreamingHasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Self::Md5(md5::Md5::new()),
            ChecksumAlgorithm::Sha1 => Self::Sha1(sha1::Sha1::new()),
            ChecksumAlgorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
            ChecksumAlgorithm::Sha512 => Self::Sha512(sha2::Sha512::new()),
            ChecksumAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
            Self::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}

#[derive(Default)]
struct ChecksumState {
    hasher: Option<StreamingHasher>,
    digest: Option<Vec<u8>>,
}

/// Checksum transform
///
/// Options: `algorithm` (`md5` by default, also `sha1`, `sha256`, `sha512`,
/// `blake3`) and `encoding` (`hex` by default, also `base64`, `bytes`).
/// Result: `{ "algorithm": ..., "value": ... }`.
pub struct Checksum {
    options: ChecksumOptions,
    state: Arc<Mutex<ChecksumState>>,
}

impl Checksum {
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.options.algorithm
    }

    fn encode(&self, digest: &[u8]) -> Value {
        match self.options.encoding() {
            DigestEncoding::Hex => Value::String(hex::encode(digest)),
            DigestEncoding::Base64 => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(digest))
            }
            DigestEncoding::Bytes => json!(digest),
        }
    }
}

impl TransformKind for Checksum {
    const IDENTITY: &'static str = IDENTITY;

    fn new(options: &Value) -> Result<Self> {
        Ok(Self {
            options: parse_options(IDENTITY, options)?,
            state: Arc::new(Mutex::new(ChecksumState::default())),
        })
    }
}

impl Transform for Checksum {
    fn identity(&self) -> &str {
        IDENTITY
    }

    fn transform(&mut self, upstream: ByteStream, ctx: &StageContext<'_>) -> Result<ByteStream> {
        self.options = parse_options(IDENTITY, ctx.options)?;
        lock(&self.state).hasher = Some(StreamingHasher::new(self.options.algorithm));

        let state = Arc::clone(&self.state);
        let stream = upstream.map(move |item: std::io::Result<Bytes>| {
            if let Ok(chunk) = &item {
                if let Some(hasher) = lock(&state).hasher.as_mut() {
                    hasher.update(chunk);
                }
            }
            item
        });

        Ok(Box::pin(stream))
    }

    fn results(&mut self) -> Value {
        let digest = {
            let mut state = lock(&self.state);
            if let Some(hasher) = state.hasher.take() {
                state.digest = Some(hasher.finalize());
            }
            state.digest.clone()
        };

        json!({
            "algorithm": self.options.algorithm,
            "value": digest.map(|d| self.encode(&d)).unwrap_or(Value::Null),
        })
    }
}
