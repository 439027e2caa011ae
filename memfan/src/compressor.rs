//! Payload compressors.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::command::StoreVerb;
use crate::value::{FLAG_GZIP, Payload};

/// Minimum fraction of the original size a compressed payload must save
/// before it is adopted.
const MIN_SAVING: f64 = 0.20;

/// Compress outbound payloads and decompress inbound ones.
pub trait Compressor: Send + Sync {
    /// Maybe compress a payload. Concatenating verbs and payloads below the
    /// threshold pass through unchanged.
    fn compress(&self, payload: Payload, verb: StoreVerb) -> Payload;

    /// Undo compression if the payload is marked compressed. `None` means
    /// the payload claimed compression but could not be expanded.
    fn decompress(&self, payload: Payload) -> Option<Payload>;

    /// The current threshold in bytes; 0 disables compression.
    fn threshold(&self) -> usize;

    /// Change the threshold.
    fn set_threshold(&mut self, bytes: usize);
}

/// Gzip compressor, flag bit 2.
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    threshold: usize,
}

impl GzipCompressor {
    /// A compressor that engages at `threshold` bytes; 0 never compresses.
    pub fn new(threshold: usize) -> Self {
        GzipCompressor { threshold }
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, payload: Payload, verb: StoreVerb) -> Payload {
        if verb.is_concat() || self.threshold == 0 || payload.data.len() < self.threshold {
            return payload;
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let compressed = encoder
            .write_all(&payload.data)
            .and_then(|()| encoder.finish());
        let compressed = match compressed {
            Ok(data) => data,
            Err(err) => {
                log::warn!("gzip compression failed, storing uncompressed: {err}");
                return payload;
            }
        };

        // Only adopt the compressed form if it saves at least MIN_SAVING.
        let limit = (payload.data.len() as f64 * (1.0 - MIN_SAVING)) as usize;
        if compressed.len() < limit {
            Payload {
                data: compressed,
                flags: payload.flags | FLAG_GZIP,
            }
        } else {
            payload
        }
    }

    fn decompress(&self, payload: Payload) -> Option<Payload> {
        if payload.flags & FLAG_GZIP == 0 {
            return Some(payload);
        }
        let mut data = Vec::new();
        match GzDecoder::new(payload.data.as_slice()).read_to_end(&mut data) {
            Ok(_) => Some(Payload {
                data,
                flags: payload.flags & !FLAG_GZIP,
            }),
            Err(err) => {
                log::warn!("failed to decompress payload: {err}");
                None
            }
        }
    }

    fn threshold(&self) -> usize {
        self.threshold
    }

    fn set_threshold(&mut self, bytes: usize) {
        self.threshold = bytes;
    }
}
