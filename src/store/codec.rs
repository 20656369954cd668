//! Encoding of entries for the remote store.
//!
//! Layout: one flag byte, then the payload.
//!
//! ```text
//! 0x00 | json
//! 0x01 | zstd(json)
//! ```
//!
//! JSON larger than the compression threshold is zstd-compressed before it is
//! written, keeping big values under typical item size limits. Decompression
//! stops at a configured size so a corrupt frame cannot exhaust memory.

use std::io::Read;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::cache::entry::TemporalEntry;
use crate::config::StoreConfig;

const FLAG_PLAIN: u8 = 0x00;
const FLAG_ZSTD: u8 = 0x01;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zstd failed: {0}")]
    Zstd(#[from] std::io::Error),

    #[error("Empty payload")]
    Empty,

    #[error("Unknown encoding flag {0:#04x}")]
    UnknownFlag(u8),

    #[error("Decoded entry exceeds {0} bytes")]
    TooLarge(usize),
}

/// Encodes and decodes [`TemporalEntry`] values.
#[derive(Debug, Clone)]
pub struct EntryCodec {
    compression_threshold: usize,
    zstd_level: i32,
    max_decoded_len: usize,
}

impl Default for EntryCodec {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

impl EntryCodec {
    pub fn new(compression_threshold: usize, zstd_level: i32) -> Self {
        Self {
            compression_threshold,
            zstd_level,
            max_decoded_len: StoreConfig::default().max_decoded_bytes,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.compression_threshold, config.zstd_level)
            .with_max_decoded_len(config.max_decoded_bytes)
    }

    pub fn with_max_decoded_len(mut self, max_decoded_len: usize) -> Self {
        self.max_decoded_len = max_decoded_len;
        self
    }

    pub fn encode<V: Serialize>(&self, entry: &TemporalEntry<V>) -> Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(entry)?;

        if json.len() > self.compression_threshold {
            let compressed = zstd::encode_all(json.as_slice(), self.zstd_level)?;
            let mut out = Vec::with_capacity(compressed.len() + 1);
            out.push(FLAG_ZSTD);
            out.extend_from_slice(&compressed);
            Ok(out)
        } else {
            let mut out = Vec::with_capacity(json.len() + 1);
            out.push(FLAG_PLAIN);
            out.extend_from_slice(&json);
            Ok(out)
        }
    }

    pub fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<TemporalEntry<V>, CodecError> {
        let (&flag, payload) = bytes.split_first().ok_or(CodecError::Empty)?;
        match flag {
            FLAG_PLAIN => Ok(serde_json::from_slice(payload)?),
            FLAG_ZSTD => {
                let limit = u64::try_from(self.max_decoded_len).unwrap_or(u64::MAX);
                let mut json = Vec::new();
                zstd::stream::read::Decoder::with_buffer(payload)?
                    .take(limit.saturating_add(1))
                    .read_to_end(&mut json)?;
                if json.len() > self.max_decoded_len {
                    return Err(CodecError::TooLarge(self.max_decoded_len));
                }
                Ok(serde_json::from_slice(&json)?)
            }
            other => Err(CodecError::UnknownFlag(other)),
        }
    }
}
