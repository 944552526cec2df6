use std::io::Read;

use crate::config::CompressionConfig;
use crate::error::{CairnError, Result};

const TAG_NONE: u8 = 0x00;
const TAG_LZ4: u8 = 0x01;
const TAG_ZSTD: u8 = 0x02;

/// Maximum decompressed output size. State and index blobs can grow well
/// past chunk size, so the cap is generous; it exists to stop decompression
/// bombs, not to bound honest blobs.
const MAX_DECOMPRESS_SIZE: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Lz4,
    Zstd {
        level: i32,
    },
}

impl Compression {
    /// Map the persisted configuration section to an algorithm.
    pub fn from_config(config: Option<&CompressionConfig>) -> Result<Self> {
        match config {
            None => Ok(Compression::None),
            Some(c) => match c.algorithm.as_str() {
                "NONE" => Ok(Compression::None),
                "LZ4" => Ok(Compression::Lz4),
                "ZSTD" => Ok(Compression::Zstd { level: 3 }),
                other => Err(CairnError::Config(format!(
                    "unknown compression algorithm: {other}"
                ))),
            },
        }
    }
}

/// Compress data and prepend a 1-byte tag identifying the codec.
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::None => {
            let mut out = Vec::with_capacity(1 + data.len());
            out.push(TAG_NONE);
            out.extend_from_slice(data);
            Ok(out)
        }
        Compression::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(data);
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(TAG_LZ4);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
        Compression::Zstd { level } => {
            let compressed = zstd::bulk::compress(data, level)
                .map_err(|e| CairnError::Other(format!("zstd compress: {e}")))?;
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(TAG_ZSTD);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
    }
}

/// Decompress data by reading the 1-byte tag prefix and dispatching.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(CairnError::Corruption("empty compressed payload".into()));
    }
    let tag = data[0];
    let payload = &data[1..];
    match tag {
        TAG_NONE => Ok(payload.to_vec()),
        TAG_LZ4 => {
            if payload.len() < 4 {
                return Err(CairnError::Corruption("lz4: payload too short".into()));
            }
            let uncompressed_size =
                u32::from_le_bytes(payload[..4].try_into().expect("4-byte prefix")) as u64;
            if uncompressed_size > MAX_DECOMPRESS_SIZE {
                return Err(CairnError::Corruption(format!(
                    "lz4: decompressed size ({uncompressed_size}) exceeds limit"
                )));
            }
            lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| CairnError::Corruption(format!("lz4: {e}")))
        }
        TAG_ZSTD => {
            let mut decoder = zstd::stream::Decoder::new(std::io::Cursor::new(payload))
                .map_err(|e| CairnError::Corruption(format!("zstd init: {e}")))?;
            let mut output = Vec::new();
            decoder
                .by_ref()
                .take(MAX_DECOMPRESS_SIZE + 1)
                .read_to_end(&mut output)
                .map_err(|e| CairnError::Corruption(format!("zstd: {e}")))?;
            if output.len() as u64 > MAX_DECOMPRESS_SIZE {
                return Err(CairnError::Corruption(
                    "zstd: decompressed size exceeds limit".into(),
                ));
            }
            Ok(output)
        }
        _ => Err(CairnError::Corruption(format!(
            "unknown compression tag: {tag}"
        ))),
    }
}
