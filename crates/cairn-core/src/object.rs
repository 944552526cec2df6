use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::Checksum;

pub const OBJECT_VERSION: u32 = 1;

/// How many leading bytes content-type sniffing examines.
pub const SNIFF_LEN: usize = 512;

/// Reference to one chunk of a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub checksum: Checksum,
    /// Plaintext length of the chunk.
    pub length: u32,
}

/// A file-content descriptor: the ordered chunk list plus sniffed metadata.
/// The object's own checksum is the hash of its serialized form and is not
/// stored inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    pub version: u32,
    pub chunks: Vec<ChunkRef>,
    pub content_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Object {
    pub fn new(chunks: Vec<ChunkRef>, content_type: String) -> Self {
        Self {
            version: OBJECT_VERSION,
            chunks,
            content_type,
            tags: Vec::new(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }

    /// Total plaintext size described by this object.
    pub fn size(&self) -> u64 {
        self.chunks.iter().map(|c| c.length as u64).sum()
    }
}

/// Detect a content type from a file's first bytes. Magic numbers first,
/// then a UTF-8/binary heuristic.
pub fn sniff_content_type(head: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1F\x8B", "application/gzip"),
        (b"\x28\xB5\x2F\xFD", "application/zstd"),
        (b"7z\xBC\xAF\x27\x1C", "application/x-7z-compressed"),
        (b"\x7FELF", "application/x-executable"),
        (b"OggS", "audio/ogg"),
        (b"fLaC", "audio/flac"),
        (b"ID3", "audio/mpeg"),
        (b"RIFF", "audio/wave"),
        (b"\x1A\x45\xDF\xA3", "video/webm"),
        (b"{", "application/json"),
        (b"<?xml", "text/xml"),
        (b"<!DOCTYPE html", "text/html"),
        (b"<html", "text/html"),
    ];

    let head = &head[..head.len().min(SNIFF_LEN)];
    for (magic, content_type) in SIGNATURES {
        if head.starts_with(magic) {
            return content_type;
        }
    }
    if head.len() >= 8 && &head[4..8] == b"ftyp" {
        return "video/mp4";
    }

    if head.is_empty() || looks_textual(head) {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn looks_textual(head: &[u8]) -> bool {
    // Reject NUL and rare control bytes; tolerate a truncated trailing
    // UTF-8 sequence at the sniff boundary.
    !head
        .iter()
        .any(|&b| b == 0 || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r' && b != 0x0C))
}

/// Incremental Shannon entropy over a byte stream, in bits per byte.
pub struct EntropyAccumulator {
    counts: [u64; 256],
    total: u64,
}

impl Default for EntropyAccumulator {
    fn default() -> Self {
        Self {
            counts: [0u64; 256],
            total: 0,
        }
    }
}

impl EntropyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.counts[byte as usize] += 1;
        }
        self.total += data.len() as u64;
    }

    pub fn finish(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let total = self.total as f64;
        let mut entropy = 0.0;
        for &count in &self.counts {
            if count > 0 {
                let p = count as f64 / total;
                entropy -= p * p.log2();
            }
        }
        entropy
    }
}
