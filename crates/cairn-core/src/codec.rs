use std::sync::Arc;

use crate::compress::{self, Compression};
use crate::crypto::CryptoEngine;
use crate::error::{CairnError, Result};
use crate::hashing::Hasher;
use crate::resource::{Checksum, ResourceKind};

/// Current frame schema version.
pub const FRAME_VERSION: u32 = 1;

/// Frame header: `[kind:u8][version:u32-le]`.
pub const FRAME_HEADER_LEN: usize = 5;

/// Encodes a plaintext buffer into its stored form and back:
/// compress → authenticated-encrypt → prepend frame header. The header is
/// bound as AAD so a blob cannot be replayed under a different kind.
pub struct Codec {
    hasher: Hasher,
    compression: Compression,
    crypto: Arc<dyn CryptoEngine>,
}

impl Codec {
    pub fn new(hasher: Hasher, compression: Compression, crypto: Arc<dyn CryptoEngine>) -> Self {
        Self {
            hasher,
            compression,
            crypto,
        }
    }

    /// Checksum of a plaintext under the repository's hashing configuration.
    pub fn checksum(&self, data: &[u8]) -> Checksum {
        self.hasher.checksum(data)
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    pub fn is_encrypting(&self) -> bool {
        self.crypto.is_encrypting()
    }

    fn frame_header(kind: ResourceKind) -> [u8; FRAME_HEADER_LEN] {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header[0] = kind as u8;
        header[1..5].copy_from_slice(&FRAME_VERSION.to_le_bytes());
        header
    }

    pub fn encode(&self, kind: ResourceKind, plaintext: &[u8]) -> Result<Vec<u8>> {
        let compressed = compress::compress(self.compression, plaintext)?;
        let header = Self::frame_header(kind);
        let sealed = self.crypto.encrypt(&compressed, &header)?;

        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + sealed.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decode(&self, framed: &[u8]) -> Result<(ResourceKind, Vec<u8>)> {
        if framed.len() < FRAME_HEADER_LEN {
            return Err(CairnError::Corruption("frame shorter than header".into()));
        }
        let kind = ResourceKind::from_u8(framed[0])?;
        let version = u32::from_le_bytes(
            framed[1..5].try_into().expect("4-byte version field"),
        );
        if version > FRAME_VERSION {
            return Err(CairnError::UnsupportedVersion(version));
        }

        let header = &framed[..FRAME_HEADER_LEN];
        let compressed = self.crypto.decrypt(&framed[FRAME_HEADER_LEN..], header)?;
        let plaintext = compress::decompress(&compressed)?;
        Ok((kind, plaintext))
    }

    /// Decode and require a specific resource kind.
    pub fn decode_expect(&self, expected: ResourceKind, framed: &[u8]) -> Result<Vec<u8>> {
        let (kind, plaintext) = self.decode(framed)?;
        if kind != expected {
            return Err(CairnError::Corruption(format!(
                "expected {expected} blob, found {kind}"
            )));
        }
        Ok(plaintext)
    }
}
