use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::resource::Checksum;

type HmacSha256 = Hmac<Sha256>;

/// Blob checksum function. Plain SHA-256 by default; when the repository is
/// encrypted the hasher is MAC-keyed with the derived key so checksums are
/// unforgeable without the passphrase.
#[derive(Clone)]
pub enum Hasher {
    Sha256,
    HmacSha256([u8; 32]),
}

impl Hasher {
    pub fn checksum(&self, data: &[u8]) -> Checksum {
        match self {
            Hasher::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                let digest = hasher.finalize();
                let mut out = [0u8; 32];
                out.copy_from_slice(&digest);
                Checksum(out)
            }
            Hasher::HmacSha256(key) => {
                let mut mac = HmacSha256::new_from_slice(key)
                    .expect("HMAC accepts any key length");
                mac.update(data);
                let digest = mac.finalize().into_bytes();
                let mut out = [0u8; 32];
                out.copy_from_slice(&digest);
                Checksum(out)
            }
        }
    }

    /// Checksum over multiple segments without concatenating them.
    pub fn checksum_parts(&self, parts: &[&[u8]]) -> Checksum {
        match self {
            Hasher::Sha256 => {
                let mut hasher = Sha256::new();
                for part in parts {
                    hasher.update(part);
                }
                let digest = hasher.finalize();
                let mut out = [0u8; 32];
                out.copy_from_slice(&digest);
                Checksum(out)
            }
            Hasher::HmacSha256(key) => {
                let mut mac = HmacSha256::new_from_slice(key)
                    .expect("HMAC accepts any key length");
                for part in parts {
                    mac.update(part);
                }
                let digest = mac.finalize().into_bytes();
                let mut out = [0u8; 32];
                out.copy_from_slice(&digest);
                Checksum(out)
            }
        }
    }
}
