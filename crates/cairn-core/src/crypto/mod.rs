pub mod aes_gcm;
pub mod key;

use crate::error::{CairnError, Result};

/// Plaintext encrypted into the configuration at create time. Decrypting it
/// successfully proves the derived key is correct before any data is read.
const CANARY_PLAINTEXT: &[u8] = b"cairn-canary-v1";
const CANARY_AAD: &[u8] = b"canary";

/// Trait for encrypting and decrypting repository blobs.
pub trait CryptoEngine: Send + Sync {
    /// Encrypt plaintext. Returns `[nonce][ciphertext+tag]`.
    /// `aad` is authenticated but not encrypted (the frame header bytes).
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt data produced by `encrypt`. `aad` must match.
    fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Whether this engine actually encrypts data.
    fn is_encrypting(&self) -> bool;
}

/// No-encryption engine.
pub struct PlaintextEngine;

impl CryptoEngine for PlaintextEngine {
    fn encrypt(&self, plaintext: &[u8], _aad: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, data: &[u8], _aad: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn is_encrypting(&self) -> bool {
        false
    }
}

/// Produce the canary ciphertext stored in the repository configuration.
pub fn make_canary(engine: &dyn CryptoEngine) -> Result<Vec<u8>> {
    engine.encrypt(CANARY_PLAINTEXT, CANARY_AAD)
}

/// Verify a canary against the derived key. A failed decryption means the
/// passphrase is wrong, not that data is corrupt.
pub fn verify_canary(engine: &dyn CryptoEngine, canary: &[u8]) -> Result<()> {
    match engine.decrypt(canary, CANARY_AAD) {
        Ok(plaintext) if plaintext == CANARY_PLAINTEXT => Ok(()),
        _ => Err(CairnError::WrongKey),
    }
}
