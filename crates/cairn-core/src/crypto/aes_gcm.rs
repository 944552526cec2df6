use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::{CairnError, Result};

use super::CryptoEngine;

const NONCE_LEN: usize = 12;

/// AES-256-GCM engine with a per-blob random nonce.
/// Wire format: `[12-byte nonce][ciphertext + 16-byte tag]`.
pub struct Aes256GcmEngine {
    cipher: Aes256Gcm,
}

impl Aes256GcmEngine {
    pub fn new(key: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte AES-256 key");
        Self { cipher }
    }
}

impl CryptoEngine for Aes256GcmEngine {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CairnError::Other("AES-GCM encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(CairnError::Corruption("ciphertext shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CairnError::WrongKey)
    }

    fn is_encrypting(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let engine = Aes256GcmEngine::new(&[0x42; 32]);
        let plaintext = b"some secret data";
        let encrypted = engine.encrypt(plaintext, b"aad").unwrap();
        assert_ne!(&encrypted[NONCE_LEN..], plaintext.as_slice());
        let decrypted = engine.decrypt(&encrypted, b"aad").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn nonces_are_unique() {
        let engine = Aes256GcmEngine::new(&[0x42; 32]);
        let a = engine.encrypt(b"data", b"").unwrap();
        let b = engine.encrypt(b"data", b"").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn wrong_aad_fails() {
        let engine = Aes256GcmEngine::new(&[0x42; 32]);
        let encrypted = engine.encrypt(b"data", b"aad1").unwrap();
        assert!(engine.decrypt(&encrypted, b"aad2").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let engine = Aes256GcmEngine::new(&[0x42; 32]);
        let mut encrypted = engine.encrypt(b"data", b"").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(engine.decrypt(&encrypted, b"").is_err());
    }

    #[test]
    fn truncated_input_is_corruption() {
        let engine = Aes256GcmEngine::new(&[0x42; 32]);
        assert!(matches!(
            engine.decrypt(&[0u8; 4], b""),
            Err(CairnError::Corruption(_))
        ));
    }
}
