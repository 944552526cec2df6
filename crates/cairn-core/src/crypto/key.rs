use argon2::Argon2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CairnError, Result};

/// KDF parameters persisted in the repository configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
}

// Bounds rejecting maliciously crafted parameter blobs.
const MAX_TIME_COST: u32 = 10;
const MAX_PARALLELISM: u32 = 16;
const MAX_MEMORY_KIB: u32 = 524_288; // 512 MiB
const MIN_SALT_LEN: usize = 16;
const MAX_SALT_LEN: usize = 64;

impl KdfParams {
    /// Fresh argon2id parameters with a random per-repository salt.
    pub fn generate() -> Self {
        let mut salt = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            algorithm: "argon2id".into(),
            time_cost: 3,
            memory_cost: 65_536, // 64 MiB
            parallelism: 4,
            salt,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.algorithm != "argon2id" {
            return Err(CairnError::WrongKey);
        }
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(CairnError::WrongKey);
        }
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(CairnError::WrongKey);
        }
        if self.memory_cost == 0 || self.memory_cost > MAX_MEMORY_KIB {
            return Err(CairnError::WrongKey);
        }
        if self.salt.len() < MIN_SALT_LEN || self.salt.len() > MAX_SALT_LEN {
            return Err(CairnError::WrongKey);
        }
        Ok(())
    }
}

/// Derive the 32-byte repository secret from a passphrase.
/// The same secret keys both the AES-256-GCM cipher and the HMAC hasher.
pub fn derive_key(passphrase: &str, kdf: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    kdf.validate()?;

    let params = argon2::Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(32))
        .map_err(|e| CairnError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), &kdf.salt, output.as_mut())
        .map_err(|e| CairnError::KeyDerivation(format!("argon2 hash: {e}")))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_kdf() -> KdfParams {
        KdfParams {
            algorithm: "argon2id".into(),
            time_cost: 1,
            memory_cost: 8192,
            parallelism: 1,
            salt: vec![0x55; 32],
        }
    }

    #[test]
    fn derive_is_deterministic() {
        let kdf = test_kdf();
        let a = derive_key("passphrase", &kdf).unwrap();
        let b = derive_key("passphrase", &kdf).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn different_passphrase_different_key() {
        let kdf = test_kdf();
        let a = derive_key("one", &kdf).unwrap();
        let b = derive_key("two", &kdf).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn different_salt_different_key() {
        let mut kdf_a = test_kdf();
        let mut kdf_b = test_kdf();
        kdf_a.salt = vec![0x01; 32];
        kdf_b.salt = vec![0x02; 32];
        let a = derive_key("pass", &kdf_a).unwrap();
        let b = derive_key("pass", &kdf_b).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn rejects_wrong_algorithm() {
        let mut kdf = test_kdf();
        kdf.algorithm = "scrypt".into();
        assert!(matches!(
            derive_key("pass", &kdf),
            Err(CairnError::WrongKey)
        ));
    }

    #[test]
    fn rejects_excessive_memory() {
        let mut kdf = test_kdf();
        kdf.memory_cost = u32::MAX;
        assert!(derive_key("pass", &kdf).is_err());
    }

    #[test]
    fn rejects_short_salt() {
        let mut kdf = test_kdf();
        kdf.salt = vec![0u8; 8];
        assert!(derive_key("pass", &kdf).is_err());
    }

    #[test]
    fn generated_params_pass_validation() {
        let kdf = KdfParams::generate();
        assert!(kdf.validate().is_ok());
        assert_eq!(kdf.salt.len(), 32);
    }
}
