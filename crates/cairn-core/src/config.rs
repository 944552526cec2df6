use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::key::KdfParams;
use crate::error::{CairnError, Result};

/// Version string written into every new repository configuration.
pub const STORAGE_VERSION: &str = "0.6.0";

/// Repository configuration. Bit-stable: created once by `Repository::create`
/// and never mutated. Field names are serialized PascalCase because the
/// configuration is surfaced verbatim over the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "RepositoryID")]
    pub repository_id: Uuid,
    #[serde(rename = "Packfile")]
    pub packfile: PackfileConfig,
    #[serde(rename = "Chunking")]
    pub chunking: ChunkingConfig,
    #[serde(rename = "Hashing")]
    pub hashing: HashingConfig,
    #[serde(rename = "Compression", default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionConfig>,
    #[serde(rename = "Encryption", default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackfileConfig {
    #[serde(rename = "MaxSize")]
    pub max_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(rename = "Algorithm")]
    pub algorithm: String,
    #[serde(rename = "MinSize")]
    pub min_size: u32,
    #[serde(rename = "NormalSize")]
    pub normal_size: u32,
    #[serde(rename = "MaxSize")]
    pub max_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    #[serde(rename = "Algorithm")]
    pub algorithm: String,
    #[serde(rename = "Bits")]
    pub bits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(rename = "Algorithm")]
    pub algorithm: String,
    #[serde(rename = "Level")]
    pub level: i32,
    #[serde(rename = "WindowSize")]
    pub window_size: i32,
    #[serde(rename = "ChunkSize")]
    pub chunk_size: i32,
    #[serde(rename = "BlockSize")]
    pub block_size: i32,
    #[serde(rename = "EnableCRC")]
    pub enable_crc: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(rename = "Algorithm")]
    pub algorithm: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "KDFParams", default, skip_serializing_if = "Option::is_none")]
    pub kdf_params: Option<KdfParams>,
    /// Ciphertext of a fixed plaintext under the derived key; lets a client
    /// detect a wrong passphrase before touching any data.
    #[serde(rename = "Canary", default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<Vec<u8>>,
}

impl Default for PackfileConfig {
    fn default() -> Self {
        Self {
            max_size: 20 * 1024 * 1024,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            algorithm: "FASTCDC".into(),
            min_size: 64 * 1024,
            normal_size: 1024 * 1024,
            max_size: 4 * 1024 * 1024,
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            algorithm: "SHA256".into(),
            bits: 256,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: "LZ4".into(),
            level: 131072,
            window_size: -1,
            chunk_size: -1,
            block_size: -1,
            enable_crc: false,
        }
    }
}

impl RepositoryConfig {
    /// A fresh configuration with default chunking/packfile parameters,
    /// LZ4 compression and no encryption.
    pub fn new() -> Self {
        Self {
            version: STORAGE_VERSION.into(),
            timestamp: Utc::now(),
            repository_id: Uuid::new_v4(),
            packfile: PackfileConfig::default(),
            chunking: ChunkingConfig::default(),
            hashing: HashingConfig::default(),
            compression: Some(CompressionConfig::default()),
            encryption: None,
        }
    }

    /// Enable AES-256-GCM encryption. KDF params and canary are filled in
    /// by `Repository::create` once the passphrase is known.
    pub fn with_encryption(mut self) -> Self {
        self.encryption = Some(EncryptionConfig {
            algorithm: "AES256-GCM".into(),
            key: String::new(),
            kdf_params: None,
            canary: None,
        });
        self
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let config: RepositoryConfig = rmp_serde::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.min_size == 0 || c.min_size > c.normal_size || c.normal_size > c.max_size {
            return Err(CairnError::Config(format!(
                "invalid chunking parameters: min={} normal={} max={}",
                c.min_size, c.normal_size, c.max_size
            )));
        }
        if self.packfile.max_size < c.max_size as u64 {
            return Err(CairnError::Config(format!(
                "packfile max size ({}) smaller than chunk max size ({})",
                self.packfile.max_size, c.max_size
            )));
        }
        if self.hashing.algorithm != "SHA256" {
            return Err(CairnError::Config(format!(
                "unsupported hashing algorithm: {}",
                self.hashing.algorithm
            )));
        }
        if let Some(enc) = &self.encryption {
            if enc.algorithm != "AES256-GCM" {
                return Err(CairnError::Config(format!(
                    "unsupported encryption algorithm: {}",
                    enc.algorithm
                )));
            }
        }
        if let Some(comp) = &self.compression {
            if comp.algorithm != "LZ4" && comp.algorithm != "ZSTD" && comp.algorithm != "NONE" {
                return Err(CairnError::Config(format!(
                    "unsupported compression algorithm: {}",
                    comp.algorithm
                )));
            }
        }
        Ok(())
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend retry policy for transient I/O failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 200,
            retry_max_delay_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_roundtrip() {
        let config = RepositoryConfig::new();
        let bytes = config.serialize().unwrap();
        let parsed = RepositoryConfig::parse(&bytes).unwrap();
        assert_eq!(parsed.repository_id, config.repository_id);
        assert_eq!(parsed.chunking.normal_size, config.chunking.normal_size);
        assert_eq!(parsed.packfile.max_size, config.packfile.max_size);
    }

    #[test]
    fn validate_rejects_inverted_chunking() {
        let mut config = RepositoryConfig::new();
        config.chunking.min_size = config.chunking.max_size + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_tiny_packfile() {
        let mut config = RepositoryConfig::new();
        config.packfile.max_size = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_shape_is_pascal_case() {
        let mut config = RepositoryConfig::new();
        config.encryption = Some(EncryptionConfig {
            algorithm: "AES256-GCM".into(),
            key: String::new(),
            kdf_params: None,
            canary: None,
        });
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("Version").is_some());
        assert!(json.get("RepositoryID").is_some());
        assert_eq!(json["Packfile"]["MaxSize"], 20971520);
        assert_eq!(json["Chunking"]["Algorithm"], "FASTCDC");
        assert_eq!(json["Hashing"]["Bits"], 256);
        assert_eq!(json["Compression"]["Level"], 131072);
        assert_eq!(json["Encryption"]["Key"], "");
        // Optional KDF fields stay hidden until encryption is armed.
        assert!(json["Encryption"].get("KDFParams").is_none());
    }
}
