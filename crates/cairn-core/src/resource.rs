use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CairnError, Result};

/// Resource kind tags carried in blob frames and the state catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResourceKind {
    Config = 0,
    Lock = 1,
    Snapshot = 2,
    State = 3,
    Packfile = 4,
    Object = 5,
    Chunk = 6,
    VfsDir = 7,
    VfsFile = 8,
    VfsError = 9,
    Index = 10,
    Metadata = 11,
    Data = 12,
}

impl ResourceKind {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Config),
            1 => Ok(Self::Lock),
            2 => Ok(Self::Snapshot),
            3 => Ok(Self::State),
            4 => Ok(Self::Packfile),
            5 => Ok(Self::Object),
            6 => Ok(Self::Chunk),
            7 => Ok(Self::VfsDir),
            8 => Ok(Self::VfsFile),
            9 => Ok(Self::VfsError),
            10 => Ok(Self::Index),
            11 => Ok(Self::Metadata),
            12 => Ok(Self::Data),
            _ => Err(CairnError::Corruption(format!(
                "unknown resource kind tag: {v}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Lock => "lock",
            Self::Snapshot => "snapshot",
            Self::State => "state",
            Self::Packfile => "packfile",
            Self::Object => "object",
            Self::Chunk => "chunk",
            Self::VfsDir => "vfs-dir",
            Self::VfsFile => "vfs-file",
            Self::VfsError => "vfs-error",
            Self::Index => "index",
            Self::Metadata => "metadata",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 32-byte content checksum (or random identifier) rendered as 64 hex chars.
/// Serializes as a hex string in human-readable formats (JSON) and as raw
/// bytes in binary ones (MessagePack).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum(pub [u8; 32]);

impl Serialize for Checksum {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        struct ChecksumVisitor;

        impl serde::de::Visitor<'_> for ChecksumVisitor {
            type Value = Checksum;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 32-byte checksum")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Checksum, E> {
                Checksum::from_hex(v).map_err(E::custom)
            }

            fn visit_bytes<E: serde::de::Error>(
                self,
                v: &[u8],
            ) -> std::result::Result<Checksum, E> {
                if v.len() != 32 {
                    return Err(E::invalid_length(v.len(), &self));
                }
                let mut out = [0u8; 32];
                out.copy_from_slice(v);
                Ok(Checksum(out))
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(ChecksumVisitor)
        } else {
            deserializer.deserialize_bytes(ChecksumVisitor)
        }
    }
}

impl Checksum {
    pub const ZERO: Checksum = Checksum([0u8; 32]);

    /// Generate a random identifier (snapshot ids).
    pub fn random() -> Self {
        let mut out = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut out);
        Checksum(out)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-char lowercase hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 64 {
            return Err(CairnError::InvalidParams(format!(
                "checksum must be 64 hex chars, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|_| CairnError::InvalidParams(format!("invalid hex checksum: {s}")))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Checksum(out))
    }

    /// First byte as a two-char hex string, used for shard directories.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}
