pub mod fs;
pub mod memory;

use std::sync::Arc;

use crate::error::{CairnError, Result};
use crate::resource::{Checksum, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Read,
    ReadWrite,
}

/// Map a resource kind to its backend namespace. Only packfiles, states and
/// locks exist as top-level backend objects; chunks, objects and VFS entries
/// live inside packfiles.
pub fn namespace(kind: ResourceKind) -> Result<&'static str> {
    match kind {
        ResourceKind::Packfile => Ok("packfiles"),
        ResourceKind::State => Ok("states"),
        ResourceKind::Lock => Ok("locks"),
        other => Err(CairnError::InvalidParams(format!(
            "{other} blobs are not stored standalone"
        ))),
    }
}

/// Append-only, addressable blob container. Names are 32-byte checksums
/// rendered as hex. Implementations guarantee: puts are atomic (readers see
/// the full blob or nothing), reads are consistent once a put returns,
/// deletes never resurrect. No ordering across different names.
pub trait StorageBackend: Send + Sync {
    /// Initialize the container and persist the serialized configuration.
    fn create(&self, serialized_config: &[u8]) -> Result<()>;

    /// Open the container and return the serialized configuration.
    fn open(&self) -> Result<Vec<u8>>;

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn mode(&self) -> BackendMode {
        BackendMode::ReadWrite
    }

    fn put_blob(&self, kind: ResourceKind, name: &Checksum, data: &[u8]) -> Result<()>;

    /// Read a whole blob. Returns `None` when absent.
    fn get_blob(&self, kind: ResourceKind, name: &Checksum) -> Result<Option<Vec<u8>>>;

    /// Read a byte range of a blob. When the blob exists, exactly `length`
    /// bytes come back; a short read is `corruption`, never a truncation.
    fn get_blob_range(
        &self,
        kind: ResourceKind,
        name: &Checksum,
        offset: u64,
        length: u64,
    ) -> Result<Option<Vec<u8>>> {
        match self.get_blob(kind, name)? {
            None => Ok(None),
            Some(data) => {
                let start = offset as usize;
                let end = start.checked_add(length as usize).unwrap_or(usize::MAX);
                if end > data.len() {
                    return Err(CairnError::Corruption(format!(
                        "short read on {kind} blob {name}: wanted {offset}+{length}, have {}",
                        data.len()
                    )));
                }
                Ok(Some(data[start..end].to_vec()))
            }
        }
    }

    fn delete_blob(&self, kind: ResourceKind, name: &Checksum) -> Result<()>;

    fn list_blobs(&self, kind: ResourceKind) -> Result<Vec<Checksum>>;
}

impl StorageBackend for Arc<dyn StorageBackend> {
    fn create(&self, serialized_config: &[u8]) -> Result<()> {
        (**self).create(serialized_config)
    }
    fn open(&self) -> Result<Vec<u8>> {
        (**self).open()
    }
    fn close(&self) -> Result<()> {
        (**self).close()
    }
    fn mode(&self) -> BackendMode {
        (**self).mode()
    }
    fn put_blob(&self, kind: ResourceKind, name: &Checksum, data: &[u8]) -> Result<()> {
        (**self).put_blob(kind, name, data)
    }
    fn get_blob(&self, kind: ResourceKind, name: &Checksum) -> Result<Option<Vec<u8>>> {
        (**self).get_blob(kind, name)
    }
    fn get_blob_range(
        &self,
        kind: ResourceKind,
        name: &Checksum,
        offset: u64,
        length: u64,
    ) -> Result<Option<Vec<u8>>> {
        (**self).get_blob_range(kind, name, offset, length)
    }
    fn delete_blob(&self, kind: ResourceKind, name: &Checksum) -> Result<()> {
        (**self).delete_blob(kind, name)
    }
    fn list_blobs(&self, kind: ResourceKind) -> Result<Vec<Checksum>> {
        (**self).list_blobs(kind)
    }
}
