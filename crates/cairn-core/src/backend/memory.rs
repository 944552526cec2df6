use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{CairnError, Result};
use crate::resource::{Checksum, ResourceKind};

use super::{namespace, BackendMode, StorageBackend};

/// In-memory blob container. Thread-safe via a single mutex; used by tests
/// and as the seam for fault-injecting wrappers.
pub struct MemoryBackend {
    config: Mutex<Option<Vec<u8>>>,
    blobs: Mutex<HashMap<(u8, Checksum), Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(None),
            blobs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn create(&self, serialized_config: &[u8]) -> Result<()> {
        let mut config = self.config.lock().unwrap();
        if config.is_some() {
            return Err(CairnError::RepoAlreadyExists("memory".into()));
        }
        *config = Some(serialized_config.to_vec());
        Ok(())
    }

    fn open(&self) -> Result<Vec<u8>> {
        self.config
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CairnError::RepoNotFound("memory".into()))
    }

    fn mode(&self) -> BackendMode {
        BackendMode::ReadWrite
    }

    fn put_blob(&self, kind: ResourceKind, name: &Checksum, data: &[u8]) -> Result<()> {
        namespace(kind)?;
        self.blobs
            .lock()
            .unwrap()
            .insert((kind as u8, *name), data.to_vec());
        Ok(())
    }

    fn get_blob(&self, kind: ResourceKind, name: &Checksum) -> Result<Option<Vec<u8>>> {
        namespace(kind)?;
        Ok(self.blobs.lock().unwrap().get(&(kind as u8, *name)).cloned())
    }

    fn delete_blob(&self, kind: ResourceKind, name: &Checksum) -> Result<()> {
        namespace(kind)?;
        self.blobs.lock().unwrap().remove(&(kind as u8, *name));
        Ok(())
    }

    fn list_blobs(&self, kind: ResourceKind) -> Result<Vec<Checksum>> {
        namespace(kind)?;
        let tag = kind as u8;
        let mut names: Vec<Checksum> = self
            .blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _)| *k == tag)
            .map(|(_, name)| *name)
            .collect();
        names.sort();
        Ok(names)
    }
}
