use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use rand::RngCore;

use crate::error::{CairnError, Result};
use crate::resource::{Checksum, ResourceKind};

use super::{namespace, BackendMode, StorageBackend};

const CONFIG_NAME: &str = "CONFIG";

/// Filesystem-backed blob container. Layout under the repository root:
/// `CONFIG`, `packfiles/<first-2-hex>/<hex>`, `states/<first-2-hex>/<hex>`,
/// `locks/<hex>`.
pub struct FsBackend {
    root: PathBuf,
    mode: BackendMode,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mode: BackendMode::ReadWrite,
        }
    }

    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mode: BackendMode::Read,
        }
    }

    fn blob_path(&self, kind: ResourceKind, name: &Checksum) -> Result<PathBuf> {
        let ns = namespace(kind)?;
        // Lock names are flat; packfiles and states shard on the first byte.
        let path = if kind == ResourceKind::Lock {
            self.root.join(ns).join(name.to_hex())
        } else {
            self.root.join(ns).join(name.shard_prefix()).join(name.to_hex())
        };
        Ok(path)
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode == BackendMode::Read {
            return Err(CairnError::InvalidParams(
                "backend opened read-only".into(),
            ));
        }
        Ok(())
    }

    /// Write-to-temp-then-rename so readers never observe a partial blob.
    fn atomic_write(&self, path: &PathBuf, data: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| CairnError::Other("blob path has no parent".into()))?;
        fs::create_dir_all(parent)?;

        let tmp_name = format!(".tmp-{:016x}", rand::thread_rng().next_u64());
        let tmp_path = parent.join(tmp_name);
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

impl StorageBackend for FsBackend {
    fn create(&self, serialized_config: &[u8]) -> Result<()> {
        self.check_writable()?;
        let config_path = self.root.join(CONFIG_NAME);
        if config_path.exists() {
            return Err(CairnError::RepoAlreadyExists(
                self.root.display().to_string(),
            ));
        }
        fs::create_dir_all(&self.root)?;
        for ns in ["packfiles", "states", "locks"] {
            fs::create_dir_all(self.root.join(ns))?;
        }
        self.atomic_write(&config_path, serialized_config)
    }

    fn open(&self) -> Result<Vec<u8>> {
        match fs::read(self.root.join(CONFIG_NAME)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CairnError::RepoNotFound(self.root.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn mode(&self) -> BackendMode {
        self.mode
    }

    fn put_blob(&self, kind: ResourceKind, name: &Checksum, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        let path = self.blob_path(kind, name)?;
        self.atomic_write(&path, data)
    }

    fn get_blob(&self, kind: ResourceKind, name: &Checksum) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(kind, name)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_blob_range(
        &self,
        kind: ResourceKind,
        name: &Checksum,
        offset: u64,
        length: u64,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(kind, name)?;
        let mut file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(CairnError::Corruption(format!(
                        "short read on {kind} blob {name}: wanted {length} bytes at {offset}, got {filled}"
                    )))
                }
                Ok(n) => filled += n,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(buf))
    }

    fn delete_blob(&self, kind: ResourceKind, name: &Checksum) -> Result<()> {
        self.check_writable()?;
        let path = self.blob_path(kind, name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_blobs(&self, kind: ResourceKind) -> Result<Vec<Checksum>> {
        let ns_dir = self.root.join(namespace(kind)?);
        let mut names = Vec::new();
        let entries = match fs::read_dir(&ns_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                for inner in fs::read_dir(entry.path())? {
                    let inner = inner?;
                    if inner.file_type()?.is_file() {
                        if let Ok(name) = Checksum::from_hex(&inner.file_name().to_string_lossy())
                        {
                            names.push(name);
                        }
                    }
                }
            } else if file_type.is_file() {
                if let Ok(name) = Checksum::from_hex(&entry.file_name().to_string_lossy()) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
