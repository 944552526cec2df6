use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CairnError, Result};

/// Descriptor of the source a snapshot was taken from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImporterInfo {
    #[serde(rename = "type")]
    pub type_name: String,
    pub origin: String,
    pub directory: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Directory,
    Symlink,
}

/// Metadata for one entry produced by an importer. Paths are `/`-separated
/// and rooted at `/` regardless of the underlying source.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub path: String,
    pub name: String,
    pub kind: SourceKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Modification time, nanoseconds since the Unix epoch.
    pub mtime: i64,
    pub size: u64,
    pub symlink_target: Option<String>,
}

/// Depth-first walk events. Directories open before their children and close
/// after them; children arrive sorted by name.
#[derive(Debug)]
pub enum WalkEvent {
    EnterDir(SourceEntry),
    LeaveDir { path: String },
    File(SourceEntry),
    /// An unreadable entry; recorded, never fatal.
    Error { path: String, error: String },
}

/// Producer of `(path, metadata, bytes)` for the snapshot assembler.
pub trait Importer: Send {
    fn info(&self) -> ImporterInfo;

    /// Walk the source depth-first. The iterator owns any traversal state.
    fn walk(&self) -> Result<Box<dyn Iterator<Item = WalkEvent> + Send>>;

    /// Open one regular file for streaming.
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;
}

/// Consumer of `(path, metadata, bytes)` for restore.
pub trait Exporter: Send {
    fn create_directory(&self, path: &str) -> Result<()>;
    fn write_file(&self, path: &str, data: &mut dyn Read) -> Result<()>;
    fn create_symlink(&self, path: &str, target: &str) -> Result<()>;
    fn set_metadata(&self, path: &str, mode: u32, mtime: i64) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Filesystem implementations
// ---------------------------------------------------------------------------

pub struct FsImporter {
    root: PathBuf,
}

impl FsImporter {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(CairnError::InvalidParams(format!(
                "import root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn entry_metadata(path: &Path, virtual_path: &str) -> Result<SourceEntry> {
        let metadata = fs::symlink_metadata(path)?;
        let name = Path::new(virtual_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());

        #[cfg(unix)]
        let (mode, uid, gid, mtime) = {
            use std::os::unix::fs::MetadataExt;
            (
                metadata.mode(),
                metadata.uid(),
                metadata.gid(),
                metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec(),
            )
        };
        #[cfg(not(unix))]
        let (mode, uid, gid, mtime) = (0o644u32, 0u32, 0u32, 0i64);

        let (kind, symlink_target) = if metadata.file_type().is_symlink() {
            let target = fs::read_link(path)?;
            (
                SourceKind::Symlink,
                Some(target.to_string_lossy().into_owned()),
            )
        } else if metadata.is_dir() {
            (SourceKind::Directory, None)
        } else {
            (SourceKind::File, None)
        };

        Ok(SourceEntry {
            path: virtual_path.to_string(),
            name,
            kind,
            mode,
            uid,
            gid,
            mtime,
            size: if kind == SourceKind::File {
                metadata.len()
            } else {
                0
            },
            symlink_target,
        })
    }

    fn walk_dir(&self, dir: &Path, virtual_path: &str, events: &mut Vec<WalkEvent>) {
        let entry = match Self::entry_metadata(dir, virtual_path) {
            Ok(entry) => entry,
            Err(e) => {
                events.push(WalkEvent::Error {
                    path: virtual_path.to_string(),
                    error: e.to_string(),
                });
                return;
            }
        };
        events.push(WalkEvent::EnterDir(entry));

        let mut children: Vec<(String, PathBuf)> = Vec::new();
        match fs::read_dir(dir) {
            Ok(read_dir) => {
                for child in read_dir {
                    match child {
                        Ok(child) => {
                            children
                                .push((child.file_name().to_string_lossy().into_owned(), child.path()));
                        }
                        Err(e) => events.push(WalkEvent::Error {
                            path: virtual_path.to_string(),
                            error: e.to_string(),
                        }),
                    }
                }
            }
            Err(e) => events.push(WalkEvent::Error {
                path: virtual_path.to_string(),
                error: e.to_string(),
            }),
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, child_path) in children {
            let child_virtual = if virtual_path == "/" {
                format!("/{name}")
            } else {
                format!("{virtual_path}/{name}")
            };
            let file_type = match fs::symlink_metadata(&child_path) {
                Ok(metadata) => metadata.file_type(),
                Err(e) => {
                    events.push(WalkEvent::Error {
                        path: child_virtual,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            if file_type.is_dir() {
                self.walk_dir(&child_path, &child_virtual, events);
            } else {
                match Self::entry_metadata(&child_path, &child_virtual) {
                    Ok(entry) => events.push(WalkEvent::File(entry)),
                    Err(e) => events.push(WalkEvent::Error {
                        path: child_virtual,
                        error: e.to_string(),
                    }),
                }
            }
        }

        events.push(WalkEvent::LeaveDir {
            path: virtual_path.to_string(),
        });
    }
}

impl Importer for FsImporter {
    fn info(&self) -> ImporterInfo {
        ImporterInfo {
            type_name: "fs".into(),
            origin: crate::hostname(),
            directory: self.root.display().to_string(),
        }
    }

    fn walk(&self) -> Result<Box<dyn Iterator<Item = WalkEvent> + Send>> {
        let mut events = Vec::new();
        self.walk_dir(&self.root.clone(), "/", &mut events);
        Ok(Box::new(events.into_iter()))
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(self.resolve(path))?;
        Ok(Box::new(file))
    }
}

pub struct FsExporter {
    root: PathBuf,
}

impl FsExporter {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = path.trim_start_matches('/');
        for component in Path::new(relative).components() {
            if component == std::path::Component::ParentDir {
                return Err(CairnError::InvalidParams(format!(
                    "unsafe restore path: {path}"
                )));
            }
        }
        Ok(self.root.join(relative))
    }
}

impl Exporter for FsExporter {
    fn create_directory(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path)?)?;
        Ok(())
    }

    fn write_file(&self, path: &str, data: &mut dyn Read) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&target)?;
        std::io::copy(data, &mut file)?;
        Ok(())
    }

    fn create_symlink(&self, path: &str, target: &str) -> Result<()> {
        let link = self.resolve(path)?;
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, &link)?;
        #[cfg(not(unix))]
        return Err(CairnError::Other("symlinks unsupported on this platform".into()));
        #[cfg(unix)]
        Ok(())
    }

    fn set_metadata(&self, path: &str, mode: u32, mtime: i64) -> Result<()> {
        let target = self.resolve(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        let secs = mtime.div_euclid(1_000_000_000);
        let nanos = mtime.rem_euclid(1_000_000_000) as u32;
        let filetime = filetime::FileTime::from_unix_time(secs, nanos);
        filetime::set_file_mtime(&target, filetime)?;
        Ok(())
    }
}
