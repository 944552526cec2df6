use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::Checksum;

pub const VFS_VERSION: u32 = 1;

// Mode bits for the permission counters.
const MODE_SETUID: u32 = 0o4000;
const MODE_SETGID: u32 = 0o2000;
const MODE_STICKY: u32 = 0o1000;

/// Statistics over the immediate contents of one directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    pub devices: u64,
    pub pipes: u64,
    pub sockets: u64,
    pub children: u64,
    pub setuid: u64,
    pub setgid: u64,
    pub sticky: u64,
    pub objects: u64,
    pub chunks: u64,
    pub min_size: u64,
    pub max_size: u64,
    pub avg_size: u64,
    pub size: u64,
    pub min_mod_time: i64,
    pub max_mod_time: i64,
    pub min_entropy: f64,
    pub max_entropy: f64,
    pub sum_entropy: f64,
    pub avg_entropy: f64,
    pub hi_entropy: u64,
    pub lo_entropy: u64,
    #[serde(rename = "MIME_audio")]
    pub mime_audio: u64,
    #[serde(rename = "MIME_video")]
    pub mime_video: u64,
    #[serde(rename = "MIME_image")]
    pub mime_image: u64,
    #[serde(rename = "MIME_text")]
    pub mime_text: u64,
    #[serde(rename = "MIME_application")]
    pub mime_application: u64,
    #[serde(rename = "MIME_other")]
    pub mime_other: u64,
    pub errors: u64,
}

/// Statistics over a directory's transitive subtree. Same shape as
/// [`LevelStats`] minus the per-level averages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtreeStats {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    pub devices: u64,
    pub pipes: u64,
    pub sockets: u64,
    pub children: u64,
    pub setuid: u64,
    pub setgid: u64,
    pub sticky: u64,
    pub objects: u64,
    pub chunks: u64,
    pub min_size: u64,
    pub max_size: u64,
    pub size: u64,
    pub min_mod_time: i64,
    pub max_mod_time: i64,
    pub min_entropy: f64,
    pub max_entropy: f64,
    pub hi_entropy: u64,
    pub lo_entropy: u64,
    #[serde(rename = "MIME_audio")]
    pub mime_audio: u64,
    #[serde(rename = "MIME_video")]
    pub mime_video: u64,
    #[serde(rename = "MIME_image")]
    pub mime_image: u64,
    #[serde(rename = "MIME_text")]
    pub mime_text: u64,
    #[serde(rename = "MIME_application")]
    pub mime_application: u64,
    #[serde(rename = "MIME_other")]
    pub mime_other: u64,
    pub errors: u64,
}

/// Entropy above which a file counts as `hi_entropy` (likely already
/// compressed or encrypted).
const HI_ENTROPY_THRESHOLD: f64 = 7.0;

impl LevelStats {
    fn record_mode_bits(&mut self, mode: u32) {
        if mode & MODE_SETUID != 0 {
            self.setuid += 1;
        }
        if mode & MODE_SETGID != 0 {
            self.setgid += 1;
        }
        if mode & MODE_STICKY != 0 {
            self.sticky += 1;
        }
    }

    pub fn record_file(&mut self, file: &FileEntry, chunk_count: u64) {
        self.children += 1;
        self.record_mode_bits(file.mode);

        if file.symlink_target.is_some() {
            self.symlinks += 1;
            return;
        }

        if self.files == 0 || file.size < self.min_size {
            self.min_size = file.size;
        }
        if file.size > self.max_size {
            self.max_size = file.size;
        }
        if self.files == 0 || file.mtime < self.min_mod_time {
            self.min_mod_time = file.mtime;
        }
        if file.mtime > self.max_mod_time {
            self.max_mod_time = file.mtime;
        }
        if self.files == 0 || file.entropy < self.min_entropy {
            self.min_entropy = file.entropy;
        }
        if file.entropy > self.max_entropy {
            self.max_entropy = file.entropy;
        }
        if file.entropy >= HI_ENTROPY_THRESHOLD {
            self.hi_entropy += 1;
        } else {
            self.lo_entropy += 1;
        }
        self.sum_entropy += file.entropy;

        self.files += 1;
        self.size += file.size;
        self.objects += 1;
        self.chunks += chunk_count;
        self.count_mime(&file.content_type);
    }

    pub fn record_directory(&mut self, mode: u32) {
        self.children += 1;
        self.directories += 1;
        self.record_mode_bits(mode);
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    fn count_mime(&mut self, content_type: &str) {
        if content_type.starts_with("audio/") {
            self.mime_audio += 1;
        } else if content_type.starts_with("video/") {
            self.mime_video += 1;
        } else if content_type.starts_with("image/") {
            self.mime_image += 1;
        } else if content_type.starts_with("text/") {
            self.mime_text += 1;
        } else if content_type.starts_with("application/") {
            self.mime_application += 1;
        } else {
            self.mime_other += 1;
        }
    }

    /// Compute the per-level averages once every child has been recorded.
    pub fn finalize(&mut self) {
        if self.files > 0 {
            self.avg_size = self.size / self.files;
            self.avg_entropy = self.sum_entropy / self.files as f64;
        }
    }
}

impl SubtreeStats {
    fn merge_extrema(
        &mut self,
        had_files: bool,
        min_size: u64,
        max_size: u64,
        min_mod_time: i64,
        max_mod_time: i64,
        min_entropy: f64,
        max_entropy: f64,
        incoming_files: u64,
    ) {
        if incoming_files == 0 {
            return;
        }
        if !had_files || min_size < self.min_size {
            self.min_size = min_size;
        }
        if max_size > self.max_size {
            self.max_size = max_size;
        }
        if !had_files || min_mod_time < self.min_mod_time {
            self.min_mod_time = min_mod_time;
        }
        if max_mod_time > self.max_mod_time {
            self.max_mod_time = max_mod_time;
        }
        if !had_files || min_entropy < self.min_entropy {
            self.min_entropy = min_entropy;
        }
        if max_entropy > self.max_entropy {
            self.max_entropy = max_entropy;
        }
    }

    /// Fold one directory's own level into this subtree view.
    pub fn absorb_level(&mut self, level: &LevelStats) {
        let had_files = self.files > 0;
        self.merge_extrema(
            had_files,
            level.min_size,
            level.max_size,
            level.min_mod_time,
            level.max_mod_time,
            level.min_entropy,
            level.max_entropy,
            level.files,
        );
        self.directories += level.directories;
        self.files += level.files;
        self.symlinks += level.symlinks;
        self.devices += level.devices;
        self.pipes += level.pipes;
        self.sockets += level.sockets;
        self.children += level.children;
        self.setuid += level.setuid;
        self.setgid += level.setgid;
        self.sticky += level.sticky;
        self.objects += level.objects;
        self.chunks += level.chunks;
        self.size += level.size;
        self.hi_entropy += level.hi_entropy;
        self.lo_entropy += level.lo_entropy;
        self.mime_audio += level.mime_audio;
        self.mime_video += level.mime_video;
        self.mime_image += level.mime_image;
        self.mime_text += level.mime_text;
        self.mime_application += level.mime_application;
        self.mime_other += level.mime_other;
        self.errors += level.errors;
    }

    /// Fold a child directory's subtree view into this one.
    pub fn absorb(&mut self, below: &SubtreeStats) {
        let had_files = self.files > 0;
        self.merge_extrema(
            had_files,
            below.min_size,
            below.max_size,
            below.min_mod_time,
            below.max_mod_time,
            below.min_entropy,
            below.max_entropy,
            below.files,
        );
        self.directories += below.directories;
        self.files += below.files;
        self.symlinks += below.symlinks;
        self.devices += below.devices;
        self.pipes += below.pipes;
        self.sockets += below.sockets;
        self.children += below.children;
        self.setuid += below.setuid;
        self.setgid += below.setgid;
        self.sticky += below.sticky;
        self.objects += below.objects;
        self.chunks += below.chunks;
        self.size += below.size;
        self.hi_entropy += below.hi_entropy;
        self.lo_entropy += below.lo_entropy;
        self.mime_audio += below.mime_audio;
        self.mime_video += below.mime_video;
        self.mime_image += below.mime_image;
        self.mime_text += below.mime_text;
        self.mime_application += below.mime_application;
        self.mime_other += below.mime_other;
        self.errors += below.errors;
    }
}

/// Both statistics views carried by a directory entry (and the snapshot
/// header, for the root).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub directory: LevelStats,
    pub below: SubtreeStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildRef {
    pub name: String,
    pub checksum: Checksum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub version: u32,
    pub name: String,
    pub path: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Modification time, nanoseconds since the Unix epoch.
    pub mtime: i64,
    /// Children sorted by name.
    pub children: Vec<ChildRef>,
    pub summary: EntrySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub version: u32,
    pub name: String,
    pub path: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    pub size: u64,
    #[serde(default)]
    pub symlink_target: Option<String>,
    /// Content descriptor; absent for symlinks.
    #[serde(default)]
    pub object: Option<Checksum>,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub entropy: f64,
    #[serde(default)]
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub path: String,
    pub error: String,
}

/// A snapshot filesystem entry, dispatched at runtime.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum VfsEntry {
    Dir(DirEntry),
    File(FileEntry),
    Error(ErrorEntry),
}

impl VfsEntry {
    pub fn name(&self) -> &str {
        match self {
            VfsEntry::Dir(d) => &d.name,
            VfsEntry::File(f) => &f.name,
            VfsEntry::Error(e) => &e.path,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            VfsEntry::Dir(d) => &d.path,
            VfsEntry::File(f) => &f.path,
            VfsEntry::Error(e) => &e.path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, VfsEntry::Dir(_))
    }
}
