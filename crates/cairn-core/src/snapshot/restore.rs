use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{CairnError, Result};
use crate::importer::Exporter;
use crate::resource::ResourceKind;
use crate::snapshot::events::{emit, Event};
use crate::snapshot::SnapshotHandle;
use crate::vfs::{DirEntry, FileEntry, VfsEntry};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreStats {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    pub bytes: u64,
    pub errors: u64,
}

/// Walk a snapshot's VFS and materialize it through an exporter. Per-file
/// failures are reported and counted, never fatal; metadata is applied after
/// content, directories after their children.
pub fn restore(
    snapshot: &SnapshotHandle<'_>,
    exporter: &dyn Exporter,
    events: Option<&Sender<Event>>,
    cancel: &CancelToken,
) -> Result<RestoreStats> {
    let root = snapshot.root_dir()?;
    let mut stats = RestoreStats::default();
    restore_dir(snapshot, exporter, &root, events, cancel, &mut stats)?;
    debug!(
        files = stats.files,
        directories = stats.directories,
        bytes = stats.bytes,
        errors = stats.errors,
        "restore finished"
    );
    Ok(stats)
}

fn restore_dir(
    snapshot: &SnapshotHandle<'_>,
    exporter: &dyn Exporter,
    dir: &DirEntry,
    events: Option<&Sender<Event>>,
    cancel: &CancelToken,
    stats: &mut RestoreStats,
) -> Result<()> {
    cancel.check()?;
    exporter.create_directory(&dir.path)?;

    for child in &dir.children {
        cancel.check()?;
        match snapshot.get_entry(&child.checksum)? {
            VfsEntry::Dir(child_dir) => {
                restore_dir(snapshot, exporter, &child_dir, events, cancel, stats)?;
            }
            VfsEntry::File(file) => {
                match restore_file(snapshot, exporter, &file, cancel) {
                    Ok(written) => {
                        if file.symlink_target.is_some() {
                            stats.symlinks += 1;
                        } else {
                            stats.files += 1;
                        }
                        stats.bytes += written;
                        emit(
                            events,
                            Event::FileOk {
                                path: file.path.clone(),
                                size: written,
                            },
                        );
                    }
                    Err(CairnError::Cancelled) => return Err(CairnError::Cancelled),
                    Err(e) => {
                        stats.errors += 1;
                        warn!(path = %file.path, error = %e, "restore failed for entry");
                        emit(
                            events,
                            Event::FileError {
                                path: file.path.clone(),
                                error: e.to_string(),
                            },
                        );
                    }
                }
            }
            VfsEntry::Error(_) => {}
        }
    }

    exporter.set_metadata(&dir.path, dir.mode, dir.mtime)?;
    stats.directories += 1;
    emit(
        events,
        Event::DirectoryOk {
            path: dir.path.clone(),
        },
    );
    Ok(())
}

fn restore_file(
    snapshot: &SnapshotHandle<'_>,
    exporter: &dyn Exporter,
    file: &FileEntry,
    cancel: &CancelToken,
) -> Result<u64> {
    if let Some(target) = &file.symlink_target {
        exporter.create_symlink(&file.path, target)?;
        return Ok(0);
    }

    let object_checksum = file
        .object
        .ok_or_else(|| CairnError::Corruption(format!("file {} has no object", file.path)))?;
    let object = snapshot.get_object(&object_checksum)?;

    let mut data = Vec::with_capacity(object.size() as usize);
    for chunk in &object.chunks {
        cancel.check()?;
        data.extend_from_slice(
            &snapshot
                .repository()
                .get_blob(ResourceKind::Chunk, &chunk.checksum)?,
        );
    }
    let written = data.len() as u64;

    exporter.write_file(&file.path, &mut std::io::Cursor::new(data))?;
    exporter.set_metadata(&file.path, file.mode, file.mtime)?;
    Ok(written)
}
