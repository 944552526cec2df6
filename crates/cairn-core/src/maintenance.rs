use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{CairnError, Result};
use crate::packfile::PackfileReader;
use crate::repository::Repository;
use crate::resource::{Checksum, ResourceKind};
use crate::snapshot::SnapshotHandle;
use crate::state::State;
use crate::vfs::VfsEntry;

/// Packfiles present in the backend but referenced by no published state.
/// These are commit casualties (a crash between packfile writes and the
/// state publish) and are safe to remove.
pub fn orphan_packfiles(repo: &Repository) -> Result<Vec<Checksum>> {
    let mut referenced: BTreeSet<Checksum> = BTreeSet::new();
    for state_checksum in repo.get_states()? {
        let state = repo.load_state_parsed(&state_checksum)?;
        referenced.extend(state.packfiles());
    }

    let orphans: Vec<Checksum> = repo
        .list_packfiles()?
        .into_iter()
        .filter(|p| !referenced.contains(p))
        .collect();
    debug!(count = orphans.len(), "orphan packfile scan complete");
    Ok(orphans)
}

/// Delete orphan packfiles. Callers are expected to hold the advisory lock:
/// a commit in flight looks exactly like a crash until its state lands.
pub fn remove_orphan_packfiles(repo: &Repository) -> Result<usize> {
    let orphans = orphan_packfiles(repo)?;
    for checksum in &orphans {
        repo.backend().delete_blob(ResourceKind::Packfile, checksum)?;
        info!(packfile = %checksum, "removed orphan packfile");
    }
    Ok(orphans.len())
}

/// Merge every published state into a single catalog. The merged state is
/// published first; the superseded states are deleted only afterwards, so a
/// crash mid-merge never loses resolvability.
pub fn merge_states(repo: &Repository) -> Result<Option<Checksum>> {
    let states = repo.get_states()?;
    if states.len() < 2 {
        return Ok(None);
    }

    let mut merged = State::new();
    for checksum in &states {
        let state = repo.load_state_parsed(checksum)?;
        merged.merge(&state, Some(*checksum));
    }

    let merged_checksum = repo.publish_state(&merged)?;
    for checksum in &states {
        if *checksum != merged_checksum {
            repo.backend().delete_blob(ResourceKind::State, checksum)?;
        }
    }
    repo.refresh_aggregate()?;
    info!(
        merged = %merged_checksum,
        superseded = states.len(),
        "merged repository states"
    );
    Ok(Some(merged_checksum))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VerifyReport {
    pub packfiles: u64,
    pub blobs: u64,
    pub files: u64,
    pub errors: u64,
}

/// Structural verification of every packfile referenced by any state:
/// trailer/footer parse, index checksum, and every blob's plaintext hash.
pub fn verify_packfiles(repo: &Repository, cancel: &CancelToken) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();
    let mut referenced: BTreeSet<Checksum> = BTreeSet::new();
    for state_checksum in repo.get_states()? {
        referenced.extend(repo.load_state_parsed(&state_checksum)?.packfiles());
    }

    for packfile in referenced {
        cancel.check()?;
        let bytes = repo.get_packfile(&packfile)?;
        match PackfileReader::open(repo.codec(), &bytes) {
            Ok(reader) => {
                report.packfiles += 1;
                for entry in reader.entries() {
                    cancel.check()?;
                    match reader.get_blob(&entry.checksum) {
                        Ok(_) => report.blobs += 1,
                        Err(e) => {
                            report.errors += 1;
                            warn!(packfile = %packfile, blob = %entry.checksum, error = %e, "blob failed verification");
                        }
                    }
                }
            }
            Err(e) => {
                report.errors += 1;
                warn!(packfile = %packfile, error = %e, "packfile failed verification");
            }
        }
    }
    Ok(report)
}

/// Verify one snapshot end-to-end: every VFS entry, object and chunk
/// reachable from its root must resolve and pass checksum verification.
pub fn verify_snapshot(
    repo: &Repository,
    id: &Checksum,
    cancel: &CancelToken,
) -> Result<VerifyReport> {
    let snapshot = SnapshotHandle::load(repo, id)?;
    let mut report = VerifyReport::default();
    let root = snapshot.root_dir()?;
    verify_dir(&snapshot, &root, cancel, &mut report)?;
    Ok(report)
}

fn verify_dir(
    snapshot: &SnapshotHandle<'_>,
    dir: &crate::vfs::DirEntry,
    cancel: &CancelToken,
    report: &mut VerifyReport,
) -> Result<()> {
    cancel.check()?;
    for child in &dir.children {
        match snapshot.get_entry(&child.checksum) {
            Ok(VfsEntry::Dir(child_dir)) => verify_dir(snapshot, &child_dir, cancel, report)?,
            Ok(VfsEntry::File(file)) => {
                report.files += 1;
                if let Some(object_checksum) = file.object {
                    match snapshot.get_object(&object_checksum) {
                        Ok(object) => {
                            for chunk in &object.chunks {
                                cancel.check()?;
                                match snapshot
                                    .repository()
                                    .get_blob(ResourceKind::Chunk, &chunk.checksum)
                                {
                                    Ok(_) => report.blobs += 1,
                                    Err(e) => {
                                        report.errors += 1;
                                        warn!(path = %file.path, error = %e, "chunk failed verification");
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            report.errors += 1;
                            warn!(path = %file.path, error = %e, "object failed verification");
                        }
                    }
                }
            }
            Ok(VfsEntry::Error(_)) => {}
            Err(e) => {
                report.errors += 1;
                warn!(error = %e, "vfs entry failed verification");
            }
        }
    }
    Ok(())
}

/// Convenience wrapper returning whether anything failed.
pub fn check(repo: &Repository, cancel: &CancelToken) -> Result<VerifyReport> {
    let mut report = verify_packfiles(repo, cancel)?;
    for id in repo.list_snapshots() {
        let snapshot_report = verify_snapshot(repo, &id, cancel)?;
        report.files += snapshot_report.files;
        report.errors += snapshot_report.errors;
    }
    if report.errors > 0 {
        return Err(CairnError::Corruption(format!(
            "verification found {} errors",
            report.errors
        )));
    }
    Ok(report)
}
