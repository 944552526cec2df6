pub mod builder;
pub mod events;
pub mod restore;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CairnError, Result};
use crate::importer::ImporterInfo;
use crate::object::Object;
use crate::repository::Repository;
use crate::resource::{Checksum, ResourceKind};
use crate::vfs::{DirEntry, EntrySummary, ErrorEntry, FileEntry, VfsEntry};

pub use builder::SnapshotBuilder;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotIdentity {
    pub identifier: Uuid,
    pub public_key: Option<String>,
}

impl Default for SnapshotIdentity {
    fn default() -> Self {
        Self {
            identifier: Uuid::nil(),
            public_key: None,
        }
    }
}

/// Immutable record published for every committed snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub identifier: Checksum,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the snapshot, in nanoseconds.
    pub duration: u64,
    pub identity: SnapshotIdentity,
    pub name: String,
    pub category: String,
    pub environment: String,
    pub perimeter: String,
    pub classifications: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub context: Option<BTreeMap<String, String>>,
    pub importer: ImporterInfo,
    /// Root VFS directory entry.
    pub root: Checksum,
    /// Errors index blob.
    pub errors: Checksum,
    /// Content index blob (path → object).
    pub index: Checksum,
    /// Metadata index blob (content-type statistics).
    pub metadata: Checksum,
    /// Statistics blob.
    pub statistics: Checksum,
    pub summary: EntrySummary,
}

impl SnapshotHeader {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// Content index: every regular file path mapped to its object checksum.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentIndex {
    pub paths: BTreeMap<String, Checksum>,
}

/// Metadata index: file counts per sniffed content type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataIndex {
    pub content_types: BTreeMap<String, u64>,
}

/// A loaded snapshot: the header plus blob access through the repository.
pub struct SnapshotHandle<'a> {
    repo: &'a Repository,
    pub header: SnapshotHeader,
}

impl<'a> SnapshotHandle<'a> {
    pub fn load(repo: &'a Repository, id: &Checksum) -> Result<Self> {
        let bytes = repo.get_blob(ResourceKind::Snapshot, id)?;
        let header = SnapshotHeader::parse(&bytes)?;
        Ok(Self { repo, header })
    }

    /// Resolve a snapshot query: `latest`, a full hex id, or a unique prefix.
    pub fn resolve(repo: &'a Repository, query: &str) -> Result<Self> {
        let ids = repo.list_snapshots();
        if query.eq_ignore_ascii_case("latest") {
            let mut newest: Option<(DateTime<Utc>, SnapshotHandle<'a>)> = None;
            for id in &ids {
                let handle = SnapshotHandle::load(repo, id)?;
                if newest
                    .as_ref()
                    .map(|(t, _)| handle.header.timestamp > *t)
                    .unwrap_or(true)
                {
                    newest = Some((handle.header.timestamp, handle));
                }
            }
            return newest
                .map(|(_, handle)| handle)
                .ok_or_else(|| CairnError::NotFound("snapshot latest".into()));
        }

        let matches: Vec<&Checksum> = ids
            .iter()
            .filter(|id| id.to_hex().starts_with(&query.to_ascii_lowercase()))
            .collect();
        match matches.len() {
            0 => Err(CairnError::NotFound(format!("snapshot {query}"))),
            1 => SnapshotHandle::load(repo, matches[0]),
            _ => Err(CairnError::InvalidParams(format!(
                "ambiguous snapshot prefix: {query}"
            ))),
        }
    }

    pub fn repository(&self) -> &Repository {
        self.repo
    }

    pub fn get_dir(&self, checksum: &Checksum) -> Result<DirEntry> {
        let bytes = self.repo.get_blob(ResourceKind::VfsDir, checksum)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    pub fn get_file(&self, checksum: &Checksum) -> Result<FileEntry> {
        let bytes = self.repo.get_blob(ResourceKind::VfsFile, checksum)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    /// Fetch a child entry, dispatching on the kind recorded in the state.
    pub fn get_entry(&self, checksum: &Checksum) -> Result<VfsEntry> {
        if self.repo.lookup(ResourceKind::VfsDir, checksum).is_some() {
            return Ok(VfsEntry::Dir(self.get_dir(checksum)?));
        }
        if self.repo.lookup(ResourceKind::VfsFile, checksum).is_some() {
            return Ok(VfsEntry::File(self.get_file(checksum)?));
        }
        Err(CairnError::NotFound(format!("vfs entry {checksum}")))
    }

    pub fn root_dir(&self) -> Result<DirEntry> {
        self.get_dir(&self.header.root)
    }

    /// Resolve a `/`-separated path to its VFS entry.
    pub fn stat(&self, path: &str) -> Result<VfsEntry> {
        let mut current = self.root_dir()?;
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

        for (i, component) in components.iter().enumerate() {
            let child = current
                .children
                .iter()
                .find(|c| c.name == *component)
                .ok_or_else(|| CairnError::NotFound(format!("path {path}")))?;
            let entry = self.get_entry(&child.checksum)?;
            if i + 1 == components.len() {
                return Ok(entry);
            }
            match entry {
                VfsEntry::Dir(dir) => current = dir,
                _ => return Err(CairnError::NotFound(format!("path {path}"))),
            }
        }
        Ok(VfsEntry::Dir(current))
    }

    /// The object descriptor for a file entry.
    pub fn get_object(&self, checksum: &Checksum) -> Result<Object> {
        let bytes = self.repo.get_blob(ResourceKind::Object, checksum)?;
        Object::parse(&bytes)
    }

    /// Reassemble a regular file's bytes from its chunks.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.stat(path)?;
        let file = match entry {
            VfsEntry::File(file) => file,
            _ => {
                return Err(CairnError::InvalidParams(format!(
                    "not a regular file: {path}"
                )))
            }
        };
        let object_checksum = file.object.ok_or_else(|| {
            CairnError::InvalidParams(format!("not a regular file: {path}"))
        })?;
        let object = self.get_object(&object_checksum)?;

        let mut data = Vec::with_capacity(object.size() as usize);
        for chunk in &object.chunks {
            data.extend_from_slice(&self.repo.get_blob(ResourceKind::Chunk, &chunk.checksum)?);
        }
        Ok(data)
    }

    /// Errors recorded while the snapshot was taken.
    pub fn errors(&self) -> Result<Vec<ErrorEntry>> {
        let bytes = self.repo.get_blob(ResourceKind::VfsError, &self.header.errors)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    pub fn content_index(&self) -> Result<ContentIndex> {
        let bytes = self.repo.get_blob(ResourceKind::Index, &self.header.index)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    pub fn metadata_index(&self) -> Result<MetadataIndex> {
        let bytes = self.repo.get_blob(ResourceKind::Metadata, &self.header.metadata)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    /// Substring search over entry paths beneath `path`, in path order.
    pub fn search(&self, path: &str, query: &str) -> Result<Vec<VfsEntry>> {
        let start = self.stat(path)?;
        let mut results = Vec::new();
        match start {
            VfsEntry::Dir(dir) => self.search_dir(&dir, query, &mut results)?,
            VfsEntry::File(file) => {
                if file.path.contains(query) {
                    results.push(VfsEntry::File(file));
                }
            }
            VfsEntry::Error(_) => {}
        }
        Ok(results)
    }

    fn search_dir(
        &self,
        dir: &DirEntry,
        query: &str,
        results: &mut Vec<VfsEntry>,
    ) -> Result<()> {
        for child in &dir.children {
            let entry = self.get_entry(&child.checksum)?;
            match entry {
                VfsEntry::Dir(child_dir) => {
                    if child_dir.path.contains(query) {
                        results.push(VfsEntry::Dir(child_dir.clone()));
                    }
                    self.search_dir(&child_dir, query, results)?;
                }
                VfsEntry::File(file) => {
                    if file.path.contains(query) {
                        results.push(VfsEntry::File(file));
                    }
                }
                VfsEntry::Error(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STORAGE_VERSION;

    #[test]
    fn header_roundtrip() {
        let header = SnapshotHeader {
            identifier: Checksum([1; 32]),
            version: STORAGE_VERSION.into(),
            timestamp: Utc::now(),
            duration: 1234,
            identity: SnapshotIdentity::default(),
            name: "nightly".into(),
            category: String::new(),
            environment: String::new(),
            perimeter: String::new(),
            classifications: None,
            tags: Some(vec!["prod".into()]),
            context: None,
            importer: ImporterInfo {
                type_name: "fs".into(),
                origin: "host".into(),
                directory: "/data".into(),
            },
            root: Checksum([2; 32]),
            errors: Checksum([3; 32]),
            index: Checksum([4; 32]),
            metadata: Checksum([5; 32]),
            statistics: Checksum([6; 32]),
            summary: EntrySummary::default(),
        };
        let parsed = SnapshotHeader::parse(&header.serialize().unwrap()).unwrap();
        assert_eq!(parsed.identifier, header.identifier);
        assert_eq!(parsed.root, header.root);
        assert_eq!(parsed.name, "nightly");
        assert_eq!(parsed.tags, Some(vec!["prod".into()]));
    }

    #[test]
    fn header_json_shape() {
        let mut id = [0u8; 32];
        id[0] = 0x01;
        let header = SnapshotHeader {
            identifier: Checksum(id),
            version: String::new(),
            timestamp: Utc::now(),
            duration: 0,
            identity: SnapshotIdentity::default(),
            name: String::new(),
            category: String::new(),
            environment: String::new(),
            perimeter: String::new(),
            classifications: None,
            tags: None,
            context: None,
            importer: ImporterInfo::default(),
            root: Checksum::ZERO,
            errors: Checksum::ZERO,
            index: Checksum::ZERO,
            metadata: Checksum::ZERO,
            statistics: Checksum::ZERO,
            summary: EntrySummary::default(),
        };
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(
            json["identifier"],
            format!("01{}", "00".repeat(31))
        );
        assert_eq!(json["identity"]["identifier"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["importer"]["type"], "");
        assert_eq!(json["root"], "00".repeat(32));
        assert_eq!(json["summary"]["directory"]["files"], 0);
        assert_eq!(json["summary"]["below"]["files"], 0);
    }
}
