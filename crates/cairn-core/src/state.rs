use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{CairnError, Result};
use crate::resource::{Checksum, ResourceKind};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetadata {
    pub version: u32,
    /// Creation time, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Checksums of parent states whose contents are logically unioned.
    pub extends: Vec<Checksum>,
}

/// A blob's placement inside a packfile. `packfile` is an id into the
/// state's interning pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub packfile: u32,
    pub offset: u64,
    pub length: u32,
}

/// A location with the packfile id resolved back to its checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLocation {
    pub packfile: Checksum,
    pub offset: u64,
    pub length: u32,
}

/// Compact, serializable, mergeable catalog mapping `(kind, checksum)` to a
/// packfile location. Checksums are interned into `id_to_checksum` so the
/// per-kind maps key by small integer ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub metadata: StateMetadata,
    id_to_checksum: Vec<Checksum>,
    snapshots: BTreeMap<u32, Location>,
    chunks: BTreeMap<u32, Location>,
    objects: BTreeMap<u32, Location>,
    files: BTreeMap<u32, Location>,
    directories: BTreeMap<u32, Location>,
    datas: BTreeMap<u32, Location>,
    #[serde(skip)]
    checksum_to_id: HashMap<Checksum, u32>,
}

impl State {
    pub fn new() -> Self {
        Self {
            metadata: StateMetadata {
                version: STATE_VERSION,
                timestamp: Utc::now().timestamp_nanos_opt().unwrap_or(0),
                extends: Vec::new(),
            },
            id_to_checksum: Vec::new(),
            snapshots: BTreeMap::new(),
            chunks: BTreeMap::new(),
            objects: BTreeMap::new(),
            files: BTreeMap::new(),
            directories: BTreeMap::new(),
            datas: BTreeMap::new(),
            checksum_to_id: HashMap::new(),
        }
    }

    fn map_for(&self, kind: ResourceKind) -> &BTreeMap<u32, Location> {
        match kind {
            ResourceKind::Snapshot => &self.snapshots,
            ResourceKind::Chunk => &self.chunks,
            ResourceKind::Object => &self.objects,
            ResourceKind::VfsFile => &self.files,
            ResourceKind::VfsDir => &self.directories,
            _ => &self.datas,
        }
    }

    fn map_for_mut(&mut self, kind: ResourceKind) -> &mut BTreeMap<u32, Location> {
        match kind {
            ResourceKind::Snapshot => &mut self.snapshots,
            ResourceKind::Chunk => &mut self.chunks,
            ResourceKind::Object => &mut self.objects,
            ResourceKind::VfsFile => &mut self.files,
            ResourceKind::VfsDir => &mut self.directories,
            _ => &mut self.datas,
        }
    }

    fn intern(&mut self, checksum: Checksum) -> u32 {
        if let Some(id) = self.checksum_to_id.get(&checksum) {
            return *id;
        }
        let id = self.id_to_checksum.len() as u32;
        self.id_to_checksum.push(checksum);
        self.checksum_to_id.insert(checksum, id);
        id
    }

    fn checksum_of(&self, id: u32) -> Option<Checksum> {
        self.id_to_checksum.get(id as usize).copied()
    }

    /// Record a blob's location. Idempotent for identical locations;
    /// contradictory locations are a conflict.
    pub fn insert(
        &mut self,
        kind: ResourceKind,
        checksum: Checksum,
        packfile: Checksum,
        offset: u64,
        length: u32,
    ) -> Result<()> {
        let packfile_id = self.intern(packfile);
        let blob_id = self.intern(checksum);
        let location = Location {
            packfile: packfile_id,
            offset,
            length,
        };

        match self.map_for_mut(kind).entry(blob_id) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(location);
                Ok(())
            }
            std::collections::btree_map::Entry::Occupied(existing) => {
                if *existing.get() == location {
                    Ok(())
                } else {
                    Err(CairnError::Conflict(format!(
                        "{kind} blob {checksum} already recorded at a different location"
                    )))
                }
            }
        }
    }

    /// Local lookup only; the repository walks `extends` on a miss.
    pub fn lookup(&self, kind: ResourceKind, checksum: &Checksum) -> Option<BlobLocation> {
        let id = *self.checksum_to_id.get(checksum)?;
        let location = self.map_for(kind).get(&id)?;
        Some(BlobLocation {
            packfile: self.checksum_of(location.packfile)?,
            offset: location.offset,
            length: location.length,
        })
    }

    /// Union `other` into `self`. Conflicting keys keep `self`'s location.
    /// `other_checksum` is appended to `extends` unless `self` already
    /// dominated `other` (contained every one of its entries).
    pub fn merge(&mut self, other: &State, other_checksum: Option<Checksum>) {
        let mut contributed = false;
        for kind in [
            ResourceKind::Snapshot,
            ResourceKind::Chunk,
            ResourceKind::Object,
            ResourceKind::VfsFile,
            ResourceKind::VfsDir,
            ResourceKind::Data,
        ] {
            for (blob_id, location) in other.map_for(kind) {
                let Some(checksum) = other.checksum_of(*blob_id) else {
                    continue;
                };
                let Some(packfile) = other.checksum_of(location.packfile) else {
                    continue;
                };
                if self.lookup(kind, &checksum).is_none() {
                    contributed = true;
                    // Cannot conflict: the key was just checked absent.
                    let _ = self.insert(kind, checksum, packfile, location.offset, location.length);
                }
            }
        }
        if contributed {
            if let Some(other_checksum) = other_checksum {
                if !self.metadata.extends.contains(&other_checksum) {
                    self.metadata.extends.push(other_checksum);
                }
            }
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut state: State = rmp_serde::from_slice(data)?;
        if state.metadata.version > STATE_VERSION {
            return Err(CairnError::UnsupportedVersion(state.metadata.version));
        }
        state.rebuild_reverse_index()?;
        Ok(state)
    }

    fn rebuild_reverse_index(&mut self) -> Result<()> {
        self.checksum_to_id = HashMap::with_capacity(self.id_to_checksum.len());
        for (id, checksum) in self.id_to_checksum.iter().enumerate() {
            if self
                .checksum_to_id
                .insert(*checksum, id as u32)
                .is_some()
            {
                return Err(CairnError::Corruption(format!(
                    "state interning pool has duplicate checksum {checksum}"
                )));
            }
        }
        Ok(())
    }

    pub fn extends(&self) -> &[Checksum] {
        &self.metadata.extends
    }

    /// All snapshot ids recorded in this state (no `extends` walk).
    pub fn snapshot_ids(&self) -> Vec<Checksum> {
        self.snapshots
            .keys()
            .filter_map(|id| self.checksum_of(*id))
            .collect()
    }

    /// Distinct packfiles referenced by any entry.
    pub fn packfiles(&self) -> BTreeSet<Checksum> {
        let mut out = BTreeSet::new();
        for kind in [
            ResourceKind::Snapshot,
            ResourceKind::Chunk,
            ResourceKind::Object,
            ResourceKind::VfsFile,
            ResourceKind::VfsDir,
            ResourceKind::Data,
        ] {
            for location in self.map_for(kind).values() {
                if let Some(checksum) = self.checksum_of(location.packfile) {
                    out.insert(checksum);
                }
            }
        }
        out
    }

    /// Iterate every `(checksum, location)` of one kind.
    pub fn iter_kind(
        &self,
        kind: ResourceKind,
    ) -> impl Iterator<Item = (Checksum, BlobLocation)> + '_ {
        self.map_for(kind).iter().filter_map(move |(id, location)| {
            let checksum = self.checksum_of(*id)?;
            let packfile = self.checksum_of(location.packfile)?;
            Some((
                checksum,
                BlobLocation {
                    packfile,
                    offset: location.offset,
                    length: location.length,
                },
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
            + self.chunks.len()
            + self.objects.len()
            + self.files.len()
            + self.directories.len()
            + self.datas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
