use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::chunker;
use crate::config::{ChunkingConfig, STORAGE_VERSION};
use crate::error::{CairnError, Result};
use crate::hashing::Hasher;
use crate::importer::{Importer, SourceEntry, SourceKind, WalkEvent};
use crate::object::{sniff_content_type, ChunkRef, EntropyAccumulator, Object, SNIFF_LEN};
use crate::packfile::PackfileBuilder;
use crate::repository::Repository;
use crate::resource::{Checksum, ResourceKind};
use crate::snapshot::events::{emit, Event};
use crate::snapshot::{ContentIndex, MetadataIndex, SnapshotHeader, SnapshotIdentity};
use crate::state::State;
use crate::vfs::{
    ChildRef, DirEntry, EntrySummary, ErrorEntry, FileEntry, LevelStats, SubtreeStats, VFS_VERSION,
};

/// Files at or above this size are chunked inline on the walker thread,
/// streaming chunk-by-chunk, instead of being buffered whole by a worker.
const INLINE_FILE_THRESHOLD: u64 = 256 * 1024 * 1024;

/// Default number of chunking workers.
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(1)
}

/// Output of a chunking worker for one regular file.
enum Processed {
    File {
        entry: SourceEntry,
        chunks: Vec<(Checksum, Vec<u8>)>,
        content_type: String,
        entropy: f64,
    },
    Failed {
        path: String,
        error: String,
    },
}

/// Per-directory accumulator living on the walk stack.
struct DirAccumulator {
    entry: SourceEntry,
    children: Vec<ChildRef>,
    level: LevelStats,
    below: SubtreeStats,
    /// Files dispatched to workers whose completions are still outstanding.
    pending_files: usize,
}

/// Builds one snapshot: owns its packfile builders and pending state.
/// `commit` consumes the builder and publishes; dropping it (or `abort`)
/// publishes nothing, leaving any already-written packfiles as orphans for
/// maintenance to collect.
pub struct SnapshotBuilder<'a> {
    repo: &'a Repository,
    pending_state: State,
    active: PackfileBuilder,
    /// Blobs sitting in the unsealed active packfile.
    in_flight: HashSet<(u8, Checksum)>,
    stack: Vec<DirAccumulator>,
    root: Option<(Checksum, EntrySummary)>,
    errors: Vec<ErrorEntry>,
    content_index: ContentIndex,
    metadata_index: MetadataIndex,
    events: Option<Sender<Event>>,
    cancel: CancelToken,
    workers: usize,
    name: String,
    tags: Option<Vec<String>>,
    packfiles_written: u64,
}

impl Repository {
    /// Start a new snapshot. The returned builder owns the commit
    /// transaction; nothing is published until `commit` succeeds.
    pub fn new_snapshot(&self) -> SnapshotBuilder<'_> {
        SnapshotBuilder {
            repo: self,
            pending_state: State::new(),
            active: PackfileBuilder::new(
                self.codec().clone(),
                self.configuration().packfile.max_size,
            ),
            in_flight: HashSet::new(),
            stack: Vec::new(),
            root: None,
            errors: Vec::new(),
            content_index: ContentIndex::default(),
            metadata_index: MetadataIndex::default(),
            events: None,
            cancel: CancelToken::new(),
            workers: default_workers(),
            name: String::new(),
            tags: None,
            packfiles_written: 0,
        }
    }
}

impl<'a> SnapshotBuilder<'a> {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_events(mut self, sender: Sender<Event>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Release resources without publishing. Packfiles already flushed stay
    /// behind as orphans; readers never see them without a state.
    pub fn abort(self) {
        debug!(
            packfiles = self.packfiles_written,
            "snapshot aborted, orphan packfiles left for maintenance"
        );
    }

    /// Walk the importer, deduplicate and store content, then atomically
    /// publish: all packfiles are written before the state, and the snapshot
    /// exists exactly when the state blob is visible.
    pub fn commit(mut self, importer: &(dyn Importer + Sync)) -> Result<SnapshotHeader> {
        let started = Instant::now();
        let started_at = Utc::now();

        let workers = self.workers;
        let (task_tx, task_rx) = bounded::<SourceEntry>(workers * 2);
        let (done_tx, done_rx) = bounded::<Processed>(workers * 2);
        let hasher = self.repo.codec().hasher().clone();
        let chunking = self.repo.configuration().chunking.clone();

        std::thread::scope(|scope| -> Result<()> {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let done_tx = done_tx.clone();
                let hasher = hasher.clone();
                let chunking = chunking.clone();
                scope.spawn(move || {
                    while let Ok(entry) = task_rx.recv() {
                        let processed = process_file(importer, entry, &hasher, &chunking);
                        if done_tx.send(processed).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);
            drop(task_rx);

            let walk_result = self.walk(importer, &task_tx, &done_rx);
            // Disconnect the pool so workers exit and the scope can join
            // them. On the error path, drain leftover completions so a
            // worker blocked on a full channel can finish its send.
            drop(task_tx);
            if walk_result.is_err() {
                while done_rx.recv().is_ok() {}
            } else {
                debug_assert!(self.stack.is_empty());
            }
            walk_result
        })?;

        let root = self
            .root
            .take()
            .ok_or_else(|| CairnError::Other("importer produced no root directory".into()))?;

        // Auxiliary indexes become ordinary content-addressed blobs.
        let errors_bytes = rmp_serde::to_vec(&self.errors)?;
        let errors_checksum = self.store_blob(ResourceKind::VfsError, &errors_bytes)?;

        let index_bytes = rmp_serde::to_vec(&self.content_index)?;
        let index_checksum = self.store_blob(ResourceKind::Index, &index_bytes)?;

        let metadata_bytes = rmp_serde::to_vec(&self.metadata_index)?;
        let metadata_checksum = self.store_blob(ResourceKind::Metadata, &metadata_bytes)?;

        let statistics_bytes = rmp_serde::to_vec(&root.1)?;
        let statistics_checksum = self.store_blob(ResourceKind::Data, &statistics_bytes)?;

        let header = SnapshotHeader {
            identifier: Checksum::random(),
            version: STORAGE_VERSION.into(),
            timestamp: started_at,
            duration: started.elapsed().as_nanos() as u64,
            identity: SnapshotIdentity::default(),
            name: std::mem::take(&mut self.name),
            category: String::new(),
            environment: String::new(),
            perimeter: String::new(),
            classifications: None,
            tags: self.tags.take(),
            context: None,
            importer: importer.info(),
            root: root.0,
            errors: errors_checksum,
            index: index_checksum,
            metadata: metadata_checksum,
            statistics: statistics_checksum,
            summary: root.1,
        };

        let header_bytes = header.serialize()?;
        self.store_identified_blob(ResourceKind::Snapshot, header.identifier, &header_bytes)?;

        // Commit point: every packfile lands before the state is published.
        self.roll_packfile()?;
        let state_checksum = self.repo.publish_state(&self.pending_state)?;
        debug!(
            snapshot = %header.identifier,
            state = %state_checksum,
            packfiles = self.packfiles_written,
            errors = self.errors.len(),
            "snapshot committed"
        );
        emit(
            self.events.as_ref(),
            Event::SnapshotCommitted {
                identifier: header.identifier,
            },
        );
        Ok(header)
    }

    // ----- walking -----

    fn walk(
        &mut self,
        importer: &(dyn Importer + Sync),
        task_tx: &Sender<SourceEntry>,
        done_rx: &Receiver<Processed>,
    ) -> Result<()> {
        for event in importer.walk()? {
            self.cancel.check()?;
            match event {
                WalkEvent::EnterDir(entry) => {
                    self.stack.push(DirAccumulator {
                        entry,
                        children: Vec::new(),
                        level: LevelStats::default(),
                        below: SubtreeStats::default(),
                        pending_files: 0,
                    });
                }
                WalkEvent::File(entry) => match entry.kind {
                    SourceKind::Symlink => self.commit_symlink(entry)?,
                    SourceKind::File if entry.size >= INLINE_FILE_THRESHOLD => {
                        self.commit_large_file_inline(importer, entry)?;
                    }
                    SourceKind::File => self.dispatch(task_tx, done_rx, entry)?,
                    SourceKind::Directory => {
                        // Importers emit directories as EnterDir/LeaveDir.
                        warn!(path = %entry.path, "ignoring directory file event");
                    }
                },
                WalkEvent::Error { path, error } => self.record_error(path, error),
                WalkEvent::LeaveDir { path } => {
                    while self.pending_for(&path) > 0 {
                        let processed = done_rx.recv().map_err(|_| {
                            CairnError::Other("chunking workers disconnected".into())
                        })?;
                        self.process_completion(processed)?;
                    }
                    self.close_dir(&path)?;
                }
            }
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        task_tx: &Sender<SourceEntry>,
        done_rx: &Receiver<Processed>,
        entry: SourceEntry,
    ) -> Result<()> {
        let parent = parent_path(&entry.path);
        self.accumulator_mut(&parent)?.pending_files += 1;

        let mut entry = entry;
        loop {
            // Never block on a full task queue without draining completions,
            // or the pipeline deadlocks with workers blocked on `done`.
            while let Ok(processed) = done_rx.try_recv() {
                self.process_completion(processed)?;
            }
            match task_tx.try_send(entry) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    entry = back;
                    let processed = done_rx
                        .recv()
                        .map_err(|_| CairnError::Other("chunking workers disconnected".into()))?;
                    self.process_completion(processed)?;
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(CairnError::Other("chunking workers disconnected".into()))
                }
            }
        }
    }

    fn pending_for(&self, path: &str) -> usize {
        self.stack
            .iter()
            .find(|acc| acc.entry.path == path)
            .map(|acc| acc.pending_files)
            .unwrap_or(0)
    }

    fn accumulator_mut(&mut self, path: &str) -> Result<&mut DirAccumulator> {
        self.stack
            .iter_mut()
            .rev()
            .find(|acc| acc.entry.path == path)
            .ok_or_else(|| CairnError::Other(format!("no open directory for {path}")))
    }

    // ----- completions -----

    fn process_completion(&mut self, processed: Processed) -> Result<()> {
        self.cancel.check()?;
        match processed {
            Processed::Failed { path, error } => {
                let parent = parent_path(&path);
                if let Ok(acc) = self.accumulator_mut(&parent) {
                    acc.pending_files -= 1;
                }
                emit(
                    self.events.as_ref(),
                    Event::FileError {
                        path: path.clone(),
                        error: error.clone(),
                    },
                );
                self.record_error(path, error);
                Ok(())
            }
            Processed::File {
                entry,
                chunks,
                content_type,
                entropy,
            } => {
                let mut chunk_refs = Vec::with_capacity(chunks.len());
                for (checksum, data) in chunks {
                    chunk_refs.push(ChunkRef {
                        checksum,
                        length: data.len() as u32,
                    });
                    self.store_blob_precomputed(ResourceKind::Chunk, checksum, &data)?;
                }
                let parent = parent_path(&entry.path);
                if let Ok(acc) = self.accumulator_mut(&parent) {
                    acc.pending_files -= 1;
                }
                self.finish_file(entry, chunk_refs, content_type, entropy)
            }
        }
    }

    /// Stream an oversized file through the chunker without buffering it.
    fn commit_large_file_inline(
        &mut self,
        importer: &(dyn Importer + Sync),
        entry: SourceEntry,
    ) -> Result<()> {
        let reader = match importer.open(&entry.path) {
            Ok(reader) => reader,
            Err(e) => {
                self.record_error(entry.path, e.to_string());
                return Ok(());
            }
        };

        let mut chunk_refs = Vec::new();
        let mut entropy = EntropyAccumulator::new();
        let mut head = Vec::with_capacity(SNIFF_LEN);
        for chunk in chunker::chunk_stream(reader, &self.repo.configuration().chunking) {
            self.cancel.check()?;
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Bytes already stored for this file stay dedup-able;
                    // the entry itself is recorded as unreadable.
                    self.record_error(entry.path, e.to_string());
                    return Ok(());
                }
            };
            entropy.update(&chunk.data);
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(chunk.data.len());
                head.extend_from_slice(&chunk.data[..take]);
            }
            let checksum = self.repo.codec().checksum(&chunk.data);
            chunk_refs.push(ChunkRef {
                checksum,
                length: chunk.length,
            });
            self.store_blob_precomputed(ResourceKind::Chunk, checksum, &chunk.data)?;
        }

        let content_type = sniff_content_type(&head).to_string();
        self.finish_file(entry, chunk_refs, content_type, entropy.finish())
    }

    /// Shared tail of both file paths: object, file entry, indexes, stats.
    fn finish_file(
        &mut self,
        entry: SourceEntry,
        chunk_refs: Vec<ChunkRef>,
        content_type: String,
        entropy: f64,
    ) -> Result<()> {
        let chunk_count = chunk_refs.len() as u64;
        let size: u64 = chunk_refs.iter().map(|c| c.length as u64).sum();

        let object = Object::new(chunk_refs, content_type.clone());
        let object_bytes = object.serialize()?;
        let object_checksum = self.store_blob(ResourceKind::Object, &object_bytes)?;

        let file_entry = FileEntry {
            version: VFS_VERSION,
            name: entry.name.clone(),
            path: entry.path.clone(),
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            mtime: entry.mtime,
            size,
            symlink_target: None,
            object: Some(object_checksum),
            content_type: content_type.clone(),
            entropy,
            xattrs: Default::default(),
        };
        let file_bytes = rmp_serde::to_vec(&file_entry)?;
        let file_checksum = self.store_blob(ResourceKind::VfsFile, &file_bytes)?;

        self.content_index
            .paths
            .insert(entry.path.clone(), object_checksum);
        *self
            .metadata_index
            .content_types
            .entry(content_type)
            .or_insert(0) += 1;

        let parent = parent_path(&entry.path);
        let acc = self.accumulator_mut(&parent)?;
        acc.level.record_file(&file_entry, chunk_count);
        acc.children.push(ChildRef {
            name: entry.name,
            checksum: file_checksum,
        });

        emit(
            self.events.as_ref(),
            Event::FileOk {
                path: entry.path,
                size,
            },
        );
        Ok(())
    }

    fn commit_symlink(&mut self, entry: SourceEntry) -> Result<()> {
        let file_entry = FileEntry {
            version: VFS_VERSION,
            name: entry.name.clone(),
            path: entry.path.clone(),
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            mtime: entry.mtime,
            size: 0,
            symlink_target: entry.symlink_target.clone(),
            object: None,
            content_type: String::new(),
            entropy: 0.0,
            xattrs: Default::default(),
        };
        let file_bytes = rmp_serde::to_vec(&file_entry)?;
        let file_checksum = self.store_blob(ResourceKind::VfsFile, &file_bytes)?;

        let parent = parent_path(&entry.path);
        let acc = self.accumulator_mut(&parent)?;
        acc.level.record_file(&file_entry, 0);
        acc.children.push(ChildRef {
            name: entry.name,
            checksum: file_checksum,
        });
        Ok(())
    }

    fn record_error(&mut self, path: String, error: String) {
        let parent = parent_path(&path);
        let recorded = match self.stack.iter_mut().rev().find(|a| a.entry.path == parent) {
            Some(acc) => {
                acc.level.record_error();
                true
            }
            None => false,
        };
        if !recorded {
            if let Some(root) = self.stack.first_mut() {
                root.level.record_error();
            }
        }
        warn!(path = %path, error = %error, "unreadable entry recorded");
        self.errors.push(ErrorEntry { path, error });
    }

    fn close_dir(&mut self, path: &str) -> Result<()> {
        let mut acc = match self.stack.pop() {
            Some(acc) if acc.entry.path == path => acc,
            Some(acc) => {
                return Err(CairnError::Other(format!(
                    "unbalanced walk: closing {path} but {} is open",
                    acc.entry.path
                )))
            }
            None => return Err(CairnError::Other("unbalanced walk: empty stack".into())),
        };

        acc.level.finalize();
        let mut below = acc.below;
        below.absorb_level(&acc.level);
        acc.children.sort_by(|a, b| a.name.cmp(&b.name));

        let summary = EntrySummary {
            directory: acc.level,
            below,
        };
        let dir_entry = DirEntry {
            version: VFS_VERSION,
            name: acc.entry.name,
            path: acc.entry.path,
            mode: acc.entry.mode,
            uid: acc.entry.uid,
            gid: acc.entry.gid,
            mtime: acc.entry.mtime,
            children: acc.children,
            summary: summary.clone(),
        };
        let dir_bytes = rmp_serde::to_vec(&dir_entry)?;
        let dir_checksum = self.store_blob(ResourceKind::VfsDir, &dir_bytes)?;

        if let Some(parent) = self.stack.last_mut() {
            parent.level.record_directory(dir_entry.mode);
            parent.below.absorb(&summary.below);
            parent.children.push(ChildRef {
                name: dir_entry.name.clone(),
                checksum: dir_checksum,
            });
        } else {
            self.root = Some((dir_checksum, summary));
        }

        emit(
            self.events.as_ref(),
            Event::DirectoryOk {
                path: dir_entry.path,
            },
        );
        Ok(())
    }

    // ----- blob storage -----

    /// Store a content-addressed blob unless the repository, the pending
    /// state or the unsealed packfile already has it.
    fn store_blob(&mut self, kind: ResourceKind, plaintext: &[u8]) -> Result<Checksum> {
        let checksum = self.repo.codec().checksum(plaintext);
        self.store_blob_precomputed(kind, checksum, plaintext)?;
        Ok(checksum)
    }

    fn store_blob_precomputed(
        &mut self,
        kind: ResourceKind,
        checksum: Checksum,
        plaintext: &[u8],
    ) -> Result<()> {
        if self.repo.lookup(kind, &checksum).is_some()
            || self.pending_state.lookup(kind, &checksum).is_some()
            || self.in_flight.contains(&(kind as u8, checksum))
        {
            return Ok(());
        }
        match self.active.add(kind, plaintext) {
            Ok(_) => {}
            Err(CairnError::PackfileFull) => {
                self.roll_packfile()?;
                self.active.add(kind, plaintext)?;
            }
            Err(e) => return Err(e),
        }
        self.in_flight.insert((kind as u8, checksum));
        Ok(())
    }

    /// Store an identifier-addressed blob (the snapshot header).
    fn store_identified_blob(
        &mut self,
        kind: ResourceKind,
        identifier: Checksum,
        plaintext: &[u8],
    ) -> Result<()> {
        match self.active.add_with_identifier(kind, identifier, plaintext) {
            Ok(_) => {}
            Err(CairnError::PackfileFull) => {
                self.roll_packfile()?;
                self.active.add_with_identifier(kind, identifier, plaintext)?;
            }
            Err(e) => return Err(e),
        }
        self.in_flight.insert((kind as u8, identifier));
        Ok(())
    }

    /// Seal the active packfile, upload it and record every entry in the
    /// pending state under the now-known packfile checksum.
    fn roll_packfile(&mut self) -> Result<()> {
        if self.active.is_empty() {
            return Ok(());
        }
        let next = PackfileBuilder::new(
            self.repo.codec().clone(),
            self.repo.configuration().packfile.max_size,
        );
        let sealed = std::mem::replace(&mut self.active, next).finalize()?;

        let repo = self.repo;
        repo.with_retry("put packfile", || {
            repo.backend()
                .put_blob(ResourceKind::Packfile, &sealed.checksum, &sealed.bytes)
        })?;

        for entry in &sealed.entries {
            self.pending_state.insert(
                entry.kind,
                entry.checksum,
                sealed.checksum,
                entry.offset,
                entry.length,
            )?;
        }
        self.in_flight.clear();
        self.packfiles_written += 1;
        debug!(
            packfile = %sealed.checksum,
            blobs = sealed.entries.len(),
            bytes = sealed.bytes.len(),
            "flushed packfile"
        );
        emit(
            self.events.as_ref(),
            Event::PackfileFlushed {
                checksum: sealed.checksum,
                size: sealed.bytes.len() as u64,
            },
        );
        Ok(())
    }
}

/// Worker-side processing: read, chunk, hash, sniff, measure entropy.
fn process_file(
    importer: &dyn Importer,
    entry: SourceEntry,
    hasher: &Hasher,
    chunking: &ChunkingConfig,
) -> Processed {
    let path = entry.path.clone();
    match chunk_whole_file(importer, &entry, hasher, chunking) {
        Ok((chunks, content_type, entropy)) => Processed::File {
            entry,
            chunks,
            content_type,
            entropy,
        },
        Err(e) => Processed::Failed {
            path,
            error: e.to_string(),
        },
    }
}

type ChunkedFile = (Vec<(Checksum, Vec<u8>)>, String, f64);

fn chunk_whole_file(
    importer: &dyn Importer,
    entry: &SourceEntry,
    hasher: &Hasher,
    chunking: &ChunkingConfig,
) -> Result<ChunkedFile> {
    let reader = importer.open(&entry.path)?;
    let mut chunks = Vec::new();
    let mut entropy = EntropyAccumulator::new();
    let mut head = Vec::with_capacity(SNIFF_LEN);

    for chunk in chunker::chunk_stream(reader, chunking) {
        let chunk = chunk?;
        entropy.update(&chunk.data);
        if head.len() < SNIFF_LEN {
            let take = (SNIFF_LEN - head.len()).min(chunk.data.len());
            head.extend_from_slice(&chunk.data[..take]);
        }
        let checksum = hasher.checksum(&chunk.data);
        chunks.push((checksum, chunk.data));
    }

    Ok((
        chunks,
        sniff_content_type(&head).to_string(),
        entropy.finish(),
    ))
}

/// Parent directory of a `/`-rooted path.
fn parent_path(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}
