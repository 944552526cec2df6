use std::fs;
use std::sync::Arc;

use crate::backend::memory::MemoryBackend;
use crate::backend::StorageBackend;
use crate::cancel::CancelToken;
use crate::config::RepositoryConfig;
use crate::error::CairnError;
use crate::importer::FsImporter;
use crate::repository::Repository;
use crate::resource::ResourceKind;
use crate::snapshot::SnapshotHandle;
use crate::state::State;
use crate::vfs::VfsEntry;

/// Chunking small enough that modest test files span several chunks.
fn small_config() -> RepositoryConfig {
    let mut config = RepositoryConfig::new();
    config.chunking.min_size = 256;
    config.chunking.normal_size = 1024;
    config.chunking.max_size = 4096;
    config.packfile.max_size = 64 * 1024;
    config
}

fn test_data(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

fn build_tree(root: &std::path::Path) {
    fs::create_dir_all(root.join("docs")).unwrap();
    fs::write(root.join("readme.txt"), b"hello cairn\n").unwrap();
    fs::write(root.join("docs/data.bin"), test_data(20_000, 1)).unwrap();
    fs::write(root.join("docs/empty"), b"").unwrap();
}

fn shared_repo(config: RepositoryConfig) -> (Arc<MemoryBackend>, Repository) {
    let backend = Arc::new(MemoryBackend::new());
    let shared: Arc<dyn StorageBackend> = backend.clone();
    let repo = Repository::create(Box::new(shared), config, None).unwrap();
    (backend, repo)
}

#[test]
fn backup_then_read_back() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let (_, repo) = shared_repo(small_config());
    let importer = FsImporter::new(source.path()).unwrap();
    let header = repo
        .new_snapshot()
        .with_name("first")
        .commit(&importer)
        .unwrap();

    assert_eq!(repo.list_snapshots(), vec![header.identifier]);
    assert_eq!(header.summary.below.files, 3);
    assert_eq!(header.summary.below.directories, 1);
    assert_eq!(header.summary.directory.files, 1);
    assert_eq!(header.summary.directory.directories, 1);
    assert_eq!(header.summary.directory.children, 2);

    let snapshot = SnapshotHandle::load(&repo, &header.identifier).unwrap();
    assert_eq!(snapshot.header.name, "first");
    assert_eq!(snapshot.read_file("/readme.txt").unwrap(), b"hello cairn\n");
    assert_eq!(
        snapshot.read_file("/docs/data.bin").unwrap(),
        test_data(20_000, 1)
    );
}

#[test]
fn empty_file_yields_object_with_zero_chunks() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let (_, repo) = shared_repo(small_config());
    let importer = FsImporter::new(source.path()).unwrap();
    let header = repo.new_snapshot().commit(&importer).unwrap();

    let snapshot = SnapshotHandle::load(&repo, &header.identifier).unwrap();
    let entry = snapshot.stat("/docs/empty").unwrap();
    let file = match entry {
        VfsEntry::File(file) => file,
        other => panic!("expected file entry, got {other:?}"),
    };
    assert_eq!(file.size, 0);

    let object = snapshot.get_object(&file.object.unwrap()).unwrap();
    assert!(object.chunks.is_empty());
    assert_eq!(snapshot.read_file("/docs/empty").unwrap(), b"");
}

#[test]
fn second_snapshot_reuses_chunks() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let (_, repo) = shared_repo(small_config());
    let importer = FsImporter::new(source.path()).unwrap();
    repo.new_snapshot().commit(&importer).unwrap();

    let chunks_after_first = count_chunks(&repo);
    let header = repo.new_snapshot().commit(&importer).unwrap();
    assert_eq!(count_chunks(&repo), chunks_after_first);
    assert_eq!(repo.list_snapshots().len(), 2);

    // Identical content still fully readable through the second snapshot.
    let snapshot = SnapshotHandle::load(&repo, &header.identifier).unwrap();
    assert_eq!(snapshot.read_file("/readme.txt").unwrap(), b"hello cairn\n");
}

#[test]
fn packfile_blob_random_access_matches_get_blob() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let (_, repo) = shared_repo(small_config());
    let importer = FsImporter::new(source.path()).unwrap();
    repo.new_snapshot().commit(&importer).unwrap();

    let state_checksum = repo.get_states().unwrap()[0];
    let state = State::parse(&repo.get_state(&state_checksum).unwrap()).unwrap();
    for (checksum, location) in state.iter_kind(ResourceKind::Chunk) {
        let direct = repo
            .get_packfile_blob(&location.packfile, location.offset, location.length)
            .unwrap();
        let resolved = repo.get_blob(ResourceKind::Chunk, &checksum).unwrap();
        assert_eq!(direct, resolved);
    }
}

fn count_chunks(repo: &Repository) -> usize {
    let mut total = 0;
    for state_checksum in repo.get_states().unwrap() {
        let state = State::parse(&repo.get_state(&state_checksum).unwrap()).unwrap();
        total += state.iter_kind(ResourceKind::Chunk).count();
    }
    total
}

#[test]
fn stat_walks_nested_paths() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let (_, repo) = shared_repo(small_config());
    let importer = FsImporter::new(source.path()).unwrap();
    let header = repo.new_snapshot().commit(&importer).unwrap();
    let snapshot = SnapshotHandle::load(&repo, &header.identifier).unwrap();

    assert!(snapshot.stat("/").unwrap().is_dir());
    assert!(snapshot.stat("/docs").unwrap().is_dir());
    assert!(!snapshot.stat("/docs/data.bin").unwrap().is_dir());
    assert!(matches!(
        snapshot.stat("/nope"),
        Err(CairnError::NotFound(_))
    ));

    // Root children are sorted by name.
    let root = snapshot.root_dir().unwrap();
    let names: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["docs", "readme.txt"]);
}

#[test]
fn search_matches_substrings() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let (_, repo) = shared_repo(small_config());
    let importer = FsImporter::new(source.path()).unwrap();
    let header = repo.new_snapshot().commit(&importer).unwrap();
    let snapshot = SnapshotHandle::load(&repo, &header.identifier).unwrap();

    let hits = snapshot.search("/", "data").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path(), "/docs/data.bin");

    let hits = snapshot.search("/", "docs").unwrap();
    assert!(hits.iter().any(|e| e.path() == "/docs"));
    assert!(hits.iter().any(|e| e.path() == "/docs/data.bin"));

    assert!(snapshot.search("/", "zzz").unwrap().is_empty());
}

#[test]
fn resolve_by_prefix_and_latest() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let (_, repo) = shared_repo(small_config());
    let importer = FsImporter::new(source.path()).unwrap();
    let first = repo.new_snapshot().commit(&importer).unwrap();
    let second = repo.new_snapshot().commit(&importer).unwrap();

    let by_prefix = SnapshotHandle::resolve(&repo, &first.identifier.to_hex()[..16]).unwrap();
    assert_eq!(by_prefix.header.identifier, first.identifier);

    let latest = SnapshotHandle::resolve(&repo, "latest").unwrap();
    assert_eq!(latest.header.identifier, second.identifier);

    let absent = "f".repeat(32);
    assert!(matches!(
        SnapshotHandle::resolve(&repo, &absent),
        Err(CairnError::NotFound(_))
    ));
}

#[test]
fn cancelled_commit_publishes_nothing() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let (_, repo) = shared_repo(small_config());
    let importer = FsImporter::new(source.path()).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = repo
        .new_snapshot()
        .with_cancel(cancel)
        .commit(&importer);
    assert!(matches!(result, Err(CairnError::Cancelled)));
    assert!(repo.list_snapshots().is_empty());
    assert!(repo.get_states().unwrap().is_empty());
}

#[test]
fn encrypted_backup_roundtrip() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let backend = Arc::new(MemoryBackend::new());
    let shared: Arc<dyn StorageBackend> = backend.clone();
    let mut config = small_config();
    config = config.with_encryption();
    let repo = Repository::create(Box::new(shared), config, Some("hunter2")).unwrap();

    let importer = FsImporter::new(source.path()).unwrap();
    let header = repo.new_snapshot().commit(&importer).unwrap();
    drop(repo);

    // Reopen with the passphrase and read everything back.
    let shared: Arc<dyn StorageBackend> = backend;
    let repo = Repository::open(Box::new(shared), Some("hunter2")).unwrap();
    let snapshot = SnapshotHandle::load(&repo, &header.identifier).unwrap();
    assert_eq!(snapshot.read_file("/readme.txt").unwrap(), b"hello cairn\n");
    assert_eq!(
        snapshot.read_file("/docs/data.bin").unwrap(),
        test_data(20_000, 1)
    );
}

#[test]
fn importer_errors_are_recorded_not_fatal() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let (_, repo) = shared_repo(small_config());
    let importer = FsImporter::new(source.path()).unwrap();
    let header = repo.new_snapshot().commit(&importer).unwrap();

    let snapshot = SnapshotHandle::load(&repo, &header.identifier).unwrap();
    // Healthy tree: errors index exists and is empty.
    assert!(snapshot.errors().unwrap().is_empty());
    assert_eq!(snapshot.header.summary.below.errors, 0);
}

#[test]
fn content_and_metadata_indexes_cover_files() {
    let source = tempfile::tempdir().unwrap();
    build_tree(source.path());

    let (_, repo) = shared_repo(small_config());
    let importer = FsImporter::new(source.path()).unwrap();
    let header = repo.new_snapshot().commit(&importer).unwrap();
    let snapshot = SnapshotHandle::load(&repo, &header.identifier).unwrap();

    let index = snapshot.content_index().unwrap();
    assert_eq!(index.paths.len(), 3);
    assert!(index.paths.contains_key("/readme.txt"));
    assert!(index.paths.contains_key("/docs/data.bin"));

    let metadata = snapshot.metadata_index().unwrap();
    let total: u64 = metadata.content_types.values().sum();
    assert_eq!(total, 3);
}
