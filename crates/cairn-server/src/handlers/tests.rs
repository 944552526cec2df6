use axum::http::StatusCode;
use chrono::{TimeZone, Utc};
use serde_json::json;

use cairn_core::backend::StorageBackend;
use cairn_core::config::RepositoryConfig;
use cairn_core::importer::{FsImporter, ImporterInfo};
use cairn_core::packfile::PackfileBuilder;
use cairn_core::repository::Repository;
use cairn_core::resource::{Checksum, ResourceKind};
use cairn_core::snapshot::{SnapshotHeader, SnapshotIdentity};
use cairn_core::state::State;
use cairn_core::vfs::EntrySummary;

use crate::state::AppState;

use super::test_helpers::{fixed_config, get_json, get_response, plain_app, router_for};

fn checksum_first_byte(byte: u8) -> Checksum {
    let mut out = [0u8; 32];
    out[0] = byte;
    Checksum(out)
}

/// Publish a snapshot with pinned header fields, bypassing the assembler.
fn publish_fixture_snapshot(state: &AppState) -> SnapshotHeader {
    let header = SnapshotHeader {
        identifier: checksum_first_byte(0x01),
        version: String::new(),
        timestamp: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
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

    let repo = &state.repo;
    let mut pack = PackfileBuilder::new(repo.codec().clone(), 1 << 20);
    let (offset, length) = pack
        .add_with_identifier(
            ResourceKind::Snapshot,
            header.identifier,
            &header.serialize().unwrap(),
        )
        .unwrap();
    let sealed = pack.finalize().unwrap();
    repo.backend()
        .put_blob(ResourceKind::Packfile, &sealed.checksum, &sealed.bytes)
        .unwrap();

    let mut pending = State::new();
    pending
        .insert(
            ResourceKind::Snapshot,
            header.identifier,
            sealed.checksum,
            offset,
            length,
        )
        .unwrap();
    repo.publish_state(&pending).unwrap();
    header
}

fn zero_level_stats() -> serde_json::Value {
    json!({
        "directories": 0, "files": 0, "symlinks": 0, "devices": 0,
        "pipes": 0, "sockets": 0, "children": 0, "setuid": 0, "setgid": 0,
        "sticky": 0, "objects": 0, "chunks": 0, "min_size": 0, "max_size": 0,
        "avg_size": 0, "size": 0, "min_mod_time": 0, "max_mod_time": 0,
        "min_entropy": 0.0, "max_entropy": 0.0, "sum_entropy": 0.0,
        "avg_entropy": 0.0, "hi_entropy": 0, "lo_entropy": 0,
        "MIME_audio": 0, "MIME_video": 0, "MIME_image": 0, "MIME_text": 0,
        "MIME_application": 0, "MIME_other": 0, "errors": 0
    })
}

fn zero_subtree_stats() -> serde_json::Value {
    json!({
        "directories": 0, "files": 0, "symlinks": 0, "devices": 0,
        "pipes": 0, "sockets": 0, "children": 0, "setuid": 0, "setgid": 0,
        "sticky": 0, "objects": 0, "chunks": 0, "min_size": 0, "max_size": 0,
        "size": 0, "min_mod_time": 0, "max_mod_time": 0,
        "min_entropy": 0.0, "max_entropy": 0.0, "hi_entropy": 0, "lo_entropy": 0,
        "MIME_audio": 0, "MIME_video": 0, "MIME_image": 0, "MIME_text": 0,
        "MIME_application": 0, "MIME_other": 0, "errors": 0
    })
}

#[tokio::test]
async fn configuration_matches_pinned_shape() {
    let backend = std::sync::Arc::new(cairn_core::backend::memory::MemoryBackend::new());
    let shared: std::sync::Arc<dyn cairn_core::backend::StorageBackend> = backend;
    let repo = Repository::create(Box::new(shared), fixed_config(), Some("fixture")).unwrap();
    let router = router_for(AppState::new(repo));

    let (status, body) = get_json(&router, "/api/repository/configuration").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "Version": "0.6.0",
            "Timestamp": "2025-01-01T00:00:00Z",
            "RepositoryID": "00ff0000-0000-4000-a000-000000000001",
            "Packfile": { "MaxSize": 20971520 },
            "Chunking": {
                "Algorithm": "FASTCDC",
                "MinSize": 65536,
                "NormalSize": 1048576,
                "MaxSize": 4194304
            },
            "Hashing": { "Algorithm": "SHA256", "Bits": 256 },
            "Compression": {
                "Algorithm": "LZ4",
                "Level": 131072,
                "WindowSize": -1,
                "ChunkSize": -1,
                "BlockSize": -1,
                "EnableCRC": false
            },
            "Encryption": { "Algorithm": "AES256-GCM", "Key": "" }
        })
    );
}

#[tokio::test]
async fn snapshots_empty() {
    let (_, state) = plain_app();
    let router = router_for(state);
    let (status, body) = get_json(&router, "/api/repository/snapshots").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "items": [], "total": 0 }));
}

#[tokio::test]
async fn snapshots_one_fixture() {
    let (_, state) = plain_app();
    publish_fixture_snapshot(&state);
    let router = router_for(state);

    let (status, body) = get_json(&router, "/api/repository/snapshots").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "total": 1,
            "items": [{
                "identifier": format!("01{}", "00".repeat(31)),
                "version": "",
                "timestamp": "2025-01-02T00:00:00Z",
                "duration": 0,
                "identity": {
                    "identifier": "00000000-0000-0000-0000-000000000000",
                    "public_key": null
                },
                "name": "",
                "category": "",
                "environment": "",
                "perimeter": "",
                "classifications": null,
                "tags": null,
                "context": null,
                "importer": { "type": "", "origin": "", "directory": "" },
                "root": "00".repeat(32),
                "errors": "00".repeat(32),
                "index": "00".repeat(32),
                "metadata": "00".repeat(32),
                "statistics": "00".repeat(32),
                "summary": {
                    "directory": zero_level_stats(),
                    "below": zero_subtree_stats()
                }
            }]
        })
    );
}

#[tokio::test]
async fn snapshots_pagination_bounds() {
    let (_, state) = plain_app();
    publish_fixture_snapshot(&state);
    let router = router_for(state);

    let (status, body) = get_json(&router, "/api/repository/snapshots?offset=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "items": [], "total": 1 }));

    let (status, body) = get_json(&router, "/api/repository/snapshots?offset=1&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "items": [], "total": 1 }));
}

#[tokio::test]
async fn snapshots_invalid_sort_is_structured_400() {
    let (_, state) = plain_app();
    let router = router_for(state);

    let (status, body) = get_json(&router, "/api/repository/snapshots?sort=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({
            "error": {
                "code": "invalid_params",
                "message": "Invalid parameter",
                "params": {
                    "sort": {
                        "code": "invalid_argument",
                        "message": "invalid sort key: abc"
                    }
                }
            }
        })
    );
}

#[tokio::test]
async fn snapshots_invalid_offset_is_400() {
    let (_, state) = plain_app();
    let router = router_for(state);
    let (status, _) = get_json(&router, "/api/repository/snapshots?offset=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get_json(&router, "/api/repository/snapshots?limit=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn states_listing() {
    let (backend, state) = plain_app();
    let router = router_for(state);

    let (status, body) = get_json(&router, "/api/repository/states").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "items": [], "total": 0 }));

    for byte in [0x01u8, 0x02, 0x03] {
        backend
            .put_blob(ResourceKind::State, &checksum_first_byte(byte), b"opaque")
            .unwrap();
    }
    let (status, body) = get_json(&router, "/api/repository/states").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "total": 3,
            "items": [
                format!("01{}", "00".repeat(31)),
                format!("02{}", "00".repeat(31)),
                format!("03{}", "00".repeat(31)),
            ]
        })
    );
}

#[tokio::test]
async fn state_returns_decoded_bytes() {
    let (backend, state) = plain_app();
    let plaintext = br#"{"test": "data"}"#;
    let name = state.repo.codec().checksum(plaintext);
    let framed = state
        .repo
        .codec()
        .encode(ResourceKind::State, plaintext)
        .unwrap();
    backend
        .put_blob(ResourceKind::State, &name, &framed)
        .unwrap();
    let router = router_for(state);

    let (status, bytes) =
        get_response(&router, &format!("/api/repository/state/{}", name.to_hex())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, plaintext);
}

#[tokio::test]
async fn state_bad_id_is_400_and_missing_is_404() {
    let (_, state) = plain_app();
    let router = router_for(state);

    let (status, _) = get_json(&router, "/api/repository/state/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(
        &router,
        &format!("/api/repository/state/{}", "0a".repeat(32)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn packfiles_listing() {
    let (backend, state) = plain_app();
    let router = router_for(state);

    let (status, body) = get_json(&router, "/api/repository/packfiles").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "items": [], "total": 0 }));

    for byte in [0x04u8, 0x05, 0x06] {
        backend
            .put_blob(ResourceKind::Packfile, &checksum_first_byte(byte), b"pack")
            .unwrap();
    }
    let (status, body) = get_json(&router, "/api/repository/packfiles").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "total": 3,
            "items": [
                format!("04{}", "00".repeat(31)),
                format!("05{}", "00".repeat(31)),
                format!("06{}", "00".repeat(31)),
            ]
        })
    );
}

#[tokio::test]
async fn packfile_bytes_and_ranges() {
    let (backend, state) = plain_app();
    let name = checksum_first_byte(0x04);
    backend
        .put_blob(ResourceKind::Packfile, &name, b"0123456789")
        .unwrap();
    let router = router_for(state);
    let base = format!("/api/repository/packfile/{}", name.to_hex());

    let (status, bytes) = get_response(&router, &base).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"0123456789");

    let (status, bytes) = get_response(&router, &format!("{base}?offset=2&length=3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"234");

    // Length without offset is a bad request, as is the converse.
    let (status, _) = get_json(&router, &format!("{base}?length=1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get_json(&router, &format!("{base}?offset=1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(&router, "/api/repository/packfile/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(
        &router,
        &format!("/api/repository/packfile/{}", "0b".repeat(32)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn snapshot_header_endpoint() {
    let (_, state) = plain_app();
    let header = publish_fixture_snapshot(&state);
    let router = router_for(state);

    let (status, body) = get_json(
        &router,
        &format!("/api/snapshot/{}", header.identifier.to_hex()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["identifier"], header.identifier.to_hex());

    let (status, _) = get_json(&router, "/api/snapshot/xyz").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) =
        get_json(&router, &format!("/api/snapshot/{}", "0c".repeat(32))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// A real snapshot over a temp tree for the VFS endpoints.
async fn vfs_fixture() -> (axum::Router, String) {
    let source = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(source.path().join("docs")).unwrap();
    std::fs::write(source.path().join("readme.txt"), b"hello cairn\n").unwrap();
    std::fs::write(source.path().join("docs/guide.txt"), b"guide contents").unwrap();

    let backend = std::sync::Arc::new(cairn_core::backend::memory::MemoryBackend::new());
    let shared: std::sync::Arc<dyn cairn_core::backend::StorageBackend> = backend;
    let repo = Repository::create(Box::new(shared), RepositoryConfig::new(), None).unwrap();

    let importer = FsImporter::new(source.path()).unwrap();
    let (header, repo) = tokio::task::spawn_blocking(move || {
        let _keep_alive = source;
        let header = repo.new_snapshot().commit(&importer).unwrap();
        (header, repo)
    })
    .await
    .unwrap();

    (router_for(AppState::new(repo)), header.identifier.to_hex())
}

#[tokio::test]
async fn vfs_browse_and_children() {
    let (router, id) = vfs_fixture().await;

    let (status, body) = get_json(&router, &format!("/api/snapshot/{id}/vfs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/");
    assert_eq!(body["children"].as_array().unwrap().len(), 2);

    let (status, body) = get_json(&router, &format!("/api/snapshot/{id}/vfs/readme.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "readme.txt");
    assert_eq!(body["size"], 12);

    let (status, body) = get_json(&router, &format!("/api/snapshot/{id}/children")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    // Ascending name order: docs before readme.txt.
    assert_eq!(body["items"][0]["name"], "docs");

    let (status, body) =
        get_json(&router, &format!("/api/snapshot/{id}/children?sort=-Name")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["name"], "readme.txt");

    let (status, body) =
        get_json(&router, &format!("/api/snapshot/{id}/children?limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (status, _) =
        get_json(&router, &format!("/api/snapshot/{id}/children?sort=abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // children of a file is a bad request.
    let (status, _) = get_json(
        &router,
        &format!("/api/snapshot/{id}/children/readme.txt"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(&router, &format!("/api/snapshot/{id}/vfs/absent")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn vfs_search_and_reader() {
    let (router, id) = vfs_fixture().await;

    let (status, body) = get_json(&router, &format!("/api/snapshot/{id}/search?q=guide")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["path"], "/docs/guide.txt");

    let (status, body) = get_json(&router, &format!("/api/snapshot/{id}/search?q=zzz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "items": [], "total": 0 }));

    let (status, bytes) =
        get_response(&router, &format!("/api/snapshot/{id}/reader/readme.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"hello cairn\n");

    let (status, _) = get_json(&router, &format!("/api/snapshot/{id}/reader/docs")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn vfs_errors_listing_is_empty_for_clean_tree() {
    let (router, id) = vfs_fixture().await;
    let (status, body) = get_json(&router, &format!("/api/snapshot/{id}/vfs_errors")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "items": [], "total": 0 }));
}
