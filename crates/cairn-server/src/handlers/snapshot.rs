use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use cairn_core::resource::Checksum;
use cairn_core::snapshot::SnapshotHandle;
use cairn_core::vfs::VfsEntry;

use crate::error::ApiError;
use crate::state::AppState;

use super::{blocking, paginate, parse_pagination, parse_sort, ListQuery};

fn parse_snapshot_id(raw: &str) -> Result<Checksum, ApiError> {
    Checksum::from_hex(raw).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn vfs_path(path: Option<String>) -> String {
    match path {
        None => "/".to_string(),
        Some(path) if path.is_empty() => "/".to_string(),
        Some(path) => format!("/{}", path.trim_start_matches('/')),
    }
}

/// `GET /api/snapshot/{hex}` — the snapshot header.
pub async fn header(
    State(state): State<AppState>,
    Path(snapshot_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_snapshot_id(&snapshot_id)?;
    let header =
        blocking(move || Ok(SnapshotHandle::load(&state.repo, &id)?.header)).await?;
    Ok(Json(header))
}

/// `GET /api/snapshot/{hex}/vfs/{path}` — directory or file entry.
pub async fn vfs(
    State(state): State<AppState>,
    Path((snapshot_id, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    browse(state, snapshot_id, Some(path)).await
}

pub async fn vfs_root(
    State(state): State<AppState>,
    Path(snapshot_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    browse(state, snapshot_id, None).await
}

async fn browse(
    state: AppState,
    snapshot_id: String,
    path: Option<String>,
) -> Result<Json<VfsEntry>, ApiError> {
    let id = parse_snapshot_id(&snapshot_id)?;
    let path = vfs_path(path);
    let entry = blocking(move || {
        let handle = SnapshotHandle::load(&state.repo, &id)?;
        Ok(handle.stat(&path)?)
    })
    .await?;
    Ok(Json(entry))
}

/// `GET /api/snapshot/{hex}/children/{path}?offset=&limit=&sort=`
pub async fn children(
    State(state): State<AppState>,
    Path((snapshot_id, path)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    list_children(state, snapshot_id, Some(path), query).await
}

pub async fn children_root(
    State(state): State<AppState>,
    Path(snapshot_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    list_children(state, snapshot_id, None, query).await
}

async fn list_children(
    state: AppState,
    snapshot_id: String,
    path: Option<String>,
    query: ListQuery,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_snapshot_id(&snapshot_id)?;
    let descending = parse_sort(&query)?;
    let pagination = parse_pagination(&query)?;
    let path = vfs_path(path);

    let entries = blocking(move || {
        let handle = SnapshotHandle::load(&state.repo, &id)?;
        let dir = match handle.stat(&path)? {
            VfsEntry::Dir(dir) => dir,
            _ => return Err(ApiError::bad_request(format!("not a directory: {path}"))),
        };
        let mut entries = Vec::with_capacity(dir.children.len());
        for child in &dir.children {
            entries.push(handle.get_entry(&child.checksum)?);
        }
        Ok(entries)
    })
    .await?;

    // Children are stored sorted by name ascending.
    let mut entries = entries;
    if descending {
        entries.reverse();
    }
    let (total, page) = paginate(entries, &pagination);
    Ok(Json(json!({ "total": total, "items": page })))
}

/// `GET /api/snapshot/{hex}/vfs_errors/{path}?offset=&limit=&sort=` —
/// errors recorded beneath a directory while the snapshot was taken.
pub async fn vfs_errors(
    State(state): State<AppState>,
    Path((snapshot_id, path)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    list_errors(state, snapshot_id, Some(path), query).await
}

pub async fn vfs_errors_root(
    State(state): State<AppState>,
    Path(snapshot_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    list_errors(state, snapshot_id, None, query).await
}

async fn list_errors(
    state: AppState,
    snapshot_id: String,
    path: Option<String>,
    query: ListQuery,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_snapshot_id(&snapshot_id)?;
    let descending = parse_sort(&query)?;
    let pagination = parse_pagination(&query)?;
    let path = vfs_path(path);

    let mut errors = blocking(move || {
        let handle = SnapshotHandle::load(&state.repo, &id)?;
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let errors: Vec<_> = handle
            .errors()?
            .into_iter()
            .filter(|e| e.path == path || e.path.starts_with(&prefix))
            .collect();
        Ok(errors)
    })
    .await?;

    errors.sort_by(|a, b| a.path.cmp(&b.path));
    if descending {
        errors.reverse();
    }
    let (total, page) = paginate(errors, &pagination);
    Ok(Json(json!({ "total": total, "items": page })))
}

/// `GET /api/snapshot/{hex}/search/{path}?q=&offset=&limit=` — substring
/// search over entry paths.
pub async fn search(
    State(state): State<AppState>,
    Path((snapshot_id, path)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    run_search(state, snapshot_id, Some(path), query).await
}

pub async fn search_root(
    State(state): State<AppState>,
    Path(snapshot_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    run_search(state, snapshot_id, None, query).await
}

async fn run_search(
    state: AppState,
    snapshot_id: String,
    path: Option<String>,
    query: ListQuery,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_snapshot_id(&snapshot_id)?;
    let pagination = parse_pagination(&query)?;
    let path = vfs_path(path);
    let needle = query.q.clone().unwrap_or_default();

    let results = blocking(move || {
        let handle = SnapshotHandle::load(&state.repo, &id)?;
        Ok(handle.search(&path, &needle)?)
    })
    .await?;

    let (total, page) = paginate(results, &pagination);
    Ok(Json(json!({ "total": total, "items": page })))
}

/// `GET /api/snapshot/{hex}/reader/{path}` — a file's reassembled bytes.
pub async fn reader(
    State(state): State<AppState>,
    Path((snapshot_id, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_snapshot_id(&snapshot_id)?;
    let path = vfs_path(Some(path));

    let (content_type, bytes) = blocking(move || {
        let handle = SnapshotHandle::load(&state.repo, &id)?;
        let content_type = match handle.stat(&path)? {
            VfsEntry::File(file) if file.symlink_target.is_none() => file.content_type,
            _ => {
                return Err(ApiError::bad_request(format!(
                    "not a regular file: {path}"
                )))
            }
        };
        let bytes = handle.read_file(&path)?;
        Ok((content_type, bytes))
    })
    .await?;

    let content_type = if content_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        content_type
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}
