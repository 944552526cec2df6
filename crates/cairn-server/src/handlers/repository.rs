use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use cairn_core::resource::Checksum;
use cairn_core::snapshot::SnapshotHandle;

use crate::error::ApiError;
use crate::state::AppState;

use super::{blocking, paginate, parse_pagination, parse_sort, ListQuery};

/// `GET /api/repository/configuration`
///
/// The stored configuration minus key-derivation material: KDF parameters
/// and the canary never leave the repository.
pub async fn configuration(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let mut config = state.repo.configuration().clone();
    if let Some(encryption) = config.encryption.as_mut() {
        encryption.kdf_params = None;
        encryption.canary = None;
    }
    Ok(Json(config))
}

/// `GET /api/repository/snapshots?offset=&limit=&sort=`
pub async fn snapshots(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let descending = parse_sort(&query)?;
    let pagination = parse_pagination(&query)?;

    let headers = blocking(move || {
        let mut headers = Vec::new();
        for id in state.repo.list_snapshots() {
            let handle = SnapshotHandle::load(&state.repo, &id)?;
            headers.push(handle.header);
        }
        Ok(headers)
    })
    .await?;

    let mut headers = headers;
    headers.sort_by(|a, b| {
        (a.name.as_str(), a.identifier).cmp(&(b.name.as_str(), b.identifier))
    });
    if descending {
        headers.reverse();
    }

    let (total, page) = paginate(headers, &pagination);
    Ok(Json(json!({ "total": total, "items": page })))
}

/// `GET /api/repository/states`
pub async fn states(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let names = blocking(move || Ok(state.repo.get_states()?)).await?;
    let items: Vec<String> = names.iter().map(Checksum::to_hex).collect();
    Ok(Json(json!({ "total": items.len(), "items": items })))
}

/// `GET /api/repository/state/{hex}` — raw decoded state bytes.
pub async fn state(
    State(state): State<AppState>,
    Path(state_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let checksum =
        Checksum::from_hex(&state_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let bytes = blocking(move || Ok(state.repo.get_state(&checksum)?)).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}

/// `GET /api/repository/packfiles`
pub async fn packfiles(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let names = blocking(move || Ok(state.repo.list_packfiles()?)).await?;
    let items: Vec<String> = names.iter().map(Checksum::to_hex).collect();
    Ok(Json(json!({ "total": items.len(), "items": items })))
}

/// `GET /api/repository/packfile/{hex}?offset=&length=` — raw packfile
/// bytes, or a byte range when both `offset` and `length` are present.
pub async fn packfile(
    State(state): State<AppState>,
    Path(packfile_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let checksum =
        Checksum::from_hex(&packfile_id).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let range = match (&query.offset, &query.length) {
        (None, None) => None,
        (Some(offset), Some(length)) => {
            let offset = offset.parse::<u64>().map_err(|_| {
                ApiError::invalid_param("offset", format!("invalid offset: {offset}"))
            })?;
            let length = length.parse::<u64>().map_err(|_| {
                ApiError::invalid_param("length", format!("invalid length: {length}"))
            })?;
            Some((offset, length))
        }
        (Some(_), None) => {
            return Err(ApiError::bad_request("offset requires length"));
        }
        (None, Some(_)) => {
            return Err(ApiError::bad_request("length requires offset"));
        }
    };

    let bytes = blocking(move || match range {
        None => Ok(state.repo.get_packfile(&checksum)?),
        Some((offset, length)) => Ok(state.repo.get_packfile_range(&checksum, offset, length)?),
    })
    .await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct RangeQuery {
    pub offset: Option<String>,
    pub length: Option<String>,
}
