pub mod repository;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod test_helpers;
#[cfg(test)]
mod tests;

use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/repository/configuration",
            get(repository::configuration),
        )
        .route("/api/repository/snapshots", get(repository::snapshots))
        .route("/api/repository/states", get(repository::states))
        .route("/api/repository/state/{state}", get(repository::state))
        .route("/api/repository/packfiles", get(repository::packfiles))
        .route(
            "/api/repository/packfile/{packfile}",
            get(repository::packfile),
        )
        .route("/api/snapshot/{snapshot}", get(snapshot::header))
        .route("/api/snapshot/{snapshot}/vfs", get(snapshot::vfs_root))
        .route("/api/snapshot/{snapshot}/vfs/{*path}", get(snapshot::vfs))
        .route(
            "/api/snapshot/{snapshot}/children",
            get(snapshot::children_root),
        )
        .route(
            "/api/snapshot/{snapshot}/children/{*path}",
            get(snapshot::children),
        )
        .route(
            "/api/snapshot/{snapshot}/vfs_errors",
            get(snapshot::vfs_errors_root),
        )
        .route(
            "/api/snapshot/{snapshot}/vfs_errors/{*path}",
            get(snapshot::vfs_errors),
        )
        .route("/api/snapshot/{snapshot}/search", get(snapshot::search_root))
        .route(
            "/api/snapshot/{snapshot}/search/{*path}",
            get(snapshot::search),
        )
        .route("/api/snapshot/{snapshot}/reader/{*path}", get(snapshot::reader))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Common list-endpoint query string. Values arrive as raw strings so
/// malformed input surfaces as a structured `invalid_params` body instead
/// of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    pub offset: Option<String>,
    pub limit: Option<String>,
    pub sort: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Pagination {
    pub offset: usize,
    pub limit: Option<usize>,
}

pub(crate) fn parse_pagination(query: &ListQuery) -> Result<Pagination, ApiError> {
    let offset = match &query.offset {
        None => 0,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ApiError::invalid_param("offset", format!("invalid offset: {raw}")))?,
    };
    let limit = match &query.limit {
        None => None,
        Some(raw) => Some(
            raw.parse::<usize>()
                .map_err(|_| ApiError::invalid_param("limit", format!("invalid limit: {raw}")))?,
        ),
    };
    Ok(Pagination { offset, limit })
}

/// Recognized sort keys: `Name` and `-Name`. Returns whether the order is
/// descending.
pub(crate) fn parse_sort(query: &ListQuery) -> Result<bool, ApiError> {
    match query.sort.as_deref().unwrap_or("Name") {
        "Name" => Ok(false),
        "-Name" => Ok(true),
        other => Err(ApiError::invalid_param(
            "sort",
            format!("invalid sort key: {other}"),
        )),
    }
}

/// Apply offset/limit. `total` is always the pre-pagination count.
pub(crate) fn paginate<T>(items: Vec<T>, pagination: &Pagination) -> (usize, Vec<T>) {
    let total = items.len();
    let page: Vec<T> = items
        .into_iter()
        .skip(pagination.offset)
        .take(pagination.limit.unwrap_or(usize::MAX))
        .collect();
    (total, page)
}

/// Run a blocking repository operation off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
}
