use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use cairn_core::backend::memory::MemoryBackend;
use cairn_core::backend::StorageBackend;
use cairn_core::config::{EncryptionConfig, RepositoryConfig};
use cairn_core::repository::Repository;

use crate::state::AppState;

/// The pinned configuration fixture used by the API parity tests.
pub(crate) fn fixed_config() -> RepositoryConfig {
    let mut config = RepositoryConfig::new();
    config.timestamp = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    config.repository_id = Uuid::parse_str("00ff0000-0000-4000-a000-000000000001").unwrap();
    config.encryption = Some(EncryptionConfig {
        algorithm: "AES256-GCM".into(),
        key: String::new(),
        kdf_params: None,
        canary: None,
    });
    config
}

pub(crate) fn plain_app() -> (Arc<MemoryBackend>, AppState) {
    let backend = Arc::new(MemoryBackend::new());
    let shared: Arc<dyn StorageBackend> = backend.clone();
    let repo = Repository::create(Box::new(shared), RepositoryConfig::new(), None).unwrap();
    (backend, AppState::new(repo))
}

pub(crate) fn router_for(state: AppState) -> Router {
    super::router(state)
}

pub(crate) async fn get_response(router: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec();
    (status, bytes)
}

pub(crate) async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, bytes) = get_response(router, uri).await;
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("non-JSON response for {uri}: {e}"));
    (status, value)
}
