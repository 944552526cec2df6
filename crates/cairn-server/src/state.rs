use std::sync::Arc;

use cairn_core::repository::Repository;

/// Shared handler state: one opened repository for the process lifetime.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
}

impl AppState {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo: Arc::new(repo),
        }
    }
}
