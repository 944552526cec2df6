use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CairnError, Result};

/// Cooperative cancellation for long operations (commit, restore, verify).
/// Cloned freely across threads; a single `cancel()` is observed by all.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Error out at the next suspension point once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CairnError::Cancelled)
        } else {
            Ok(())
        }
    }
}
