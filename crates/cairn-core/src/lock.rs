use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::backend::StorageBackend;
use crate::error::{CairnError, Result};
use crate::resource::{Checksum, ResourceKind};

/// Locks older than this are considered abandoned and ignored.
pub const DEFAULT_LOCK_TTL_SECS: i64 = 6 * 60 * 60;

/// Timestamp-bearing payload stored in the lock blob (unencrypted JSON, so
/// `break-lock` works without a passphrase).
#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    hostname: String,
    pid: u32,
    time: DateTime<Utc>,
}

/// Handle to an acquired advisory lock.
#[derive(Debug)]
pub struct LockGuard {
    name: Checksum,
}

impl LockGuard {
    pub fn name(&self) -> &Checksum {
        &self.name
    }
}

/// The lock blob name is derived from the repository id so concurrent
/// writers contend on a single name.
pub fn lock_name(repository_id: &Uuid) -> Checksum {
    let mut hasher = Sha256::new();
    hasher.update(b"cairn-lock:");
    hasher.update(repository_id.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Checksum(out)
}

/// Acquire the advisory lock. A fresh existing lock is an error; a stale
/// one (older than `ttl_secs`) is silently replaced.
pub fn acquire(
    backend: &dyn StorageBackend,
    repository_id: &Uuid,
    ttl_secs: i64,
) -> Result<LockGuard> {
    let name = lock_name(repository_id);

    if let Some(existing) = backend.get_blob(ResourceKind::Lock, &name)? {
        if let Ok(payload) = serde_json::from_slice::<LockPayload>(&existing) {
            let age = Utc::now().signed_duration_since(payload.time);
            if age < Duration::seconds(ttl_secs) {
                return Err(CairnError::Locked(format!(
                    "{}@{} since {}",
                    payload.pid, payload.hostname, payload.time
                )));
            }
            tracing::warn!(
                holder = %payload.hostname,
                pid = payload.pid,
                "ignoring stale repository lock"
            );
        }
    }

    let payload = LockPayload {
        hostname: crate::hostname(),
        pid: std::process::id(),
        time: Utc::now(),
    };
    let data = serde_json::to_vec(&payload)
        .map_err(|e| CairnError::Other(format!("lock serialize: {e}")))?;
    backend.put_blob(ResourceKind::Lock, &name, &data)?;

    Ok(LockGuard { name })
}

/// Release an advisory lock.
pub fn release(backend: &dyn StorageBackend, guard: LockGuard) -> Result<()> {
    backend.delete_blob(ResourceKind::Lock, &guard.name)
}

/// Forcibly remove the repository lock regardless of freshness. Recovery
/// path for locks left behind by killed processes. Returns whether a lock
/// existed.
pub fn break_lock(backend: &dyn StorageBackend, repository_id: &Uuid) -> Result<bool> {
    let name = lock_name(repository_id);
    let existed = backend.get_blob(ResourceKind::Lock, &name)?.is_some();
    backend.delete_blob(ResourceKind::Lock, &name)?;
    Ok(existed)
}
