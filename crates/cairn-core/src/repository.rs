use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::cache::BlobCache;
use crate::codec::Codec;
use crate::compress::Compression;
use crate::config::{RepositoryConfig, RetryConfig};
use crate::crypto::aes_gcm::Aes256GcmEngine;
use crate::crypto::key::{derive_key, KdfParams};
use crate::crypto::{make_canary, verify_canary, PlaintextEngine};
use crate::error::{CairnError, Result};
use crate::hashing::Hasher;
use crate::resource::{Checksum, ResourceKind};
use crate::state::{BlobLocation, State};

/// Total byte budget for the decoded-blob cache.
const BLOB_CACHE_MAX_BYTES: usize = 32 * 1024 * 1024;

/// A handle to an opened repository. Shared across the HTTP layer, the
/// snapshot assembler and background workers; interior state sits behind a
/// reader/writer lock.
pub struct Repository {
    backend: Arc<dyn StorageBackend>,
    config: RepositoryConfig,
    codec: Arc<Codec>,
    aggregate: RwLock<State>,
    cache: Mutex<BlobCache>,
    retry: RetryConfig,
}

/// Frame codec for the configuration blob itself: never encrypted (it
/// carries the KDF parameters needed to derive the key) and never keyed.
fn config_codec() -> Codec {
    Codec::new(Hasher::Sha256, Compression::None, Arc::new(PlaintextEngine))
}

fn build_codec(config: &RepositoryConfig, secret: Option<&[u8; 32]>) -> Result<Codec> {
    let compression = Compression::from_config(config.compression.as_ref())?;
    match secret {
        Some(key) => Ok(Codec::new(
            Hasher::HmacSha256(*key),
            compression,
            Arc::new(Aes256GcmEngine::new(key)),
        )),
        None => Ok(Codec::new(
            Hasher::Sha256,
            compression,
            Arc::new(PlaintextEngine),
        )),
    }
}

impl Repository {
    /// Initialize a new repository: derive the key material if encryption is
    /// requested, arm the canary, and persist the configuration.
    pub fn create(
        backend: Box<dyn StorageBackend>,
        mut config: RepositoryConfig,
        passphrase: Option<&str>,
    ) -> Result<Repository> {
        config.validate()?;
        let backend: Arc<dyn StorageBackend> = Arc::from(backend);

        let secret = if let Some(encryption) = config.encryption.as_mut() {
            let passphrase = passphrase.ok_or_else(|| {
                CairnError::Config("passphrase required for encrypted repository".into())
            })?;
            let kdf = KdfParams::generate();
            let key = derive_key(passphrase, &kdf)?;
            let engine = Aes256GcmEngine::new(&key);
            encryption.kdf_params = Some(kdf);
            encryption.canary = Some(make_canary(&engine)?);
            Some(*key)
        } else {
            None
        };

        let codec = build_codec(&config, secret.as_ref())?;
        let framed_config =
            config_codec().encode(ResourceKind::Config, &config.serialize()?)?;
        backend.create(&framed_config)?;

        debug!(repository_id = %config.repository_id, "created repository");
        Ok(Repository {
            backend,
            config,
            codec: Arc::new(codec),
            aggregate: RwLock::new(State::new()),
            cache: Mutex::new(BlobCache::new(BLOB_CACHE_MAX_BYTES)),
            retry: RetryConfig::default(),
        })
    }

    /// Open an existing repository. With encryption enabled the canary is
    /// checked before any data is touched, so a wrong passphrase surfaces
    /// as `wrong_key` immediately.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        passphrase: Option<&str>,
    ) -> Result<Repository> {
        let backend: Arc<dyn StorageBackend> = Arc::from(backend);
        let framed_config = backend.open()?;
        let config_bytes = config_codec().decode_expect(ResourceKind::Config, &framed_config)?;
        let config = RepositoryConfig::parse(&config_bytes)?;

        let secret = if let Some(encryption) = &config.encryption {
            let passphrase = passphrase.ok_or_else(|| {
                CairnError::Config("passphrase required for encrypted repository".into())
            })?;
            let kdf = encryption.kdf_params.as_ref().ok_or_else(|| {
                CairnError::Corruption("encrypted repository without KDF parameters".into())
            })?;
            let canary = encryption.canary.as_ref().ok_or_else(|| {
                CairnError::Corruption("encrypted repository without canary".into())
            })?;
            let key = derive_key(passphrase, kdf)?;
            verify_canary(&Aes256GcmEngine::new(&key), canary)?;
            Some(*key)
        } else {
            None
        };

        let codec = build_codec(&config, secret.as_ref())?;
        let repo = Repository {
            backend,
            config,
            codec: Arc::new(codec),
            aggregate: RwLock::new(State::new()),
            cache: Mutex::new(BlobCache::new(BLOB_CACHE_MAX_BYTES)),
            retry: RetryConfig::default(),
        };
        repo.refresh_aggregate()?;
        Ok(repo)
    }

    pub fn close(self) -> Result<()> {
        self.backend.close()
    }

    pub fn configuration(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn codec(&self) -> &Arc<Codec> {
        &self.codec
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn set_retry_config(&mut self, retry: RetryConfig) {
        self.retry = retry;
    }

    /// Retry transient backend failures with exponential backoff + jitter.
    pub(crate) fn with_retry<T>(&self, op_name: &str, f: impl Fn() -> Result<T>) -> Result<T> {
        let mut delay_ms = self.retry.retry_delay_ms;
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        "{op_name}: transient error (attempt {attempt}/{}), retrying: {e}",
                        self.retry.max_retries
                    );
                    let jitter = rand::random::<u64>() % delay_ms.max(1);
                    std::thread::sleep(Duration::from_millis(delay_ms + jitter));
                    delay_ms = (delay_ms * 2).min(self.retry.retry_max_delay_ms);
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ----- aggregate state -----

    /// Rebuild the aggregate state: union of every published state plus the
    /// transitive closure of their `extends`, deduplicated.
    pub fn refresh_aggregate(&self) -> Result<()> {
        let mut aggregate = State::new();
        let mut visited: HashSet<Checksum> = HashSet::new();
        let mut queue = self
            .with_retry("list states", || {
                self.backend.list_blobs(ResourceKind::State)
            })?;

        while let Some(state_checksum) = queue.pop() {
            if !visited.insert(state_checksum) {
                continue;
            }
            let state = match self.load_state_parsed(&state_checksum) {
                Ok(state) => state,
                Err(CairnError::NotFound(_)) => {
                    // A superseded parent removed by maintenance; its
                    // contents were copied into the referencing state.
                    debug!(state = %state_checksum, "extends target absent, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            for parent in state.extends() {
                queue.push(*parent);
            }
            aggregate.merge(&state, Some(state_checksum));
        }

        *self.aggregate.write().unwrap() = aggregate;
        Ok(())
    }

    /// Resolve a blob through the aggregate state.
    pub fn lookup(&self, kind: ResourceKind, checksum: &Checksum) -> Option<BlobLocation> {
        self.aggregate.read().unwrap().lookup(kind, checksum)
    }

    /// Fold a freshly committed state into the aggregate without a full
    /// rebuild. Writers hold the lock only for the swap.
    pub(crate) fn absorb_state(&self, state: &State, state_checksum: Checksum) {
        self.aggregate
            .write()
            .unwrap()
            .merge(state, Some(state_checksum));
    }

    // ----- blob access -----

    /// Resolve, fetch, decode and verify one blob.
    pub fn get_blob(&self, kind: ResourceKind, checksum: &Checksum) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.lock().unwrap().get(checksum) {
            return Ok(cached);
        }

        let location = self.lookup(kind, checksum).ok_or_else(|| {
            CairnError::NotFound(format!("{kind} blob {checksum} not in any state"))
        })?;

        let raw = self.get_packfile_range_raw(
            &location.packfile,
            location.offset,
            location.length,
        )?;
        let plaintext = self
            .codec
            .decode_expect(kind, &raw)
            .map_err(|e| annotate(e, kind, checksum))?;
        // Snapshot headers are addressed by an assigned random id, not by
        // their content hash.
        if kind != ResourceKind::Snapshot && self.codec.checksum(&plaintext) != *checksum {
            return Err(CairnError::Corruption(format!(
                "{kind} blob {checksum} failed checksum verification"
            )));
        }

        self.cache.lock().unwrap().insert(*checksum, plaintext.clone());
        Ok(plaintext)
    }

    /// Raw packfile bytes (debugging and verification).
    pub fn get_packfile(&self, checksum: &Checksum) -> Result<Vec<u8>> {
        self.with_retry("get packfile", || {
            self.backend.get_blob(ResourceKind::Packfile, checksum)
        })?
        .ok_or_else(|| CairnError::NotFound(format!("packfile {checksum}")))
    }

    /// Raw byte range of a packfile.
    pub fn get_packfile_range(
        &self,
        checksum: &Checksum,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        self.with_retry("get packfile range", || {
            self.backend
                .get_blob_range(ResourceKind::Packfile, checksum, offset, length)
        })?
        .ok_or_else(|| CairnError::NotFound(format!("packfile {checksum}")))
    }

    fn get_packfile_range_raw(
        &self,
        checksum: &Checksum,
        offset: u64,
        length: u32,
    ) -> Result<Vec<u8>> {
        self.with_retry("get packfile range", || {
            self.backend
                .get_blob_range(ResourceKind::Packfile, checksum, offset, length as u64)
        })?
        .ok_or_else(|| CairnError::NotFound(format!("packfile {checksum}")))
    }

    /// Decode one blob addressed by `(packfile, offset, length)` directly,
    /// bypassing the state. Random-access path for the HTTP layer.
    pub fn get_packfile_blob(
        &self,
        packfile: &Checksum,
        offset: u64,
        length: u32,
    ) -> Result<Vec<u8>> {
        let raw = self.get_packfile_range_raw(packfile, offset, length)?;
        let (_, plaintext) = self.codec.decode(&raw)?;
        Ok(plaintext)
    }

    pub fn list_packfiles(&self) -> Result<Vec<Checksum>> {
        self.with_retry("list packfiles", || {
            self.backend.list_blobs(ResourceKind::Packfile)
        })
    }

    // ----- states -----

    pub fn get_states(&self) -> Result<Vec<Checksum>> {
        self.with_retry("list states", || {
            self.backend.list_blobs(ResourceKind::State)
        })
    }

    /// Raw decoded state bytes (the serialized state plaintext).
    pub fn get_state(&self, checksum: &Checksum) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.lock().unwrap().get(checksum) {
            return Ok(cached);
        }
        let framed = self
            .with_retry("get state", || {
                self.backend.get_blob(ResourceKind::State, checksum)
            })?
            .ok_or_else(|| CairnError::NotFound(format!("state {checksum}")))?;
        let plaintext = self
            .codec
            .decode_expect(ResourceKind::State, &framed)
            .map_err(|e| annotate(e, ResourceKind::State, checksum))?;
        if self.codec.checksum(&plaintext) != *checksum {
            return Err(CairnError::Corruption(format!(
                "state {checksum} failed checksum verification"
            )));
        }
        self.cache.lock().unwrap().insert(*checksum, plaintext.clone());
        Ok(plaintext)
    }

    pub(crate) fn load_state_parsed(&self, checksum: &Checksum) -> Result<State> {
        State::parse(&self.get_state(checksum)?)
    }

    /// Serialize and publish a state blob, then fold it into the aggregate.
    /// A snapshot is committed the moment this returns.
    pub fn publish_state(&self, state: &State) -> Result<Checksum> {
        let plaintext = state.serialize()?;
        let checksum = self.codec.checksum(&plaintext);
        let framed = self.codec.encode(ResourceKind::State, &plaintext)?;
        self.with_retry("put state", || {
            self.backend.put_blob(ResourceKind::State, &checksum, &framed)
        })?;
        self.absorb_state(state, checksum);
        debug!(state = %checksum, entries = state.len(), "published state");
        Ok(checksum)
    }

    // ----- snapshots -----

    /// All committed snapshot ids, sorted by id.
    pub fn list_snapshots(&self) -> Vec<Checksum> {
        let mut ids = self.aggregate.read().unwrap().snapshot_ids();
        ids.sort();
        ids
    }
}

fn annotate(e: CairnError, kind: ResourceKind, checksum: &Checksum) -> CairnError {
    match e {
        CairnError::Corruption(msg) => {
            CairnError::Corruption(format!("{kind} {checksum}: {msg}"))
        }
        other => other,
    }
}
