//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that survives process restarts and can be shared between
//! processes on one host.
//!
//! # Value format
//!
//! `[expires_at: 8 bytes, unix millis, little endian][payload]`
//!
//! Frames whose expiry has passed read as misses and are removed.

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use ::async_trait::async_trait;
use atrium_core::CacheError;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::traits::{CacheBackend, CacheResult, CacheStats};

const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

fn frame(value: &[u8], expires_at_millis: i64) -> Vec<u8> {
    let mut full = Vec::with_capacity(HEADER_LEN + value.len());
    full.extend_from_slice(&expires_at_millis.to_le_bytes());
    full.extend_from_slice(value);
    full
}

/// Split a stored frame into expiry and payload. Short frames yield `None`.
fn unframe(bytes: &[u8]) -> Option<(i64, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    let header: [u8; HEADER_LEN] = header.try_into().ok()?;
    Some((i64::from_le_bytes(header), payload))
}

/// LMDB-backed cache.
///
/// # Example
///
/// ```ignore
/// use atrium_storage::cache::LmdbCacheBackend;
///
/// let backend = LmdbCacheBackend::new("/var/cache/atrium", 100)?;
/// backend.set("workspace:...", bytes, Duration::from_secs(300)).await?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Global statistics.
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // its files are not modified outside of LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        let backend = Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        };
        let entry_count = backend.count_entries()?;
        if let Ok(mut stats) = backend.stats.write() {
            stats.entry_count = entry_count;
        }
        Ok(backend)
    }

    fn count_entries(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.db.len(&rtxn).map_err(txn_error)
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    fn refresh_entry_count(&self) {
        if let Ok(count) = self.count_entries() {
            if let Ok(mut stats) = self.stats.write() {
                stats.entry_count = count;
            }
        }
    }

    /// Iterate over keys matching a prefix and collect them.
    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let iter = self.db.prefix_iter(&rtxn, prefix).map_err(txn_error)?;

        Ok(iter.flatten().map(|(key, _)| key.to_vec()).collect())
    }

    fn remove_expired(&self, key: &[u8]) -> Result<(), LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let now = Utc::now().timestamp_millis();
        // Re-check under the write transaction; a fresh value may have landed.
        let still_expired = match self.db.get(&wtxn, key).map_err(txn_error)? {
            Some(bytes) => unframe(bytes).map_or(true, |(expires_at, _)| expires_at <= now),
            None => false,
        };
        if still_expired {
            self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;

        if still_expired {
            if let Ok(mut stats) = self.stats.write() {
                stats.evictions += 1;
                stats.entry_count = stats.entry_count.saturating_sub(1);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Utc::now().timestamp_millis();
        let lookup = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            match self.db.get(&rtxn, key.as_bytes()) {
                Ok(Some(bytes)) => match unframe(bytes) {
                    Some((expires_at, payload)) if expires_at > now => Some(Some(payload.to_vec())),
                    _ => Some(None),
                },
                Ok(None) => None,
                Err(e) => {
                    self.record_miss();
                    return Err(txn_error(e).into());
                }
            }
        };

        match lookup {
            Some(Some(payload)) => {
                self.record_hit();
                Ok(Some(payload))
            }
            Some(None) => {
                self.record_miss();
                self.remove_expired(key.as_bytes())?;
                Ok(None)
            }
            None => {
                self.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_millis);
        let full_bytes = frame(&value, expires_at);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let is_new = self
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(txn_error)?
            .is_none();
        self.db
            .put(&mut wtxn, key.as_bytes(), &full_bytes)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if let Ok(mut stats) = self.stats.write() {
            if is_new {
                stats.entry_count += 1;
            }
            stats.memory_bytes += full_bytes.len() as u64;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if deleted {
            if let Ok(mut stats) = self.stats.write() {
                stats.entry_count = stats.entry_count.saturating_sub(1);
            }
        }
        Ok(deleted)
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let keys_to_delete = self.collect_keys_with_prefix(prefix.as_bytes())?;

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in &keys_to_delete {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        self.refresh_entry_count();
        Ok(deleted)
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.clear(&mut wtxn).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = 0;
            stats.memory_bytes = 0;
        }
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_secs(300);

    fn create_test_backend() -> (LmdbCacheBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbCacheBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    #[test]
    fn test_frame_round_trip() {
        let framed = frame(b"payload", 42);
        assert_eq!(unframe(&framed), Some((42, &b"payload"[..])));
        assert_eq!(unframe(b"short"), None);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (backend, _temp_dir) = create_test_backend();
        backend
            .set("workspace:a", b"{\"v\":1}".to_vec(), TTL)
            .await
            .expect("set should succeed");

        let cached = backend.get("workspace:a").await.expect("get should succeed");
        assert_eq!(cached, Some(b"{\"v\":1}".to_vec()));

        let stats = backend.stats().await.expect("stats should succeed");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (backend, _temp_dir) = create_test_backend();
        let cached = backend.get("project:none").await.expect("get should succeed");
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_expired_frame_is_removed() {
        let (backend, _temp_dir) = create_test_backend();
        backend
            .set("project:p", b"1".to_vec(), Duration::ZERO)
            .await
            .expect("set should succeed");
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(backend.get("project:p").await.expect("get should succeed").is_none());
        assert!(!backend.delete("project:p").await.expect("delete should succeed"));
        let stats = backend.stats().await.expect("stats should succeed");
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let (backend, _temp_dir) = create_test_backend();
        backend
            .set("connection:c", vec![1], TTL)
            .await
            .expect("set should succeed");
        assert!(backend.delete("connection:c").await.expect("delete should succeed"));
        assert!(backend.get("connection:c").await.expect("get should succeed").is_none());
    }

    #[tokio::test]
    async fn test_delete_prefix_and_clear() {
        let (backend, _temp_dir) = create_test_backend();
        for key in ["workspace:a", "workspace:children:a", "project:b", "user:workspaces:u"] {
            backend
                .set(key, vec![0], TTL)
                .await
                .expect("set should succeed");
        }
        let deleted = backend
            .delete_prefix("workspace:")
            .await
            .expect("delete_prefix should succeed");
        assert_eq!(deleted, 2);
        assert_eq!(backend.stats().await.expect("stats").entry_count, 2);

        backend.clear().await.expect("clear should succeed");
        assert_eq!(backend.stats().await.expect("stats").entry_count, 0);
    }

    #[tokio::test]
    async fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let backend = LmdbCacheBackend::new(temp_dir.path(), 10).expect("open");
            backend.set("workspace:a", vec![7], TTL).await.expect("set");
        }
        let backend = LmdbCacheBackend::new(temp_dir.path(), 10).expect("reopen");
        assert_eq!(backend.stats().await.expect("stats").entry_count, 1);
        assert_eq!(backend.get("workspace:a").await.expect("get"), Some(vec![7]));
    }
}
