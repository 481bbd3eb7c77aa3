//! Cache backend trait and statistics.

use ::async_trait::async_trait;
use atrium_core::CacheError;
use std::time::Duration;

/// Result type for raw cache backend calls.
pub type CacheResult<T> = Result<T, CacheError>;

/// Byte-level key/value cache with per-entry expiry.
///
/// Backends store opaque blobs; typing, envelopes and staleness checks live in
/// [`ResourceCache`](super::ResourceCache). The trait is object safe so that a
/// backend can be chosen at startup and shared as `Arc<dyn CacheBackend>`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a live entry. Expired entries read as `None`.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a blob that expires after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Delete one entry. Returns true when something was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete every entry whose key starts with `prefix`. Returns the count.
    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Drop every entry.
    async fn clear(&self) -> CacheResult<()>;

    /// Get cache statistics.
    async fn stats(&self) -> CacheResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate payload size in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
