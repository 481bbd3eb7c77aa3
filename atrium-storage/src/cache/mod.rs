//! Cache layer for workspace hierarchy reads.
//!
//! Reads are cache-aside: services consult [`ResourceCache`] first, fall back
//! to the store on a miss and populate the cache afterwards. Writes go to the
//! store and then invalidate the affected keys.
//!
//! # Staleness
//!
//! A read that started before a concurrent write could otherwise put the old
//! value back after the writer invalidated it. Callers take a [`Watermark`]
//! before reading the store and hand it to the `put_*` call; the
//! [`InvalidationJournal`] rejects values whose key was invalidated after that
//! mark, both when they are written and when they are read back.
//!
//! The journal is process-local. Deployments sharing one cache between
//! processes bound staleness by the TTL alone.
//!
//! # Example
//!
//! ```ignore
//! let mark = cache.watermark();
//! let workspace = store.workspace_get(id).await?;
//! if let Some(ws) = &workspace {
//!     cache.put_workspace(ws, mark).await;
//! }
//! ```

pub mod journal;
pub mod keys;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod resource_cache;
pub mod traits;

pub use journal::{InvalidationJournal, Watermark};
pub use keys::{CacheKey, KEY_PREFIXES};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::MemoryCacheBackend;
pub use resource_cache::ResourceCache;
pub use traits::{CacheBackend, CacheResult, CacheStats};
