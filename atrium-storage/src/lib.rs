//! ATRIUM Storage - Store traits, in-memory store and cache layer
//!
//! Defines the persistence seams for the workspace hierarchy. The PostgreSQL
//! implementation lives in atrium-api.

pub mod cache;
pub mod memory;
mod query;
pub mod traits;

pub use cache::{
    CacheBackend, CacheKey, CacheStats, InvalidationJournal, LmdbCacheBackend, LmdbCacheError,
    MemoryCacheBackend, ResourceCache, Watermark,
};
pub use memory::InMemoryStore;
pub use traits::{
    AtriumStore, AuditLogStore, ConnectionStore, MembershipStore, ProjectStore, WorkspaceStore,
};

use std::sync::Arc;

/// Shared handles to every store, as trait objects.
///
/// Usually all five point at one backend; tests replace individual stores
/// (for example the audit store) with fault-injecting doubles.
#[derive(Clone)]
pub struct Stores {
    pub workspaces: Arc<dyn WorkspaceStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub members: Arc<dyn MembershipStore>,
    pub audit: Arc<dyn AuditLogStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn from_store<S: AtriumStore + 'static>(store: Arc<S>) -> Self {
        Self {
            workspaces: store.clone(),
            projects: store.clone(),
            connections: store.clone(),
            members: store.clone(),
            audit: store,
        }
    }

    /// Replace the audit store.
    pub fn with_audit_store(mut self, audit: Arc<dyn AuditLogStore>) -> Self {
        self.audit = audit;
        self
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
