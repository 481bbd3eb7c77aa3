//! Typed read-through cache over a [`CacheBackend`].
//!
//! Values are stored as JSON envelopes `{mark, value}` where `mark` is the
//! journal watermark the caller took *before* reading the store. A hit whose
//! key was invalidated after its mark is discarded and reported as a miss.
//!
//! Nothing in here fails: backend errors and undecodable blobs are logged and
//! treated as misses, write and invalidation errors are logged and dropped.
//! The store stays the source of truth.

use super::journal::{InvalidationJournal, Watermark};
use super::keys::{CacheKey, KEY_PREFIXES};
use super::traits::{CacheBackend, CacheStats};
use atrium_core::{
    Connection, ConnectionId, Project, ProjectId, UserId, Workspace, WorkspaceId,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    mark: Watermark,
    value: T,
}

/// Cache-aside layer for workspaces, projects, connections and user indexes.
pub struct ResourceCache {
    backend: Arc<dyn CacheBackend>,
    journal: InvalidationJournal,
    ttl: Duration,
    /// Serializes read-modify-write of child indexes.
    index_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResourceCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            journal: InvalidationJournal::new(ttl.saturating_mul(2)),
            ttl,
            index_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Take before reading the store; pass to the matching `put_*`.
    pub fn watermark(&self) -> Watermark {
        self.journal.watermark()
    }

    // ========================================================================
    // WORKSPACES
    // ========================================================================

    pub async fn workspace(&self, id: WorkspaceId) -> Option<Workspace> {
        self.read(&CacheKey::Workspace(id)).await
    }

    pub async fn put_workspace(&self, workspace: &Workspace, mark: Watermark) {
        self.write(&CacheKey::Workspace(workspace.id), workspace, mark)
            .await;
    }

    pub async fn invalidate_workspace(&self, id: WorkspaceId) {
        self.invalidate(&CacheKey::Workspace(id)).await;
    }

    /// Drop the workspace entry, its child index and every key listed in it.
    pub async fn invalidate_workspace_cascade(&self, id: WorkspaceId) {
        let index_key = CacheKey::WorkspaceChildren(id);
        {
            let _guard = self.index_lock.lock().await;
            for child in self.read_index(&index_key).await {
                self.invalidate_raw(&child).await;
            }
            self.invalidate(&index_key).await;
        }
        self.invalidate(&CacheKey::Workspace(id)).await;
    }

    /// Pre-populate workspace entries. Returns how many were written.
    pub async fn warm_workspaces(&self, workspaces: &[Workspace]) -> usize {
        let mark = self.watermark();
        let mut written = 0;
        for workspace in workspaces.iter().filter(|ws| ws.is_active()) {
            if self
                .write(&CacheKey::Workspace(workspace.id), workspace, mark)
                .await
            {
                written += 1;
            }
        }
        debug!(count = written, "Warmed workspace cache");
        written
    }

    // ========================================================================
    // PROJECTS
    // ========================================================================

    pub async fn project(&self, id: ProjectId) -> Option<Project> {
        self.read(&CacheKey::Project(id)).await
    }

    pub async fn put_project(&self, project: &Project, mark: Watermark) {
        let key = CacheKey::Project(project.id);
        self.register_child(project.workspace_id, &key).await;
        self.write(&key, project, mark).await;
    }

    pub async fn invalidate_project(&self, id: ProjectId) {
        self.invalidate(&CacheKey::Project(id)).await;
    }

    // ========================================================================
    // CONNECTIONS
    // ========================================================================

    pub async fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.read(&CacheKey::Connection(id)).await
    }

    /// Cache a connection under the workspace that owns its project.
    pub async fn put_connection(
        &self,
        connection: &Connection,
        workspace_id: WorkspaceId,
        mark: Watermark,
    ) {
        let key = CacheKey::Connection(connection.id);
        self.register_child(workspace_id, &key).await;
        self.write(&key, connection, mark).await;
    }

    pub async fn invalidate_connection(&self, id: ConnectionId) {
        self.invalidate(&CacheKey::Connection(id)).await;
    }

    // ========================================================================
    // USER INDEX
    // ========================================================================

    pub async fn user_workspaces(&self, user_id: &UserId) -> Option<Vec<WorkspaceId>> {
        self.read(&CacheKey::UserWorkspaces(user_id.clone())).await
    }

    pub async fn put_user_workspaces(
        &self,
        user_id: &UserId,
        workspace_ids: &[WorkspaceId],
        mark: Watermark,
    ) {
        self.write(&CacheKey::UserWorkspaces(user_id.clone()), &workspace_ids, mark)
            .await;
    }

    pub async fn invalidate_user_index(&self, user_id: &UserId) {
        self.invalidate(&CacheKey::UserWorkspaces(user_id.clone()))
            .await;
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Drop every key this cache writes. Returns the number of entries removed.
    pub async fn clear_all(&self) -> u64 {
        let mut removed = 0;
        for prefix in KEY_PREFIXES {
            match self.backend.delete_prefix(prefix).await {
                Ok(count) => removed += count,
                Err(e) => warn!(prefix, error = %e, "Cache prefix delete failed"),
            }
        }
        removed
    }

    /// Lookup counters of this cache plus the backend's size counters.
    ///
    /// Hits and misses are counted after envelope checks, so a stale entry
    /// the backend served counts as a miss here.
    pub async fn stats(&self) -> CacheStats {
        let backend = self.backend.stats().await.unwrap_or_else(|e| {
            warn!(error = %e, "Cache stats unavailable");
            CacheStats::default()
        });
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..backend
        }
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let encoded = key.encode();
        let value = self.read_envelope::<T>(&encoded).await;
        let counter = if value.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    async fn read_envelope<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed");
                return None;
            }
        };
        let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key, error = %e, "Dropping undecodable cache entry");
                self.delete_quietly(key).await;
                return None;
            }
        };
        if self.journal.is_stale(key, envelope.mark) {
            debug!(key, "Dropping cache entry older than its last invalidation");
            self.delete_quietly(key).await;
            return None;
        }
        Some(envelope.value)
    }

    /// Returns true when the entry was written.
    async fn write<T: Serialize>(&self, key: &CacheKey, value: &T, mark: Watermark) -> bool {
        let encoded = key.encode();
        if self.journal.is_stale(&encoded, mark) {
            debug!(key = %encoded, "Skipping cache write older than its last invalidation");
            return false;
        }
        let bytes = match serde_json::to_vec(&Envelope { mark, value }) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %encoded, error = %e, "Cache serialization failed");
                return false;
            }
        };
        match self.backend.set(&encoded, bytes, self.ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %encoded, error = %e, "Cache write failed");
                false
            }
        }
    }

    async fn invalidate(&self, key: &CacheKey) {
        self.invalidate_raw(&key.encode()).await;
    }

    /// Journal first, then delete, so a concurrent put with an older mark is
    /// rejected on its next read.
    async fn invalidate_raw(&self, key: &str) {
        self.journal.record(key);
        if let Err(e) = self.backend.delete(key).await {
            warn!(key, error = %e, "Cache invalidation failed");
        }
    }

    async fn delete_quietly(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            warn!(key, error = %e, "Cache delete failed");
        }
    }

    async fn read_index(&self, index_key: &CacheKey) -> Vec<String> {
        let encoded = index_key.encode();
        match self.backend.get(&encoded).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(key = %encoded, error = %e, "Dropping undecodable child index");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(key = %encoded, error = %e, "Child index read failed");
                Vec::new()
            }
        }
    }

    /// Add `child` to the workspace's child index before the child is written.
    async fn register_child(&self, workspace_id: WorkspaceId, child: &CacheKey) {
        let index_key = CacheKey::WorkspaceChildren(workspace_id);
        let child = child.encode();

        let _guard = self.index_lock.lock().await;
        let mut children = self.read_index(&index_key).await;
        if !children.contains(&child) {
            children.push(child);
        }
        let encoded = index_key.encode();
        match serde_json::to_vec(&children) {
            Ok(bytes) => {
                if let Err(e) = self.backend.set(&encoded, bytes, self.ttl).await {
                    warn!(key = %encoded, error = %e, "Child index write failed");
                }
            }
            Err(e) => warn!(key = %encoded, error = %e, "Child index serialization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;
    use atrium_core::{EntityIdType, Settings, TenantId};

    const TTL: Duration = Duration::from_secs(300);

    fn cache() -> (ResourceCache, Arc<MemoryCacheBackend>) {
        let backend = Arc::new(MemoryCacheBackend::new());
        (ResourceCache::new(backend.clone(), TTL), backend)
    }

    fn workspace() -> Workspace {
        Workspace::new(
            TenantId::now_v7(),
            "Acme",
            "",
            Settings::new(),
            UserId::new("u"),
        )
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (cache, _) = cache();
        let ws = workspace();
        assert!(cache.workspace(ws.id).await.is_none());

        cache.put_workspace(&ws, cache.watermark()).await;
        assert_eq!(cache.workspace(ws.id).await, Some(ws));

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_put_with_mark_older_than_invalidation_is_ignored() {
        let (cache, _) = cache();
        let ws = workspace();
        let mark = cache.watermark();
        cache.invalidate_workspace(ws.id).await;
        cache.put_workspace(&ws, mark).await;
        assert!(cache.workspace(ws.id).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_envelope_is_dropped_on_read() {
        let (cache, backend) = cache();
        let ws = workspace();
        let mark = cache.watermark();
        cache.put_workspace(&ws, mark).await;

        // Invalidation whose delete raced ahead of the write below.
        cache.invalidate_workspace(ws.id).await;
        let bytes = serde_json::to_vec(&Envelope { mark, value: &ws }).expect("encode");
        backend
            .set(&CacheKey::Workspace(ws.id).encode(), bytes, TTL)
            .await
            .expect("set");

        assert!(cache.workspace(ws.id).await.is_none());
        assert_eq!(backend.stats().await.expect("stats").entry_count, 0);
    }

    #[tokio::test]
    async fn test_garbage_entry_is_a_miss() {
        let (cache, backend) = cache();
        let id = WorkspaceId::now_v7();
        backend
            .set(&CacheKey::Workspace(id).encode(), b"not json".to_vec(), TTL)
            .await
            .expect("set");
        assert!(cache.workspace(id).await.is_none());
    }

    #[tokio::test]
    async fn test_cascade_drops_children() {
        let (cache, backend) = cache();
        let ws = workspace();
        let project = Project::new(ws.id, "p", "", Settings::new(), UserId::new("u"));
        let conn = Connection::new(project.id, "app1", "Base", "", true);

        let mark = cache.watermark();
        cache.put_workspace(&ws, mark).await;
        cache.put_project(&project, mark).await;
        cache.put_connection(&conn, ws.id, mark).await;
        assert_eq!(backend.stats().await.expect("stats").entry_count, 4);

        cache.invalidate_workspace_cascade(ws.id).await;
        assert!(cache.workspace(ws.id).await.is_none());
        assert!(cache.project(project.id).await.is_none());
        assert!(cache.connection(conn.id).await.is_none());
        assert_eq!(backend.stats().await.expect("stats").entry_count, 0);
    }

    #[tokio::test]
    async fn test_user_index_round_trip() {
        let (cache, _) = cache();
        let user = UserId::new("alice");
        let ids = vec![WorkspaceId::now_v7(), WorkspaceId::now_v7()];

        cache.put_user_workspaces(&user, &ids, cache.watermark()).await;
        assert_eq!(cache.user_workspaces(&user).await, Some(ids));

        cache.invalidate_user_index(&user).await;
        assert!(cache.user_workspaces(&user).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_user_index_is_cached() {
        let (cache, _) = cache();
        let user = UserId::new("nobody");
        cache.put_user_workspaces(&user, &[], cache.watermark()).await;
        assert_eq!(cache.user_workspaces(&user).await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_warm_and_clear() {
        let (cache, _) = cache();
        let items = vec![workspace(), workspace()];
        assert_eq!(cache.warm_workspaces(&items).await, 2);
        assert!(cache.workspace(items[0].id).await.is_some());

        assert_eq!(cache.clear_all().await, 2);
        assert!(cache.workspace(items[1].id).await.is_none());
    }
}
