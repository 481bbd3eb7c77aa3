//! Service bundles over the in-memory store.

#![allow(dead_code)]

use std::sync::Arc;

use atrium_api::{AtriumMetrics, AuthContext, ServiceContext, Services};
use atrium_core::{AtriumConfig, CreateWorkspaceRequest, EntityIdType, TenantId, Workspace};
use atrium_storage::{AuditLogStore, CacheBackend, MemoryCacheBackend, Stores};
use atrium_test_utils::InMemoryStore;

pub struct Harness {
    pub services: Services,
    pub store: Arc<InMemoryStore>,
    pub metrics: AtriumMetrics,
}

fn metrics() -> AtriumMetrics {
    AtriumMetrics::unregistered().expect("metrics registry")
}

pub fn harness() -> Harness {
    harness_with(AtriumConfig::default(), None, Arc::new(MemoryCacheBackend::new()))
}

/// A bundle whose audit store is replaced by `audit`.
pub fn harness_with_audit(audit: Arc<dyn AuditLogStore>) -> Harness {
    harness_with(
        AtriumConfig::default(),
        Some(audit),
        Arc::new(MemoryCacheBackend::new()),
    )
}

pub fn harness_with(
    config: AtriumConfig,
    audit: Option<Arc<dyn AuditLogStore>>,
    cache: Arc<dyn CacheBackend>,
) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let mut stores = Stores::from_store(store.clone());
    if let Some(audit) = audit {
        stores = stores.with_audit_store(audit);
    }
    let metrics = metrics();
    let context = ServiceContext::new(stores, cache, config, metrics.clone());
    Harness {
        services: Services::new(context),
        store,
        metrics,
    }
}

/// A second process: its own context and cache journal over the same store
/// as `harness`, reading through `cache`.
pub fn replica(harness: &Harness, cache: Arc<dyn CacheBackend>) -> Services {
    let context = ServiceContext::new(
        Stores::from_store(harness.store.clone()),
        cache,
        AtriumConfig::default(),
        metrics(),
    );
    Services::new(context)
}

pub fn tenant() -> TenantId {
    TenantId::now_v7()
}

pub fn user(tenant_id: TenantId, name: &str) -> AuthContext {
    AuthContext::new(tenant_id, name)
}

pub async fn create_workspace(harness: &Harness, auth: &AuthContext, name: &str) -> Workspace {
    harness
        .services
        .workspaces
        .create(auth, CreateWorkspaceRequest::new(name))
        .await
        .expect("create workspace")
}
