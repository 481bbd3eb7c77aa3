//! ATRIUM Test Utilities
//!
//! Centralized test infrastructure for the ATRIUM workspace:
//! - Proptest generators for identifiers, roles and requests
//! - Fault-injecting store and cache doubles
//! - Test fixtures for common scenarios
//! - Custom assertions for ATRIUM-specific validation

// Re-export the in-memory store from its source crate
pub use atrium_storage::InMemoryStore;

// Re-export core types for convenience
pub use atrium_core::{
    AtriumError, AtriumResult, AuditAction, AuditLogEntry, AuditLogFilter, CacheError,
    Connection, EntityIdType, EntityKind, Membership, PageRequest, Project, ProjectId, Role,
    Settings, StorageError, TenantId, Timestamp, UserId, Workspace, WorkspaceId,
};

use async_trait::async_trait;
use atrium_storage::cache::{CacheBackend, CacheResult, CacheStats, MemoryCacheBackend};
use atrium_storage::AuditLogStore;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Audit store that fails every append while `failing` is set.
///
/// Successful appends are forwarded to an inner in-memory store so tests can
/// inspect what got through.
#[derive(Debug, Default)]
pub struct FailingAuditStore {
    inner: InMemoryStore,
    failing: AtomicBool,
    attempts: AtomicU64,
}

impl FailingAuditStore {
    /// A store that rejects every append.
    pub fn failing() -> Self {
        let store = Self::default();
        store.failing.store(true, Ordering::SeqCst);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of append calls, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

#[async_trait]
impl AuditLogStore for FailingAuditStore {
    async fn audit_append(&self, entry: &AuditLogEntry) -> AtriumResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::backend("audit table unavailable").into());
        }
        self.inner.audit_append(entry).await
    }

    async fn audit_list(
        &self,
        filter: &AuditLogFilter,
    ) -> AtriumResult<(Vec<AuditLogEntry>, u64)> {
        self.inner.audit_list(filter).await
    }

    async fn audit_purge_before(&self, cutoff: Timestamp) -> AtriumResult<u64> {
        self.inner.audit_purge_before(cutoff).await
    }
}

/// Cache backend whose operations can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyCacheBackend {
    inner: MemoryCacheBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail `set`, `delete`, `delete_prefix` and `clear`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool) -> CacheResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(CacheError::Backend {
                reason: "injected cache failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FlakyCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check(&self.fail_reads)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.check(&self.fail_writes)?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check(&self.fail_writes)?;
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.check(&self.fail_writes)?;
        self.inner.delete_prefix(prefix).await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.check(&self.fail_writes)?;
        self.inner.clear().await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating ATRIUM types.

    use super::*;
    use atrium_core::{CreateProjectRequest, CreateWorkspaceRequest, ProjectStatus, MAX_NAME_LEN};
    use proptest::prelude::*;
    use uuid::Uuid;

    // === Identity Type Generators ===

    /// Generate a random UUID (for generic ID generation).
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        arb_uuid().prop_map(TenantId::new)
    }

    pub fn arb_workspace_id() -> impl Strategy<Value = WorkspaceId> {
        arb_uuid().prop_map(WorkspaceId::new)
    }

    /// Generate a user id such as `user-7`.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        (0u32..1000).prop_map(|n| UserId::new(format!("user-{}", n)))
    }

    // === Enum Generators ===

    pub fn arb_role() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::ALL.to_vec())
    }

    pub fn arb_project_status() -> impl Strategy<Value = ProjectStatus> {
        prop_oneof![Just(ProjectStatus::Active), Just(ProjectStatus::Archived)]
    }

    pub fn arb_audit_action() -> impl Strategy<Value = AuditAction> {
        prop::sample::select(AuditAction::ALL.to_vec())
    }

    // === Request Generators ===

    /// Generate a name that passes validation (may carry surrounding spaces).
    pub fn arb_valid_name() -> impl Strategy<Value = String> {
        ("[A-Za-z0-9][A-Za-z0-9 _-]{0,40}", " {0,3}")
            .prop_map(|(name, pad)| format!("{pad}{name}{pad}"))
    }

    /// Generate a name that fails validation: blank or too long.
    pub fn arb_invalid_name() -> impl Strategy<Value = String> {
        prop_oneof![
            " {0,5}".prop_map(String::from),
            Just("x".repeat(MAX_NAME_LEN + 1)),
        ]
    }

    pub fn arb_create_workspace_request() -> impl Strategy<Value = CreateWorkspaceRequest> {
        (arb_valid_name(), "[a-z ]{0,30}").prop_map(|(name, description)| {
            CreateWorkspaceRequest {
                name,
                description,
                settings: Settings::new(),
            }
        })
    }

    pub fn arb_create_project_request() -> impl Strategy<Value = CreateProjectRequest> {
        arb_valid_name().prop_map(CreateProjectRequest::new)
    }

    /// Generate a membership set for one workspace: distinct users with roles.
    pub fn arb_member_roles(max: usize) -> impl Strategy<Value = Vec<(UserId, Role)>> {
        prop::collection::btree_map(0u32..500, arb_role(), 1..=max).prop_map(|members| {
            members
                .into_iter()
                .map(|(n, role)| (UserId::new(format!("member-{}", n)), role))
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// A workspace for `tenant_id` created by `owner`.
    pub fn workspace(tenant_id: TenantId, name: &str, owner: &UserId) -> Workspace {
        Workspace::new(tenant_id, name, "", Settings::new(), owner.clone())
    }

    pub fn project(workspace_id: WorkspaceId, name: &str, created_by: &UserId) -> Project {
        Project::new(workspace_id, name, "", Settings::new(), created_by.clone())
    }

    pub fn connection(project_id: ProjectId, base_id: &str) -> Connection {
        Connection::new(project_id, base_id, format!("Base {}", base_id), "", true)
    }

    /// In-memory store seeded with one workspace and its owner.
    pub async fn seeded_store(
        tenant_id: TenantId,
        owner: &UserId,
    ) -> AtriumResult<(Arc<InMemoryStore>, Workspace)> {
        use atrium_storage::WorkspaceStore;

        let store = Arc::new(InMemoryStore::new());
        let ws = workspace(tenant_id, "Seeded", owner);
        let membership = Membership::new(ws.id, owner.clone(), Role::Owner);
        store.workspace_create_with_owner(&ws, &membership).await?;
        Ok((store, ws))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for ATRIUM results.

    use super::*;

    /// Assert that an AtriumResult is a NotFound storage error for `entity`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &AtriumResult<T>, entity: EntityKind) {
        match result {
            Err(AtriumError::Storage(StorageError::NotFound { entity: e, .. })) => {
                assert_eq!(*e, entity, "Wrong entity kind in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", entity, other),
        }
    }

    /// Assert that an AtriumResult is a LastOwner storage error.
    #[track_caller]
    pub fn assert_last_owner<T: std::fmt::Debug>(result: &AtriumResult<T>) {
        match result {
            Err(AtriumError::Storage(StorageError::LastOwner { .. })) => {}
            other => panic!("Expected LastOwner error, got: {:?}", other),
        }
    }

    /// Assert that an AtriumResult is a Duplicate storage error.
    #[track_caller]
    pub fn assert_duplicate<T: std::fmt::Debug>(result: &AtriumResult<T>) {
        match result {
            Err(AtriumError::Storage(StorageError::Duplicate { .. })) => {}
            other => panic!("Expected Duplicate error, got: {:?}", other),
        }
    }
}
