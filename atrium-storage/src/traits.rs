//! Async store traits for the workspace hierarchy.
//!
//! Each resource has its own trait so that services can hold them as separate
//! trait objects (and tests can swap a single one for a faulty double).
//! Implementations are expected to enforce the write-time rules listed on each
//! method atomically, under their own lock or transaction.

use ::async_trait::async_trait;
use atrium_core::{
    AtriumResult, AuditLogEntry, AuditLogFilter, Connection, ConnectionFilter, ConnectionId,
    Membership, PageRequest, Project, ProjectFilter, ProjectId, Role, TenantId, Timestamp, UserId,
    Workspace, WorkspaceFilter, WorkspaceId, WorkspaceStats,
};

/// Workspace persistence.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Insert a workspace together with its first owner membership.
    ///
    /// Both rows are written or neither is. Fails with `Duplicate` when a
    /// non-deleted workspace of the same tenant already has the name.
    async fn workspace_create_with_owner(
        &self,
        workspace: &Workspace,
        owner: &Membership,
    ) -> AtriumResult<()>;

    /// Get a non-deleted workspace by ID.
    async fn workspace_get(&self, id: WorkspaceId) -> AtriumResult<Option<Workspace>>;

    /// Persist changed fields. Renames are checked for uniqueness.
    async fn workspace_update(&self, workspace: &Workspace) -> AtriumResult<()>;

    /// Mark a workspace deleted.
    ///
    /// Rejected with `HasChildren` while non-deleted projects exist.
    async fn workspace_soft_delete(&self, id: WorkspaceId) -> AtriumResult<Workspace>;

    /// Filtered page of workspaces plus the total number of matches.
    async fn workspace_list(&self, filter: &WorkspaceFilter) -> AtriumResult<(Vec<Workspace>, u64)>;

    /// Number of non-deleted workspaces owned by a tenant.
    async fn workspace_count_active(&self, tenant_id: TenantId) -> AtriumResult<u64>;

    /// Aggregate counters for a tenant.
    async fn workspace_stats(&self, tenant_id: TenantId) -> AtriumResult<WorkspaceStats>;
}

/// Project persistence.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert a project. Fails with `Duplicate` on a name clash inside the
    /// workspace and with `NotFound` when the workspace is gone.
    async fn project_insert(&self, project: &Project) -> AtriumResult<()>;

    async fn project_get(&self, id: ProjectId) -> AtriumResult<Option<Project>>;

    async fn project_update(&self, project: &Project) -> AtriumResult<()>;

    /// Mark a project deleted; rejected with `HasChildren` while connections exist.
    async fn project_soft_delete(&self, id: ProjectId) -> AtriumResult<Project>;

    async fn project_list(&self, filter: &ProjectFilter) -> AtriumResult<(Vec<Project>, u64)>;

    /// Number of non-deleted projects in a workspace.
    async fn project_count_active(&self, workspace_id: WorkspaceId) -> AtriumResult<u64>;
}

/// Connection persistence.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Insert a connection. Fails with `Duplicate` when the external base is
    /// already connected to the project.
    async fn connection_insert(&self, connection: &Connection) -> AtriumResult<()>;

    async fn connection_get(&self, id: ConnectionId) -> AtriumResult<Option<Connection>>;

    async fn connection_update(&self, connection: &Connection) -> AtriumResult<()>;

    async fn connection_soft_delete(&self, id: ConnectionId) -> AtriumResult<Connection>;

    async fn connection_list(
        &self,
        filter: &ConnectionFilter,
    ) -> AtriumResult<(Vec<Connection>, u64)>;

    /// Number of non-deleted connections in a project.
    async fn connection_count_active(&self, project_id: ProjectId) -> AtriumResult<u64>;

    /// Set the last synchronization time of a non-deleted connection.
    async fn connection_touch_sync(
        &self,
        id: ConnectionId,
        at: Timestamp,
    ) -> AtriumResult<Connection>;
}

/// Membership persistence. Owns the last-owner invariant.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Add a membership; fails with `Duplicate` when the user is already a member.
    async fn member_add(&self, membership: &Membership) -> AtriumResult<()>;

    async fn member_get(
        &self,
        workspace_id: WorkspaceId,
        user_id: &UserId,
    ) -> AtriumResult<Option<Membership>>;

    /// Change a member's role.
    ///
    /// Demoting the only owner fails with `LastOwner` and changes nothing.
    /// Returns the membership as it was before the change.
    async fn member_update_role(
        &self,
        workspace_id: WorkspaceId,
        user_id: &UserId,
        role: Role,
    ) -> AtriumResult<Membership>;

    /// Hard-delete a membership.
    ///
    /// Removing the only owner fails with `LastOwner`. Returns the removed row.
    async fn member_remove(
        &self,
        workspace_id: WorkspaceId,
        user_id: &UserId,
    ) -> AtriumResult<Membership>;

    /// Members ordered by join time, newest first.
    async fn member_list(
        &self,
        workspace_id: WorkspaceId,
        page: PageRequest,
    ) -> AtriumResult<(Vec<Membership>, u64)>;

    /// Every membership row of a workspace.
    async fn member_list_all(&self, workspace_id: WorkspaceId) -> AtriumResult<Vec<Membership>>;

    /// Every membership row of a user, across workspaces.
    async fn member_list_by_user(&self, user_id: &UserId) -> AtriumResult<Vec<Membership>>;

    async fn member_count_owners(&self, workspace_id: WorkspaceId) -> AtriumResult<u64>;

    /// True when the user is an owner and no other owner exists.
    async fn member_is_last_owner(
        &self,
        workspace_id: WorkspaceId,
        user_id: &UserId,
    ) -> AtriumResult<bool> {
        match self.member_get(workspace_id, user_id).await? {
            Some(member) if member.role.is_owner() => {
                Ok(self.member_count_owners(workspace_id).await? <= 1)
            }
            _ => Ok(false),
        }
    }
}

/// Append-only audit persistence.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn audit_append(&self, entry: &AuditLogEntry) -> AtriumResult<()>;

    async fn audit_list(
        &self,
        filter: &AuditLogFilter,
    ) -> AtriumResult<(Vec<AuditLogEntry>, u64)>;

    /// Delete entries created strictly before `cutoff`. Returns the count.
    async fn audit_purge_before(&self, cutoff: Timestamp) -> AtriumResult<u64>;
}

/// A single backend implementing every store.
pub trait AtriumStore:
    WorkspaceStore + ProjectStore + ConnectionStore + MembershipStore + AuditLogStore
{
}

impl<T> AtriumStore for T where
    T: WorkspaceStore + ProjectStore + ConnectionStore + MembershipStore + AuditLogStore
{
}
