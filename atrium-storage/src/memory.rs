//! In-memory store.
//!
//! All tables sit behind one `tokio::sync::RwLock`, so every multi-row rule
//! (workspace plus owner membership, last-owner checks, name uniqueness,
//! cascade rejection) is evaluated and applied under a single write guard.

use crate::query::{matches_search, paginate, sort_by};
use crate::traits::{AuditLogStore, ConnectionStore, MembershipStore, ProjectStore, WorkspaceStore};
use ::async_trait::async_trait;
use atrium_core::{
    normalize_search, AtriumResult, AuditLogEntry, AuditLogFilter, Connection, ConnectionFilter,
    ConnectionId, EntityKind, Lifecycle, Membership, PageRequest, Project, ProjectFilter,
    ProjectId, ProjectStatus, Role, SortOrder, StorageError, TenantId, Timestamp, UserId,
    Workspace, WorkspaceFilter, WorkspaceId, WorkspaceStats,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    workspaces: HashMap<WorkspaceId, Workspace>,
    projects: HashMap<ProjectId, Project>,
    connections: HashMap<ConnectionId, Connection>,
    members: HashMap<(WorkspaceId, UserId), Membership>,
    audit: Vec<AuditLogEntry>,
}

impl Tables {
    fn active_workspace(&self, id: WorkspaceId) -> AtriumResult<&Workspace> {
        self.workspaces
            .get(&id)
            .filter(|ws| ws.is_active())
            .ok_or_else(|| StorageError::not_found(EntityKind::Workspace, id).into())
    }

    fn active_project(&self, id: ProjectId) -> AtriumResult<&Project> {
        self.projects
            .get(&id)
            .filter(|p| p.is_active())
            .ok_or_else(|| StorageError::not_found(EntityKind::Project, id).into())
    }

    fn workspace_name_taken(&self, tenant_id: TenantId, name: &str, except: WorkspaceId) -> bool {
        self.workspaces.values().any(|ws| {
            ws.is_active() && ws.tenant_id == tenant_id && ws.id != except && ws.name == name
        })
    }

    fn project_name_taken(&self, workspace_id: WorkspaceId, name: &str, except: ProjectId) -> bool {
        self.projects.values().any(|p| {
            p.is_active() && p.workspace_id == workspace_id && p.id != except && p.name == name
        })
    }

    fn base_taken(&self, project_id: ProjectId, base_id: &str, except: ConnectionId) -> bool {
        self.connections.values().any(|c| {
            c.is_active() && c.project_id == project_id && c.id != except && c.base_id == base_id
        })
    }

    fn active_projects_in(&self, workspace_id: WorkspaceId) -> u64 {
        self.projects
            .values()
            .filter(|p| p.is_active() && p.workspace_id == workspace_id)
            .count() as u64
    }

    fn active_connections_in(&self, project_id: ProjectId) -> u64 {
        self.connections
            .values()
            .filter(|c| c.is_active() && c.project_id == project_id)
            .count() as u64
    }

    fn owner_count(&self, workspace_id: WorkspaceId) -> u64 {
        self.members
            .values()
            .filter(|m| m.workspace_id == workspace_id && m.role.is_owner())
            .count() as u64
    }
}

fn member_key_display(workspace_id: WorkspaceId, user_id: &UserId) -> String {
    format!("{}/{}", workspace_id, user_id)
}

/// Store keeping every table in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of audit entries currently held.
    pub async fn audit_len(&self) -> usize {
        self.inner.read().await.audit.len()
    }
}

// ============================================================================
// WORKSPACES
// ============================================================================

#[async_trait]
impl WorkspaceStore for InMemoryStore {
    async fn workspace_create_with_owner(
        &self,
        workspace: &Workspace,
        owner: &Membership,
    ) -> AtriumResult<()> {
        let mut tables = self.inner.write().await;
        if tables.workspaces.contains_key(&workspace.id) {
            return Err(StorageError::duplicate(EntityKind::Workspace, workspace.id).into());
        }
        if tables.workspace_name_taken(workspace.tenant_id, &workspace.name, workspace.id) {
            return Err(StorageError::duplicate(EntityKind::Workspace, &workspace.name).into());
        }
        tables.workspaces.insert(workspace.id, workspace.clone());
        tables
            .members
            .insert((owner.workspace_id, owner.user_id.clone()), owner.clone());
        Ok(())
    }

    async fn workspace_get(&self, id: WorkspaceId) -> AtriumResult<Option<Workspace>> {
        let tables = self.inner.read().await;
        Ok(tables.workspaces.get(&id).filter(|ws| ws.is_active()).cloned())
    }

    async fn workspace_update(&self, workspace: &Workspace) -> AtriumResult<()> {
        let mut tables = self.inner.write().await;
        tables.active_workspace(workspace.id)?;
        if tables.workspace_name_taken(workspace.tenant_id, &workspace.name, workspace.id) {
            return Err(StorageError::duplicate(EntityKind::Workspace, &workspace.name).into());
        }
        tables.workspaces.insert(workspace.id, workspace.clone());
        Ok(())
    }

    async fn workspace_soft_delete(&self, id: WorkspaceId) -> AtriumResult<Workspace> {
        let mut tables = self.inner.write().await;
        tables.active_workspace(id)?;
        let children = tables.active_projects_in(id);
        if children > 0 {
            return Err(StorageError::HasChildren {
                entity: EntityKind::Workspace,
                id: id.to_string(),
                children,
            }
            .into());
        }
        let now = Utc::now();
        let ws = tables
            .workspaces
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found(EntityKind::Workspace, id))?;
        ws.lifecycle = Lifecycle::SoftDeleted { deleted_at: now };
        ws.updated_at = now;
        Ok(ws.clone())
    }

    async fn workspace_list(&self, filter: &WorkspaceFilter) -> AtriumResult<(Vec<Workspace>, u64)> {
        let tables = self.inner.read().await;
        let needle = normalize_search(filter.search.as_deref());
        let ids: Option<HashSet<WorkspaceId>> =
            filter.ids.as_ref().map(|ids| ids.iter().copied().collect());

        let mut items: Vec<Workspace> = tables
            .workspaces
            .values()
            .filter(|ws| filter.include_deleted || ws.is_active())
            .filter(|ws| filter.tenant_id.map_or(true, |t| ws.tenant_id == t))
            .filter(|ws| filter.created_by.as_ref().map_or(true, |u| &ws.created_by == u))
            .filter(|ws| ids.as_ref().map_or(true, |ids| ids.contains(&ws.id)))
            .filter(|ws| matches_search(needle.as_deref(), &[&ws.name, &ws.description]))
            .cloned()
            .collect();
        sort_by(&mut items, filter.sort);
        Ok(paginate(items, filter.page))
    }

    async fn workspace_count_active(&self, tenant_id: TenantId) -> AtriumResult<u64> {
        let tables = self.inner.read().await;
        Ok(tables
            .workspaces
            .values()
            .filter(|ws| ws.is_active() && ws.tenant_id == tenant_id)
            .count() as u64)
    }

    async fn workspace_stats(&self, tenant_id: TenantId) -> AtriumResult<WorkspaceStats> {
        let tables = self.inner.read().await;
        let tenant_workspaces: Vec<&Workspace> = tables
            .workspaces
            .values()
            .filter(|ws| ws.tenant_id == tenant_id)
            .collect();
        let workspace_ids: HashSet<WorkspaceId> = tenant_workspaces.iter().map(|ws| ws.id).collect();

        let projects: Vec<&Project> = tables
            .projects
            .values()
            .filter(|p| p.is_active() && workspace_ids.contains(&p.workspace_id))
            .collect();
        let project_ids: HashSet<ProjectId> = projects.iter().map(|p| p.id).collect();

        let mut projects_by_status = BTreeMap::new();
        for project in &projects {
            *projects_by_status
                .entry(project.status.as_db_str().to_string())
                .or_insert(0) += 1;
        }

        Ok(WorkspaceStats {
            tenant_id,
            total_workspaces: tenant_workspaces.len() as u64,
            active_workspaces: tenant_workspaces.iter().filter(|ws| ws.is_active()).count()
                as u64,
            total_projects: projects.len() as u64,
            active_projects: projects
                .iter()
                .filter(|p| p.status == ProjectStatus::Active)
                .count() as u64,
            total_connections: tables
                .connections
                .values()
                .filter(|c| c.is_active() && project_ids.contains(&c.project_id))
                .count() as u64,
            projects_by_status,
            last_updated: Utc::now(),
        })
    }
}

// ============================================================================
// PROJECTS
// ============================================================================

#[async_trait]
impl ProjectStore for InMemoryStore {
    async fn project_insert(&self, project: &Project) -> AtriumResult<()> {
        let mut tables = self.inner.write().await;
        tables.active_workspace(project.workspace_id)?;
        if tables.projects.contains_key(&project.id)
            || tables.project_name_taken(project.workspace_id, &project.name, project.id)
        {
            return Err(StorageError::duplicate(EntityKind::Project, &project.name).into());
        }
        tables.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn project_get(&self, id: ProjectId) -> AtriumResult<Option<Project>> {
        let tables = self.inner.read().await;
        Ok(tables.projects.get(&id).filter(|p| p.is_active()).cloned())
    }

    async fn project_update(&self, project: &Project) -> AtriumResult<()> {
        let mut tables = self.inner.write().await;
        tables.active_project(project.id)?;
        if tables.project_name_taken(project.workspace_id, &project.name, project.id) {
            return Err(StorageError::duplicate(EntityKind::Project, &project.name).into());
        }
        tables.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn project_soft_delete(&self, id: ProjectId) -> AtriumResult<Project> {
        let mut tables = self.inner.write().await;
        tables.active_project(id)?;
        let children = tables.active_connections_in(id);
        if children > 0 {
            return Err(StorageError::HasChildren {
                entity: EntityKind::Project,
                id: id.to_string(),
                children,
            }
            .into());
        }
        let now = Utc::now();
        let project = tables
            .projects
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found(EntityKind::Project, id))?;
        project.lifecycle = Lifecycle::SoftDeleted { deleted_at: now };
        project.updated_at = now;
        Ok(project.clone())
    }

    async fn project_list(&self, filter: &ProjectFilter) -> AtriumResult<(Vec<Project>, u64)> {
        let tables = self.inner.read().await;
        let needle = normalize_search(filter.search.as_deref());
        let scope: Option<HashSet<WorkspaceId>> = filter
            .workspace_ids
            .as_ref()
            .map(|ids| ids.iter().copied().collect());

        let mut items: Vec<Project> = tables
            .projects
            .values()
            .filter(|p| filter.include_deleted || p.is_active())
            .filter(|p| filter.workspace_id.map_or(true, |w| p.workspace_id == w))
            .filter(|p| scope.as_ref().map_or(true, |ids| ids.contains(&p.workspace_id)))
            .filter(|p| filter.status.map_or(true, |s| p.status == s))
            .filter(|p| filter.created_by.as_ref().map_or(true, |u| &p.created_by == u))
            .filter(|p| matches_search(needle.as_deref(), &[&p.name, &p.description]))
            .cloned()
            .collect();
        sort_by(&mut items, filter.sort);
        Ok(paginate(items, filter.page))
    }

    async fn project_count_active(&self, workspace_id: WorkspaceId) -> AtriumResult<u64> {
        Ok(self.inner.read().await.active_projects_in(workspace_id))
    }
}

// ============================================================================
// CONNECTIONS
// ============================================================================

#[async_trait]
impl ConnectionStore for InMemoryStore {
    async fn connection_insert(&self, connection: &Connection) -> AtriumResult<()> {
        let mut tables = self.inner.write().await;
        tables.active_project(connection.project_id)?;
        if tables.connections.contains_key(&connection.id)
            || tables.base_taken(connection.project_id, &connection.base_id, connection.id)
        {
            return Err(StorageError::duplicate(EntityKind::Connection, &connection.base_id).into());
        }
        tables.connections.insert(connection.id, connection.clone());
        Ok(())
    }

    async fn connection_get(&self, id: ConnectionId) -> AtriumResult<Option<Connection>> {
        let tables = self.inner.read().await;
        Ok(tables.connections.get(&id).filter(|c| c.is_active()).cloned())
    }

    async fn connection_update(&self, connection: &Connection) -> AtriumResult<()> {
        let mut tables = self.inner.write().await;
        match tables.connections.get(&connection.id) {
            Some(existing) if existing.is_active() => {}
            _ => return Err(StorageError::not_found(EntityKind::Connection, connection.id).into()),
        }
        tables.connections.insert(connection.id, connection.clone());
        Ok(())
    }

    async fn connection_soft_delete(&self, id: ConnectionId) -> AtriumResult<Connection> {
        let mut tables = self.inner.write().await;
        let connection = tables
            .connections
            .get_mut(&id)
            .filter(|c| c.is_active())
            .ok_or_else(|| StorageError::not_found(EntityKind::Connection, id))?;
        let now = Utc::now();
        connection.lifecycle = Lifecycle::SoftDeleted { deleted_at: now };
        connection.updated_at = now;
        Ok(connection.clone())
    }

    async fn connection_list(
        &self,
        filter: &ConnectionFilter,
    ) -> AtriumResult<(Vec<Connection>, u64)> {
        let tables = self.inner.read().await;
        let needle = normalize_search(filter.search.as_deref());
        let mut items: Vec<Connection> = tables
            .connections
            .values()
            .filter(|c| filter.include_deleted || c.is_active())
            .filter(|c| filter.project_id.map_or(true, |p| c.project_id == p))
            .filter(|c| filter.sync_enabled.map_or(true, |s| c.sync_enabled == s))
            .filter(|c| {
                matches_search(needle.as_deref(), &[&c.name, &c.description, &c.base_id])
            })
            .cloned()
            .collect();
        sort_by(&mut items, filter.sort);
        Ok(paginate(items, filter.page))
    }

    async fn connection_count_active(&self, project_id: ProjectId) -> AtriumResult<u64> {
        Ok(self.inner.read().await.active_connections_in(project_id))
    }

    async fn connection_touch_sync(
        &self,
        id: ConnectionId,
        at: Timestamp,
    ) -> AtriumResult<Connection> {
        let mut tables = self.inner.write().await;
        let connection = tables
            .connections
            .get_mut(&id)
            .filter(|c| c.is_active())
            .ok_or_else(|| StorageError::not_found(EntityKind::Connection, id))?;
        connection.last_sync_at = Some(at);
        connection.updated_at = at;
        Ok(connection.clone())
    }
}

// ============================================================================
// MEMBERSHIPS
// ============================================================================

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn member_add(&self, membership: &Membership) -> AtriumResult<()> {
        let mut tables = self.inner.write().await;
        tables.active_workspace(membership.workspace_id)?;
        let key = (membership.workspace_id, membership.user_id.clone());
        if tables.members.contains_key(&key) {
            return Err(StorageError::duplicate(
                EntityKind::Member,
                member_key_display(membership.workspace_id, &membership.user_id),
            )
            .into());
        }
        tables.members.insert(key, membership.clone());
        Ok(())
    }

    async fn member_get(
        &self,
        workspace_id: WorkspaceId,
        user_id: &UserId,
    ) -> AtriumResult<Option<Membership>> {
        let tables = self.inner.read().await;
        Ok(tables.members.get(&(workspace_id, user_id.clone())).cloned())
    }

    async fn member_update_role(
        &self,
        workspace_id: WorkspaceId,
        user_id: &UserId,
        role: Role,
    ) -> AtriumResult<Membership> {
        let mut tables = self.inner.write().await;
        let key = (workspace_id, user_id.clone());
        let previous = tables.members.get(&key).cloned().ok_or_else(|| {
            StorageError::not_found(EntityKind::Member, member_key_display(workspace_id, user_id))
        })?;
        if previous.role.is_owner() && !role.is_owner() && tables.owner_count(workspace_id) <= 1 {
            return Err(StorageError::LastOwner { workspace_id }.into());
        }
        if let Some(member) = tables.members.get_mut(&key) {
            member.role = role;
        }
        Ok(previous)
    }

    async fn member_remove(
        &self,
        workspace_id: WorkspaceId,
        user_id: &UserId,
    ) -> AtriumResult<Membership> {
        let mut tables = self.inner.write().await;
        let key = (workspace_id, user_id.clone());
        let existing = tables.members.get(&key).ok_or_else(|| {
            StorageError::not_found(EntityKind::Member, member_key_display(workspace_id, user_id))
        })?;
        if existing.role.is_owner() && tables.owner_count(workspace_id) <= 1 {
            return Err(StorageError::LastOwner { workspace_id }.into());
        }
        tables.members.remove(&key).ok_or_else(|| {
            StorageError::not_found(EntityKind::Member, member_key_display(workspace_id, user_id))
                .into()
        })
    }

    async fn member_list(
        &self,
        workspace_id: WorkspaceId,
        page: PageRequest,
    ) -> AtriumResult<(Vec<Membership>, u64)> {
        let mut items = self.member_list_all(workspace_id).await?;
        items.sort_by(|a, b| {
            b.joined_at
                .cmp(&a.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(paginate(items, page))
    }

    async fn member_list_all(&self, workspace_id: WorkspaceId) -> AtriumResult<Vec<Membership>> {
        let tables = self.inner.read().await;
        Ok(tables
            .members
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn member_list_by_user(&self, user_id: &UserId) -> AtriumResult<Vec<Membership>> {
        let tables = self.inner.read().await;
        Ok(tables
            .members
            .values()
            .filter(|m| &m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn member_count_owners(&self, workspace_id: WorkspaceId) -> AtriumResult<u64> {
        Ok(self.inner.read().await.owner_count(workspace_id))
    }
}

// ============================================================================
// AUDIT LOG
// ============================================================================

#[async_trait]
impl AuditLogStore for InMemoryStore {
    async fn audit_append(&self, entry: &AuditLogEntry) -> AtriumResult<()> {
        self.inner.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn audit_list(
        &self,
        filter: &AuditLogFilter,
    ) -> AtriumResult<(Vec<AuditLogEntry>, u64)> {
        let tables = self.inner.read().await;
        let mut items: Vec<AuditLogEntry> = tables
            .audit
            .iter()
            .filter(|e| filter.workspace_id.map_or(true, |w| e.workspace_id == w))
            .filter(|e| filter.user_id.as_ref().map_or(true, |u| &e.user_id == u))
            .filter(|e| filter.action.map_or(true, |a| e.action == a))
            .filter(|e| filter.resource_type.map_or(true, |r| e.resource_type == r))
            .filter(|e| {
                filter
                    .resource_id
                    .as_deref()
                    .map_or(true, |r| e.resource_id == r)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            let ordering = a
                .created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id));
            match filter.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
        Ok(paginate(items, filter.page))
    }

    async fn audit_purge_before(&self, cutoff: Timestamp) -> AtriumResult<u64> {
        let mut tables = self.inner.write().await;
        let before = tables.audit.len();
        tables.audit.retain(|e| e.created_at >= cutoff);
        Ok((before - tables.audit.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::{AtriumError, AuditAction, EntityIdType, Settings};
    use serde_json::json;

    fn workspace(tenant: TenantId, name: &str) -> Workspace {
        Workspace::new(tenant, name, "", Settings::new(), UserId::new("owner"))
    }

    async fn seeded() -> AtriumResult<(InMemoryStore, Workspace)> {
        let store = InMemoryStore::new();
        let ws = workspace(TenantId::now_v7(), "Acme");
        let owner = Membership::new(ws.id, UserId::new("owner"), Role::Owner);
        store.workspace_create_with_owner(&ws, &owner).await?;
        Ok((store, ws))
    }

    #[tokio::test]
    async fn test_create_with_owner_writes_both_rows() -> AtriumResult<()> {
        let (store, ws) = seeded().await?;
        assert_eq!(store.workspace_get(ws.id).await?, Some(ws.clone()));
        let owner = store.member_get(ws.id, &UserId::new("owner")).await?;
        assert_eq!(owner.map(|m| m.role), Some(Role::Owner));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_workspace_name_leaves_no_membership() -> AtriumResult<()> {
        let (store, ws) = seeded().await?;
        let clash = workspace(ws.tenant_id, "Acme");
        let owner = Membership::new(clash.id, UserId::new("other"), Role::Owner);
        let err = store.workspace_create_with_owner(&clash, &owner).await;
        assert!(matches!(
            err,
            Err(AtriumError::Storage(StorageError::Duplicate { .. }))
        ));
        assert!(store.member_get(clash.id, &UserId::new("other")).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_same_name_in_other_tenant_allowed() -> AtriumResult<()> {
        let (store, _) = seeded().await?;
        let other = workspace(TenantId::now_v7(), "Acme");
        let owner = Membership::new(other.id, UserId::new("owner"), Role::Owner);
        store.workspace_create_with_owner(&other, &owner).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_soft_delete_rejected_with_children() -> AtriumResult<()> {
        let (store, ws) = seeded().await?;
        let project = Project::new(ws.id, "p", "", Settings::new(), UserId::new("owner"));
        store.project_insert(&project).await?;

        let err = store.workspace_soft_delete(ws.id).await;
        assert!(matches!(
            err,
            Err(AtriumError::Storage(StorageError::HasChildren { children: 1, .. }))
        ));

        store.project_soft_delete(project.id).await?;
        let deleted = store.workspace_soft_delete(ws.id).await?;
        assert!(!deleted.is_active());
        assert!(store.workspace_get(ws.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_deleted_name_can_be_reused() -> AtriumResult<()> {
        let (store, ws) = seeded().await?;
        store.workspace_soft_delete(ws.id).await?;
        let again = workspace(ws.tenant_id, "Acme");
        let owner = Membership::new(again.id, UserId::new("owner"), Role::Owner);
        store.workspace_create_with_owner(&again, &owner).await?;
        assert_eq!(store.workspace_count_active(ws.tenant_id).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_last_owner_cannot_leave() -> AtriumResult<()> {
        let (store, ws) = seeded().await?;
        let owner = UserId::new("owner");
        assert!(store.member_is_last_owner(ws.id, &owner).await?);

        let err = store.member_remove(ws.id, &owner).await;
        assert!(matches!(
            err,
            Err(AtriumError::Storage(StorageError::LastOwner { .. }))
        ));
        let err = store.member_update_role(ws.id, &owner, Role::Admin).await;
        assert!(matches!(
            err,
            Err(AtriumError::Storage(StorageError::LastOwner { .. }))
        ));

        store
            .member_add(&Membership::new(ws.id, UserId::new("second"), Role::Owner))
            .await?;
        let previous = store.member_update_role(ws.id, &owner, Role::Admin).await?;
        assert_eq!(previous.role, Role::Owner);
        assert_eq!(store.member_count_owners(ws.id).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_member_rejected() -> AtriumResult<()> {
        let (store, ws) = seeded().await?;
        let member = Membership::new(ws.id, UserId::new("owner"), Role::Viewer);
        assert!(store.member_add(&member).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_connection_base_unique_per_project() -> AtriumResult<()> {
        let (store, ws) = seeded().await?;
        let project = Project::new(ws.id, "p", "", Settings::new(), UserId::new("owner"));
        store.project_insert(&project).await?;
        store
            .connection_insert(&Connection::new(project.id, "app1", "A", "", true))
            .await?;
        let err = store
            .connection_insert(&Connection::new(project.id, "app1", "B", "", true))
            .await;
        assert!(matches!(
            err,
            Err(AtriumError::Storage(StorageError::Duplicate { .. }))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_touch_sync_sets_timestamp() -> AtriumResult<()> {
        let (store, ws) = seeded().await?;
        let project = Project::new(ws.id, "p", "", Settings::new(), UserId::new("owner"));
        store.project_insert(&project).await?;
        let conn = Connection::new(project.id, "app1", "A", "", true);
        store.connection_insert(&conn).await?;

        let at = Utc::now();
        let touched = store.connection_touch_sync(conn.id, at).await?;
        assert_eq!(touched.last_sync_at, Some(at));

        store.connection_soft_delete(conn.id).await?;
        assert!(store.connection_touch_sync(conn.id, at).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_count_deleted_workspaces_only_in_total() -> AtriumResult<()> {
        let (store, ws) = seeded().await?;
        let gone = workspace(ws.tenant_id, "Gone");
        store
            .workspace_create_with_owner(
                &gone,
                &Membership::new(gone.id, UserId::new("owner"), Role::Owner),
            )
            .await?;
        store.workspace_soft_delete(gone.id).await?;

        let mut archived = Project::new(ws.id, "old", "", Settings::new(), UserId::new("owner"));
        archived.status = ProjectStatus::Archived;
        store.project_insert(&archived).await?;
        store
            .project_insert(&Project::new(ws.id, "new", "", Settings::new(), UserId::new("owner")))
            .await?;

        let stats = store.workspace_stats(ws.tenant_id).await?;
        assert_eq!(stats.total_workspaces, 2);
        assert_eq!(stats.active_workspaces, 1);
        assert_eq!(stats.total_projects, 2);
        assert_eq!(stats.active_projects, 1);
        assert_eq!(stats.projects_by_status.get("archived"), Some(&1));
        Ok(())
    }

    #[tokio::test]
    async fn test_audit_purge_and_order() -> AtriumResult<()> {
        let store = InMemoryStore::new();
        let ws = WorkspaceId::now_v7();
        let mut old = AuditLogEntry::new(
            ws,
            UserId::new("u"),
            AuditAction::WorkspaceCreated,
            ws.to_string(),
            json!({}),
        );
        old.created_at = Utc::now() - chrono::Duration::days(40);
        store.audit_append(&old).await?;
        let recent = AuditLogEntry::new(
            ws,
            UserId::new("u"),
            AuditAction::WorkspaceUpdated,
            ws.to_string(),
            json!({}),
        );
        store.audit_append(&recent).await?;

        let (items, total) = store.audit_list(&AuditLogFilter::for_workspace(ws)).await?;
        assert_eq!(total, 2);
        assert_eq!(items[0].id, recent.id);

        let purged = store
            .audit_purge_before(Utc::now() - chrono::Duration::days(30))
            .await?;
        assert_eq!(purged, 1);
        assert_eq!(store.audit_len().await, 1);
        Ok(())
    }
}
