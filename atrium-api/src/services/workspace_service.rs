//! Workspace Service
//!
//! Creation (with quota and the initial owner), reads, updates, soft delete,
//! tenant statistics and the visibility-scoped listing.

use std::sync::Arc;

use atrium_core::{
    AuditAction, ChangeSet, CreateWorkspaceRequest, Membership, Page, Role, UpdateWorkspaceRequest,
    Workspace, WorkspaceFilter, WorkspaceId, WorkspaceStats,
};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use super::{narrow_ids, ServiceContext};
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};

const SERVICE: &str = "workspace";

/// Workspace operations.
#[derive(Debug, Clone)]
pub struct WorkspaceService {
    ctx: Arc<ServiceContext>,
}

impl WorkspaceService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Create a workspace; the caller becomes its owner.
    ///
    /// # Errors
    /// `InvalidInput` for a bad name, `QuotaExceeded` once the tenant holds
    /// the maximum number of workspaces, `DuplicateResource` on a name clash.
    pub async fn create(
        &self,
        auth: &AuthContext,
        mut req: CreateWorkspaceRequest,
    ) -> ApiResult<Workspace> {
        let result = async {
            req.validate()?;

            let workspace = {
                let _tenant = self.ctx.tenant_locks.lock(&auth.tenant_id).await;
                let limit = self.ctx.config.max_workspaces_per_tenant;
                let count = self
                    .ctx
                    .stores
                    .workspaces
                    .workspace_count_active(auth.tenant_id)
                    .await?;
                if count >= limit {
                    debug!(tenant_id = %auth.tenant_id, count, limit, "Workspace quota reached");
                    return Err(ApiError::quota_exceeded("workspaces", limit));
                }

                let workspace = Workspace::new(
                    auth.tenant_id,
                    req.name,
                    req.description,
                    req.settings,
                    auth.user_id.clone(),
                );
                let owner = Membership::new(workspace.id, auth.user_id.clone(), Role::Owner);
                self.ctx
                    .stores
                    .workspaces
                    .workspace_create_with_owner(&workspace, &owner)
                    .await?;
                workspace
            };

            self.ctx.cache.invalidate_user_index(&auth.user_id).await;
            self.ctx
                .audit
                .record(
                    workspace.id,
                    &auth.user_id,
                    AuditAction::WorkspaceCreated,
                    workspace.id.to_string(),
                    json!({
                        "name": workspace.name,
                        "description": workspace.description,
                        "tenant_id": workspace.tenant_id,
                    }),
                )
                .await;
            info!(workspace_id = %workspace.id, tenant_id = %auth.tenant_id, "Workspace created");
            Ok(workspace)
        }
        .await;
        self.ctx.observe(SERVICE, "create", result)
    }

    /// Get a workspace the caller can view.
    pub async fn get(&self, auth: &AuthContext, id: WorkspaceId) -> ApiResult<Workspace> {
        let result = self
            .ctx
            .authorize_workspace(auth, id, Role::Viewer)
            .await
            .map(|(workspace, _)| workspace);
        self.ctx.observe(SERVICE, "get", result)
    }

    /// Apply a partial update. Requires admin.
    ///
    /// Changes apply to the stored row, not the cached copy. Only fields
    /// whose value changes are written and audited; an update that changes
    /// nothing returns the workspace untouched.
    pub async fn update(
        &self,
        auth: &AuthContext,
        id: WorkspaceId,
        mut req: UpdateWorkspaceRequest,
    ) -> ApiResult<Workspace> {
        let result = async {
            req.validate()?;
            self.ctx.authorize_workspace(auth, id, Role::Admin).await?;
            let _workspace = self.ctx.workspace_locks.lock(&id).await;
            let mut workspace = self.ctx.fresh_workspace(id).await?;

            let mut changes = ChangeSet::new();
            if let Some(name) = req.name {
                if changes.track("name", &workspace.name, &name) {
                    workspace.name = name;
                }
            }
            if let Some(description) = req.description {
                if changes.track("description", &workspace.description, &description) {
                    workspace.description = description;
                }
            }
            if let Some(settings) = req.settings {
                if changes.track("settings", &workspace.settings, &settings) {
                    workspace.settings = settings;
                }
            }
            if changes.is_empty() {
                return Ok(workspace);
            }

            workspace.updated_at = Utc::now();
            self.ctx.stores.workspaces.workspace_update(&workspace).await?;
            self.ctx.cache.invalidate_workspace(id).await;
            self.ctx
                .audit
                .record(
                    id,
                    &auth.user_id,
                    AuditAction::WorkspaceUpdated,
                    id.to_string(),
                    changes.into_value(),
                )
                .await;
            Ok(workspace)
        }
        .await;
        self.ctx.observe(SERVICE, "update", result)
    }

    /// Soft-delete a workspace. Requires owner.
    ///
    /// # Errors
    /// `Conflict` while the workspace still has non-deleted projects.
    pub async fn delete(&self, auth: &AuthContext, id: WorkspaceId) -> ApiResult<()> {
        let result = async {
            self.ctx.authorize_workspace(auth, id, Role::Owner).await?;
            let deleted = {
                let _workspace = self.ctx.workspace_locks.lock(&id).await;
                self.ctx.stores.workspaces.workspace_soft_delete(id).await?
            };

            self.ctx.cache.invalidate_workspace_cascade(id).await;
            let members = self.ctx.stores.members.member_list_all(id).await?;
            for member in &members {
                self.ctx.cache.invalidate_user_index(&member.user_id).await;
            }

            self.ctx
                .audit
                .record(
                    id,
                    &auth.user_id,
                    AuditAction::WorkspaceDeleted,
                    id.to_string(),
                    json!({ "name": deleted.name }),
                )
                .await;
            info!(workspace_id = %id, members = members.len(), "Workspace deleted");
            Ok(())
        }
        .await;
        self.ctx.observe(SERVICE, "delete", result)
    }

    /// Workspaces of the caller's tenant the caller is a member of.
    pub async fn list(
        &self,
        auth: &AuthContext,
        mut filter: WorkspaceFilter,
    ) -> ApiResult<Page<Workspace>> {
        let result = async {
            filter.page = self
                .ctx
                .page(filter.page, self.ctx.config.default_page_size);
            let visible = self.ctx.visible_workspace_ids(auth).await?;
            let ids = narrow_ids(visible, filter.ids.as_deref());
            if ids.is_empty() {
                return Ok(Page::empty(filter.page));
            }
            filter.tenant_id = Some(auth.tenant_id);
            filter.ids = Some(ids);

            let (items, total) = self.ctx.stores.workspaces.workspace_list(&filter).await?;
            Ok(Page::new(items, total, filter.page))
        }
        .await;
        self.ctx.observe(SERVICE, "list", result)
    }

    /// Counters over the caller's tenant.
    pub async fn stats(&self, auth: &AuthContext) -> ApiResult<WorkspaceStats> {
        let result = self
            .ctx
            .stores
            .workspaces
            .workspace_stats(auth.tenant_id)
            .await
            .map_err(ApiError::from);
        self.ctx.observe(SERVICE, "stats", result)
    }

    /// Check that the caller holds at least `required` in a workspace.
    /// Returns the caller's actual role.
    pub async fn check_access(
        &self,
        auth: &AuthContext,
        id: WorkspaceId,
        required: Role,
    ) -> ApiResult<Role> {
        let result = self
            .ctx
            .authorize_workspace(auth, id, required)
            .await
            .map(|(_, membership)| membership.role);
        self.ctx.observe(SERVICE, "check_access", result)
    }
}
