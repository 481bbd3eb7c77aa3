//! Project Service

use std::sync::Arc;

use atrium_core::{
    AuditAction, ChangeSet, CreateProjectRequest, Page, Project, ProjectFilter, ProjectId, Role,
    UpdateProjectRequest, WorkspaceId,
};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use super::ServiceContext;
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};

const SERVICE: &str = "project";

/// Project operations.
#[derive(Debug, Clone)]
pub struct ProjectService {
    ctx: Arc<ServiceContext>,
}

impl ProjectService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Create a project in a workspace. Requires member.
    ///
    /// # Errors
    /// `QuotaExceeded` once the workspace holds the maximum number of
    /// projects, `DuplicateResource` on a name clash within the workspace.
    pub async fn create(
        &self,
        auth: &AuthContext,
        workspace_id: WorkspaceId,
        mut req: CreateProjectRequest,
    ) -> ApiResult<Project> {
        let result = async {
            req.validate()?;
            self.ctx
                .authorize_workspace(auth, workspace_id, Role::Member)
                .await?;

            let project = {
                let _workspace = self.ctx.workspace_locks.lock(&workspace_id).await;
                let limit = self.ctx.config.max_projects_per_workspace;
                let count = self
                    .ctx
                    .stores
                    .projects
                    .project_count_active(workspace_id)
                    .await?;
                if count >= limit {
                    debug!(workspace_id = %workspace_id, count, limit, "Project quota reached");
                    return Err(ApiError::quota_exceeded("projects", limit));
                }

                let project = Project::new(
                    workspace_id,
                    req.name,
                    req.description,
                    req.settings,
                    auth.user_id.clone(),
                );
                self.ctx.stores.projects.project_insert(&project).await?;
                project
            };

            self.ctx
                .audit
                .record(
                    workspace_id,
                    &auth.user_id,
                    AuditAction::ProjectCreated,
                    project.id.to_string(),
                    json!({
                        "name": project.name,
                        "description": project.description,
                        "workspace_id": workspace_id,
                    }),
                )
                .await;
            info!(project_id = %project.id, workspace_id = %workspace_id, "Project created");
            Ok(project)
        }
        .await;
        self.ctx.observe(SERVICE, "create", result)
    }

    pub async fn get(&self, auth: &AuthContext, id: ProjectId) -> ApiResult<Project> {
        let result = self
            .ctx
            .authorize_project(auth, id, Role::Viewer)
            .await
            .map(|(project, _)| project);
        self.ctx.observe(SERVICE, "get", result)
    }

    /// Apply a partial update to the stored row. Requires member.
    pub async fn update(
        &self,
        auth: &AuthContext,
        id: ProjectId,
        mut req: UpdateProjectRequest,
    ) -> ApiResult<Project> {
        let result = async {
            req.validate()?;
            let (cached, _) = self.ctx.authorize_project(auth, id, Role::Member).await?;
            let _workspace = self.ctx.workspace_locks.lock(&cached.workspace_id).await;
            let mut project = self.ctx.fresh_project(id).await?;

            let mut changes = ChangeSet::new();
            if let Some(name) = req.name {
                if changes.track("name", &project.name, &name) {
                    project.name = name;
                }
            }
            if let Some(description) = req.description {
                if changes.track("description", &project.description, &description) {
                    project.description = description;
                }
            }
            if let Some(status) = req.status {
                if changes.track("status", &project.status, &status) {
                    project.status = status;
                }
            }
            if let Some(settings) = req.settings {
                if changes.track("settings", &project.settings, &settings) {
                    project.settings = settings;
                }
            }
            if changes.is_empty() {
                return Ok(project);
            }

            project.updated_at = Utc::now();
            self.ctx.stores.projects.project_update(&project).await?;
            self.ctx.cache.invalidate_project(id).await;
            self.ctx
                .audit
                .record(
                    project.workspace_id,
                    &auth.user_id,
                    AuditAction::ProjectUpdated,
                    id.to_string(),
                    changes.into_value(),
                )
                .await;
            Ok(project)
        }
        .await;
        self.ctx.observe(SERVICE, "update", result)
    }

    /// Soft-delete a project. Requires admin.
    ///
    /// # Errors
    /// `Conflict` while the project still has non-deleted connections.
    pub async fn delete(&self, auth: &AuthContext, id: ProjectId) -> ApiResult<()> {
        let result = async {
            let (project, _) = self.ctx.authorize_project(auth, id, Role::Admin).await?;
            let deleted = {
                let _workspace = self.ctx.workspace_locks.lock(&project.workspace_id).await;
                self.ctx.stores.projects.project_soft_delete(id).await?
            };
            self.ctx.cache.invalidate_project(id).await;

            self.ctx
                .audit
                .record(
                    project.workspace_id,
                    &auth.user_id,
                    AuditAction::ProjectDeleted,
                    id.to_string(),
                    json!({ "name": deleted.name }),
                )
                .await;
            info!(project_id = %id, workspace_id = %project.workspace_id, "Project deleted");
            Ok(())
        }
        .await;
        self.ctx.observe(SERVICE, "delete", result)
    }

    /// List projects.
    ///
    /// With a workspace in the filter the caller needs viewer on it. Without
    /// one the listing spans every workspace visible to the caller.
    pub async fn list(
        &self,
        auth: &AuthContext,
        mut filter: ProjectFilter,
    ) -> ApiResult<Page<Project>> {
        let result = async {
            filter.page = self
                .ctx
                .page(filter.page, self.ctx.config.default_page_size);
            match filter.workspace_id {
                Some(workspace_id) => {
                    self.ctx
                        .authorize_workspace(auth, workspace_id, Role::Viewer)
                        .await?;
                    filter.workspace_ids = None;
                }
                None => {
                    let visible = self.ctx.visible_workspace_ids(auth).await?;
                    if visible.is_empty() {
                        return Ok(Page::empty(filter.page));
                    }
                    filter.workspace_ids = Some(visible);
                }
            }

            let (items, total) = self.ctx.stores.projects.project_list(&filter).await?;
            Ok(Page::new(items, total, filter.page))
        }
        .await;
        self.ctx.observe(SERVICE, "list", result)
    }
}
