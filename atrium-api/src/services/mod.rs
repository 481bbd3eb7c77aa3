//! Service Layer
//!
//! Domain services for workspaces, projects, connections, members and the
//! audit trail. Every operation takes a verified [`AuthContext`], authorizes
//! against the caller's membership, reads through the resource cache,
//! writes through the stores, invalidates the cache and records an audit
//! entry, in that order.

mod audit_service;
mod connection_service;
mod member_service;
mod project_service;
mod workspace_service;

pub use audit_service::*;
pub use connection_service::*;
pub use member_service::*;
pub use project_service::*;
pub use workspace_service::*;

use crate::audit::AuditRecorder;
use crate::auth::{check_tenant_access, require_role, AuthContext};
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::locks::KeyedLocks;
use crate::telemetry::metrics::Outcome;
use crate::telemetry::AtriumMetrics;
use atrium_core::{
    AtriumConfig, Connection, ConnectionId, Membership, PageRequest, Project, ProjectId, Role,
    TenantId, Workspace, WorkspaceId,
};
use atrium_storage::cache::{CacheBackend, ResourceCache};
use atrium_storage::Stores;
use prometheus::Registry;
use std::sync::Arc;

/// Everything the services share: stores, cache, limits, audit and locks.
pub struct ServiceContext {
    pub stores: Stores,
    pub cache: ResourceCache,
    pub config: AtriumConfig,
    pub audit: AuditRecorder,
    pub metrics: AtriumMetrics,
    /// Serializes quota check and insert of workspaces per tenant.
    pub tenant_locks: KeyedLocks<TenantId>,
    /// Serializes project quota checks and owner-set changes per workspace.
    pub workspace_locks: KeyedLocks<WorkspaceId>,
}

impl ServiceContext {
    /// Context with inline audit writes.
    pub fn new(
        stores: Stores,
        cache_backend: Arc<dyn CacheBackend>,
        config: AtriumConfig,
        metrics: AtriumMetrics,
    ) -> Self {
        let audit = AuditRecorder::inline(stores.audit.clone(), metrics.clone());
        Self {
            cache: ResourceCache::new(cache_backend, config.cache_ttl),
            stores,
            config,
            audit,
            metrics,
            tenant_locks: KeyedLocks::new(),
            workspace_locks: KeyedLocks::new(),
        }
    }

    /// Move audit writes to a background task with a queue of `capacity`
    /// entries. Must run inside a Tokio runtime.
    pub fn with_background_audit(mut self, capacity: usize) -> Self {
        self.audit = AuditRecorder::background(
            self.stores.audit.clone(),
            self.metrics.clone(),
            capacity,
        );
        self
    }

    /// Wire a context from process configuration.
    pub fn from_api_config(
        stores: Stores,
        config: &ApiConfig,
        registry: Registry,
    ) -> ApiResult<Self> {
        config.validate()?;
        let backend = config.cache.build()?;
        let metrics = AtriumMetrics::new(registry)?;
        let context = Self::new(stores, backend, config.core.clone(), metrics);
        Ok(if config.audit_background {
            context.with_background_audit(config.audit_queue_capacity)
        } else {
            context
        })
    }

    /// Record the outcome of an operation and pass the result through.
    pub(crate) fn observe<T>(
        &self,
        service: &str,
        operation: &str,
        result: ApiResult<T>,
    ) -> ApiResult<T> {
        self.metrics
            .record_operation(service, operation, Outcome::of(&result));
        result
    }

    /// Normalize a caller page against the configured sizes.
    pub(crate) fn page(&self, page: PageRequest, default_size: u32) -> PageRequest {
        let normalized = PageRequest::with_default(page.page, page.page_size, default_size);
        PageRequest {
            page_size: normalized.page_size.min(self.config.max_page_size),
            ..normalized
        }
    }

    // ========================================================================
    // CACHE-ASIDE READS
    // ========================================================================

    pub(crate) async fn load_workspace(&self, id: WorkspaceId) -> ApiResult<Option<Workspace>> {
        if let Some(workspace) = self.cache.workspace(id).await {
            self.metrics.record_cache_lookup("workspace", true);
            return Ok(Some(workspace));
        }
        self.metrics.record_cache_lookup("workspace", false);
        let mark = self.cache.watermark();
        let workspace = self.stores.workspaces.workspace_get(id).await?;
        if let Some(ws) = &workspace {
            self.cache.put_workspace(ws, mark).await;
        }
        Ok(workspace)
    }

    pub(crate) async fn load_project(&self, id: ProjectId) -> ApiResult<Option<Project>> {
        if let Some(project) = self.cache.project(id).await {
            self.metrics.record_cache_lookup("project", true);
            return Ok(Some(project));
        }
        self.metrics.record_cache_lookup("project", false);
        let mark = self.cache.watermark();
        let project = self.stores.projects.project_get(id).await?;
        if let Some(p) = &project {
            self.cache.put_project(p, mark).await;
        }
        Ok(project)
    }

    /// Load a connection. On a miss the parent project is loaded too, so
    /// the entry can be indexed under its workspace.
    pub(crate) async fn load_connection(&self, id: ConnectionId) -> ApiResult<Option<Connection>> {
        if let Some(connection) = self.cache.connection(id).await {
            self.metrics.record_cache_lookup("connection", true);
            return Ok(Some(connection));
        }
        self.metrics.record_cache_lookup("connection", false);
        let mark = self.cache.watermark();
        let connection = self.stores.connections.connection_get(id).await?;
        if let Some(c) = &connection {
            if let Some(project) = self.load_project(c.project_id).await? {
                self.cache.put_connection(c, project.workspace_id, mark).await;
            }
        }
        Ok(connection)
    }

    // ========================================================================
    // STORE READS
    // ========================================================================

    /// Current row, bypassing the cache. Updates start from this copy.
    pub(crate) async fn fresh_workspace(&self, id: WorkspaceId) -> ApiResult<Workspace> {
        self.stores
            .workspaces
            .workspace_get(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Workspace", id))
    }

    pub(crate) async fn fresh_project(&self, id: ProjectId) -> ApiResult<Project> {
        self.stores
            .projects
            .project_get(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Project", id))
    }

    pub(crate) async fn fresh_connection(&self, id: ConnectionId) -> ApiResult<Connection> {
        self.stores
            .connections
            .connection_get(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Connection", id))
    }

    // ========================================================================
    // AUTHORIZATION
    // ========================================================================

    /// Steps 1 and 2 of every workspace-scoped operation.
    ///
    /// No membership or too low a role: `Unauthorized`. Membership in a
    /// deleted workspace: `NotFound`. Workspace of another tenant:
    /// `Unauthorized`.
    pub(crate) async fn authorize_workspace(
        &self,
        auth: &AuthContext,
        workspace_id: WorkspaceId,
        required: Role,
    ) -> ApiResult<(Workspace, Membership)> {
        let membership = self
            .stores
            .members
            .member_get(workspace_id, &auth.user_id)
            .await?;
        let membership = require_role(membership, required)?;
        let workspace = self
            .load_workspace(workspace_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Workspace", workspace_id))?;
        check_tenant_access(auth, &workspace)?;
        Ok((workspace, membership))
    }

    pub(crate) async fn authorize_project(
        &self,
        auth: &AuthContext,
        project_id: ProjectId,
        required: Role,
    ) -> ApiResult<(Project, Membership)> {
        let project = self
            .load_project(project_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Project", project_id))?;
        let (_, membership) = self
            .authorize_workspace(auth, project.workspace_id, required)
            .await?;
        Ok((project, membership))
    }

    pub(crate) async fn authorize_connection(
        &self,
        auth: &AuthContext,
        connection_id: ConnectionId,
        required: Role,
    ) -> ApiResult<(Connection, Project, Membership)> {
        let connection = self
            .load_connection(connection_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Connection", connection_id))?;
        let (project, membership) = self
            .authorize_project(auth, connection.project_id, required)
            .await?;
        Ok((connection, project, membership))
    }

    // ========================================================================
    // VISIBILITY
    // ========================================================================

    /// Non-deleted workspaces of the caller's tenant the caller belongs to.
    ///
    /// The user index holds every non-deleted workspace the user is a member
    /// of; it is filled from membership rows on a miss (empty lists too).
    pub(crate) async fn visible_workspaces(&self, auth: &AuthContext) -> ApiResult<Vec<Workspace>> {
        let ids = match self.cache.user_workspaces(&auth.user_id).await {
            Some(ids) => {
                self.metrics.record_cache_lookup("user_workspaces", true);
                ids
            }
            None => {
                self.metrics.record_cache_lookup("user_workspaces", false);
                let mark = self.cache.watermark();
                let memberships = self
                    .stores
                    .members
                    .member_list_by_user(&auth.user_id)
                    .await?;
                let mut ids = Vec::with_capacity(memberships.len());
                for membership in memberships {
                    if self.load_workspace(membership.workspace_id).await?.is_some() {
                        ids.push(membership.workspace_id);
                    }
                }
                ids.sort();
                self.cache
                    .put_user_workspaces(&auth.user_id, &ids, mark)
                    .await;
                ids
            }
        };

        let mut workspaces = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ws) = self.load_workspace(id).await? {
                if ws.tenant_id == auth.tenant_id {
                    workspaces.push(ws);
                }
            }
        }
        Ok(workspaces)
    }

    pub(crate) async fn visible_workspace_ids(
        &self,
        auth: &AuthContext,
    ) -> ApiResult<Vec<WorkspaceId>> {
        Ok(self
            .visible_workspaces(auth)
            .await?
            .into_iter()
            .map(|ws| ws.id)
            .collect())
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("config", &self.config)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

/// Restrict `visible` to the ids the caller asked for, if any.
pub(crate) fn narrow_ids(
    visible: Vec<WorkspaceId>,
    requested: Option<&[WorkspaceId]>,
) -> Vec<WorkspaceId> {
    match requested {
        Some(requested) => visible
            .into_iter()
            .filter(|id| requested.contains(id))
            .collect(),
        None => visible,
    }
}

// ============================================================================
// SERVICE BUNDLE
// ============================================================================

/// All domain services over one shared context.
#[derive(Debug, Clone)]
pub struct Services {
    pub workspaces: WorkspaceService,
    pub projects: ProjectService,
    pub connections: ConnectionService,
    pub members: MemberService,
    pub audit: AuditService,
    context: Arc<ServiceContext>,
}

impl Services {
    pub fn new(context: ServiceContext) -> Self {
        let context = Arc::new(context);
        Self {
            workspaces: WorkspaceService::new(context.clone()),
            projects: ProjectService::new(context.clone()),
            connections: ConnectionService::new(context.clone()),
            members: MemberService::new(context.clone()),
            audit: AuditService::new(context.clone()),
            context,
        }
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }
}
