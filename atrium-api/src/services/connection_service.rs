//! Connection Service
//!
//! External base connections attached to a project. A connection is
//! identified within its project by the external base id.

use std::sync::Arc;

use atrium_core::{
    AuditAction, ChangeSet, Connection, ConnectionFilter, ConnectionId, CreateConnectionRequest,
    Page, ProjectId, Role, UpdateConnectionRequest,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use super::ServiceContext;
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};

const SERVICE: &str = "connection";

/// Connection operations.
#[derive(Debug, Clone)]
pub struct ConnectionService {
    ctx: Arc<ServiceContext>,
}

impl ConnectionService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Connect a base to a project. Requires member.
    ///
    /// # Errors
    /// `DuplicateResource` when the base is already connected to the project.
    pub async fn create(
        &self,
        auth: &AuthContext,
        project_id: ProjectId,
        mut req: CreateConnectionRequest,
    ) -> ApiResult<Connection> {
        let result = async {
            req.validate()?;
            let (project, _) = self
                .ctx
                .authorize_project(auth, project_id, Role::Member)
                .await?;

            let connection = {
                let _workspace = self.ctx.workspace_locks.lock(&project.workspace_id).await;
                let connection = Connection::new(
                    project_id,
                    req.base_id,
                    req.name,
                    req.description,
                    req.sync_enabled,
                );
                self.ctx
                    .stores
                    .connections
                    .connection_insert(&connection)
                    .await?;
                connection
            };

            self.ctx
                .audit
                .record(
                    project.workspace_id,
                    &auth.user_id,
                    AuditAction::ConnectionConnected,
                    connection.id.to_string(),
                    json!({
                        "base_id": connection.base_id,
                        "name": connection.name,
                        "project_id": project_id,
                        "sync_enabled": connection.sync_enabled,
                    }),
                )
                .await;
            info!(
                connection_id = %connection.id,
                project_id = %project_id,
                base_id = %connection.base_id,
                "Base connected"
            );
            Ok(connection)
        }
        .await;
        self.ctx.observe(SERVICE, "create", result)
    }

    pub async fn get(&self, auth: &AuthContext, id: ConnectionId) -> ApiResult<Connection> {
        let result = self
            .ctx
            .authorize_connection(auth, id, Role::Viewer)
            .await
            .map(|(connection, _, _)| connection);
        self.ctx.observe(SERVICE, "get", result)
    }

    /// Apply a partial update to the stored row. Requires member.
    pub async fn update(
        &self,
        auth: &AuthContext,
        id: ConnectionId,
        mut req: UpdateConnectionRequest,
    ) -> ApiResult<Connection> {
        let result = async {
            req.validate()?;
            let (_, project, _) = self
                .ctx
                .authorize_connection(auth, id, Role::Member)
                .await?;
            let _workspace = self.ctx.workspace_locks.lock(&project.workspace_id).await;
            let mut connection = self.ctx.fresh_connection(id).await?;

            let mut changes = ChangeSet::new();
            if let Some(name) = req.name {
                if changes.track("name", &connection.name, &name) {
                    connection.name = name;
                }
            }
            if let Some(description) = req.description {
                if changes.track("description", &connection.description, &description) {
                    connection.description = description;
                }
            }
            if let Some(sync_enabled) = req.sync_enabled {
                if changes.track("sync_enabled", &connection.sync_enabled, &sync_enabled) {
                    connection.sync_enabled = sync_enabled;
                }
            }
            if changes.is_empty() {
                return Ok(connection);
            }

            connection.updated_at = Utc::now();
            self.ctx
                .stores
                .connections
                .connection_update(&connection)
                .await?;
            self.ctx.cache.invalidate_connection(id).await;
            self.ctx
                .audit
                .record(
                    project.workspace_id,
                    &auth.user_id,
                    AuditAction::ConnectionUpdated,
                    id.to_string(),
                    changes.into_value(),
                )
                .await;
            Ok(connection)
        }
        .await;
        self.ctx.observe(SERVICE, "update", result)
    }

    /// Disconnect a base. Requires admin.
    pub async fn delete(&self, auth: &AuthContext, id: ConnectionId) -> ApiResult<()> {
        let result = async {
            let (_, project, _) = self
                .ctx
                .authorize_connection(auth, id, Role::Admin)
                .await?;
            let deleted = self
                .ctx
                .stores
                .connections
                .connection_soft_delete(id)
                .await?;
            self.ctx.cache.invalidate_connection(id).await;

            self.ctx
                .audit
                .record(
                    project.workspace_id,
                    &auth.user_id,
                    AuditAction::ConnectionDisconnected,
                    id.to_string(),
                    json!({ "base_id": deleted.base_id, "name": deleted.name }),
                )
                .await;
            info!(connection_id = %id, project_id = %project.id, "Base disconnected");
            Ok(())
        }
        .await;
        self.ctx.observe(SERVICE, "delete", result)
    }

    /// Connections of one project. The filter must name the project.
    pub async fn list(
        &self,
        auth: &AuthContext,
        mut filter: ConnectionFilter,
    ) -> ApiResult<Page<Connection>> {
        let result = async {
            let project_id = filter
                .project_id
                .ok_or_else(|| ApiError::missing_field("project_id"))?;
            self.ctx
                .authorize_project(auth, project_id, Role::Viewer)
                .await?;
            filter.page = self
                .ctx
                .page(filter.page, self.ctx.config.default_page_size);

            let (items, total) = self
                .ctx
                .stores
                .connections
                .connection_list(&filter)
                .await?;
            Ok(Page::new(items, total, filter.page))
        }
        .await;
        self.ctx.observe(SERVICE, "list", result)
    }

    /// Stamp the last synchronization time of a connection.
    ///
    /// Called by the sync worker, which runs outside any user context.
    pub async fn record_sync(&self, id: ConnectionId) -> ApiResult<Connection> {
        let result = async {
            let connection = self
                .ctx
                .stores
                .connections
                .connection_touch_sync(id, Utc::now())
                .await?;
            self.ctx.cache.invalidate_connection(id).await;
            info!(
                connection_id = %id,
                last_sync_at = ?connection.last_sync_at,
                "Connection sync recorded"
            );
            Ok(connection)
        }
        .await;
        self.ctx.observe(SERVICE, "record_sync", result)
    }
}
