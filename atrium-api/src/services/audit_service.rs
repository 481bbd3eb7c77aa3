//! Audit Service
//!
//! Read access to a workspace's audit trail and the retention sweep.
//! Entries outlive the workspace they describe, so the trail of a
//! soft-deleted workspace stays readable by its admins.

use std::sync::Arc;

use atrium_core::{AuditLogEntry, AuditLogFilter, Page, PageRequest, Role, WorkspaceFilter};
use chrono::{Duration, Utc};
use tracing::info;

use super::ServiceContext;
use crate::auth::{require_role, AuthContext};
use crate::error::{ApiError, ApiResult};

const SERVICE: &str = "audit";

/// Audit trail operations.
#[derive(Debug, Clone)]
pub struct AuditService {
    ctx: Arc<ServiceContext>,
}

impl AuditService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Entries of one workspace, newest first by default. Requires admin.
    pub async fn logs(
        &self,
        auth: &AuthContext,
        mut filter: AuditLogFilter,
    ) -> ApiResult<Page<AuditLogEntry>> {
        let result = async {
            let workspace_id = filter
                .workspace_id
                .ok_or_else(|| ApiError::missing_field("workspace_id"))?;
            let membership = self
                .ctx
                .stores
                .members
                .member_get(workspace_id, &auth.user_id)
                .await?;
            require_role(membership, Role::Admin)?;

            // Deleted workspaces included; only the tenant is checked here.
            let owned = WorkspaceFilter {
                tenant_id: Some(auth.tenant_id),
                ids: Some(vec![workspace_id]),
                include_deleted: true,
                page: PageRequest::new(1, 1),
                ..WorkspaceFilter::default()
            };
            let (_, total) = self.ctx.stores.workspaces.workspace_list(&owned).await?;
            if total == 0 {
                return Err(ApiError::unauthorized(
                    "Workspace belongs to another tenant",
                ));
            }

            filter.page = self
                .ctx
                .page(filter.page, self.ctx.config.audit_default_page_size);
            let (items, total) = self.ctx.stores.audit.audit_list(&filter).await?;
            Ok(Page::new(items, total, filter.page))
        }
        .await;
        self.ctx.observe(SERVICE, "logs", result)
    }

    /// Purge entries older than `days`, never fewer than the retention floor.
    /// Returns the number of entries removed.
    pub async fn cleanup(&self, days: u32) -> ApiResult<u64> {
        let result = async {
            let days = self.ctx.config.effective_retention_days(days);
            let cutoff = Utc::now() - Duration::days(i64::from(days));
            let purged = self.ctx.stores.audit.audit_purge_before(cutoff).await?;
            info!(retention_days = days, purged, "Audit trail purged");
            Ok(purged)
        }
        .await;
        self.ctx.observe(SERVICE, "cleanup", result)
    }
}
