//! Member Service
//!
//! Membership management. Besides the admin requirement, only an owner may
//! grant or revoke the owner role or act on another owner. The store refuses
//! any change that would leave a workspace without an owner. Membership
//! writes are serialized per workspace and re-check the actor's role under
//! that lock.

use std::sync::Arc;

use atrium_core::{
    AddMemberRequest, AuditAction, Membership, Page, PageRequest, Role, UpdateMemberRoleRequest,
    UserId, Workspace, WorkspaceId,
};
use serde_json::json;
use tracing::{debug, info};

use super::ServiceContext;
use crate::auth::{require_role, AuthContext};
use crate::error::{ApiError, ApiResult, ErrorCode};

const SERVICE: &str = "member";

fn require_owner_for(actor: &Membership, action: &str) -> ApiResult<()> {
    if actor.role.is_owner() {
        Ok(())
    } else {
        Err(ApiError::unauthorized(format!("Only an owner may {}", action)))
    }
}

/// Membership operations.
#[derive(Debug, Clone)]
pub struct MemberService {
    ctx: Arc<ServiceContext>,
}

impl MemberService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// The caller's membership as stored right now. Role checks that guard a
    /// write run on this, with the workspace lock held.
    async fn current_actor(
        &self,
        auth: &AuthContext,
        workspace_id: WorkspaceId,
        required: Role,
    ) -> ApiResult<Membership> {
        let membership = self
            .ctx
            .stores
            .members
            .member_get(workspace_id, &auth.user_id)
            .await?;
        require_role(membership, required)
    }

    /// Add a user to a workspace. Requires admin; granting owner requires owner.
    ///
    /// # Errors
    /// `DuplicateResource` when the user is already a member.
    pub async fn add(
        &self,
        auth: &AuthContext,
        workspace_id: WorkspaceId,
        req: AddMemberRequest,
    ) -> ApiResult<Membership> {
        let result = async {
            req.validate()?;
            self.ctx
                .authorize_workspace(auth, workspace_id, Role::Admin)
                .await?;

            let membership = {
                let _workspace = self.ctx.workspace_locks.lock(&workspace_id).await;
                let actor = self.current_actor(auth, workspace_id, Role::Admin).await?;
                if req.role.is_owner() {
                    require_owner_for(&actor, "grant the owner role")?;
                }
                let membership = Membership::new(workspace_id, req.user_id, req.role);
                self.ctx.stores.members.member_add(&membership).await?;
                membership
            };
            self.ctx
                .cache
                .invalidate_user_index(&membership.user_id)
                .await;

            self.ctx
                .audit
                .record(
                    workspace_id,
                    &auth.user_id,
                    AuditAction::MemberAdded,
                    membership.user_id.to_string(),
                    json!({ "user_id": membership.user_id, "role": membership.role }),
                )
                .await;
            info!(
                workspace_id = %workspace_id,
                user_id = %membership.user_id,
                role = %membership.role,
                "Member added"
            );
            Ok(membership)
        }
        .await;
        self.ctx.observe(SERVICE, "add", result)
    }

    /// Change a member's role. Requires admin.
    ///
    /// Setting the role a member already holds is a no-op.
    ///
    /// # Errors
    /// `NotFound` for a non-member target, `LastOwner` when the only owner
    /// would be demoted.
    pub async fn update_role(
        &self,
        auth: &AuthContext,
        workspace_id: WorkspaceId,
        user_id: &UserId,
        req: UpdateMemberRoleRequest,
    ) -> ApiResult<Membership> {
        let result = async {
            self.ctx
                .authorize_workspace(auth, workspace_id, Role::Admin)
                .await?;

            let _workspace = self.ctx.workspace_locks.lock(&workspace_id).await;
            let actor = self.current_actor(auth, workspace_id, Role::Admin).await?;
            let target = self
                .ctx
                .stores
                .members
                .member_get(workspace_id, user_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Member", user_id))?;
            if target.role.is_owner() {
                require_owner_for(&actor, "change the role of an owner")?;
            }
            if req.role.is_owner() {
                require_owner_for(&actor, "grant the owner role")?;
            }
            if target.role == req.role {
                return Ok(target);
            }

            let previous = self
                .ctx
                .stores
                .members
                .member_update_role(workspace_id, user_id, req.role)
                .await
                .map_err(ApiError::from)
                .inspect_err(|e| {
                    if e.is(ErrorCode::LastOwner) {
                        debug!(workspace_id = %workspace_id, user_id = %user_id, "Refused to demote last owner");
                    }
                })?;
            self.ctx.cache.invalidate_user_index(user_id).await;

            self.ctx
                .audit
                .record(
                    workspace_id,
                    &auth.user_id,
                    AuditAction::MemberRoleUpdated,
                    user_id.to_string(),
                    json!({
                        "user_id": user_id,
                        "old_role": previous.role,
                        "new_role": req.role,
                    }),
                )
                .await;
            info!(
                workspace_id = %workspace_id,
                user_id = %user_id,
                old_role = %previous.role,
                new_role = %req.role,
                "Member role updated"
            );
            Ok(Membership {
                role: req.role,
                ..previous
            })
        }
        .await;
        self.ctx.observe(SERVICE, "update_role", result)
    }

    /// Remove a member.
    ///
    /// Anyone may remove themselves. Removing someone else requires admin,
    /// and removing an owner requires owner. The last owner cannot leave.
    pub async fn remove(
        &self,
        auth: &AuthContext,
        workspace_id: WorkspaceId,
        user_id: &UserId,
    ) -> ApiResult<()> {
        let result = async {
            self.ctx
                .authorize_workspace(auth, workspace_id, Role::Viewer)
                .await?;

            let _workspace = self.ctx.workspace_locks.lock(&workspace_id).await;
            if !auth.is_user(user_id) {
                let actor = self.current_actor(auth, workspace_id, Role::Admin).await?;
                let target = self
                    .ctx
                    .stores
                    .members
                    .member_get(workspace_id, user_id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("Member", user_id))?;
                if target.role.is_owner() {
                    require_owner_for(&actor, "remove an owner")?;
                }
            }

            let removed = self
                .ctx
                .stores
                .members
                .member_remove(workspace_id, user_id)
                .await
                .map_err(ApiError::from)
                .inspect_err(|e| {
                    if e.is(ErrorCode::LastOwner) {
                        debug!(workspace_id = %workspace_id, user_id = %user_id, "Refused to remove last owner");
                    }
                })?;
            self.ctx.cache.invalidate_user_index(user_id).await;

            self.ctx
                .audit
                .record(
                    workspace_id,
                    &auth.user_id,
                    AuditAction::MemberRemoved,
                    user_id.to_string(),
                    json!({ "user_id": user_id, "role": removed.role }),
                )
                .await;
            info!(workspace_id = %workspace_id, user_id = %user_id, "Member removed");
            Ok(())
        }
        .await;
        self.ctx.observe(SERVICE, "remove", result)
    }

    /// Members of a workspace, most recently joined first. Requires viewer.
    pub async fn list(
        &self,
        auth: &AuthContext,
        workspace_id: WorkspaceId,
        page: PageRequest,
    ) -> ApiResult<Page<Membership>> {
        let result = async {
            self.ctx
                .authorize_workspace(auth, workspace_id, Role::Viewer)
                .await?;
            let page = self.ctx.page(page, self.ctx.config.default_page_size);
            let (items, total) = self
                .ctx
                .stores
                .members
                .member_list(workspace_id, page)
                .await?;
            Ok(Page::new(items, total, page))
        }
        .await;
        self.ctx.observe(SERVICE, "list", result)
    }

    /// Non-deleted workspaces of the caller's tenant the caller belongs to.
    pub async fn user_workspaces(&self, auth: &AuthContext) -> ApiResult<Vec<Workspace>> {
        let result = self.ctx.visible_workspaces(auth).await;
        self.ctx.observe(SERVICE, "user_workspaces", result)
    }
}
