//! Caller identity and workspace authorization.
//!
//! Token verification happens in front of this crate; services receive an
//! already-verified [`AuthContext`]. This module turns a membership row into
//! an allow/deny decision.

use crate::error::{ApiError, ApiResult};
use atrium_core::{Membership, Role, TenantId, UserId, Workspace};

/// Verified caller identity handed to every service operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Tenant the caller acts within
    pub tenant_id: TenantId,

    /// Caller's user identifier
    pub user_id: UserId,
}

impl AuthContext {
    pub fn new(tenant_id: TenantId, user_id: impl Into<UserId>) -> Self {
        Self {
            tenant_id,
            user_id: user_id.into(),
        }
    }

    /// True when the context acts for `user_id`.
    pub fn is_user(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }
}

/// Check that a workspace belongs to the caller's tenant.
///
/// A workspace of another tenant is reported exactly like a missing
/// membership so that its existence is not revealed.
pub fn check_tenant_access(auth: &AuthContext, workspace: &Workspace) -> ApiResult<()> {
    if workspace.tenant_id == auth.tenant_id {
        Ok(())
    } else {
        Err(ApiError::unauthorized("Not a member of this workspace"))
    }
}

/// Resolve the caller's membership against a required role.
///
/// No membership and an insufficient role both yield `Unauthorized`.
pub fn require_role(membership: Option<Membership>, required: Role) -> ApiResult<Membership> {
    match membership {
        Some(member) if member.role.satisfies(required) => Ok(member),
        Some(member) => Err(ApiError::unauthorized(format!(
            "Role {} does not grant {} access",
            member.role, required
        ))),
        None => Err(ApiError::unauthorized("Not a member of this workspace")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use atrium_core::{EntityIdType, Settings, WorkspaceId};

    fn member(role: Role) -> Membership {
        Membership::new(WorkspaceId::now_v7(), UserId::new("u"), role)
    }

    #[test]
    fn test_require_role_accepts_higher_role() -> ApiResult<()> {
        let member = require_role(Some(member(Role::Owner)), Role::Admin)?;
        assert_eq!(member.role, Role::Owner);
        Ok(())
    }

    #[test]
    fn test_require_role_rejects_lower_role() {
        let result = require_role(Some(member(Role::Viewer)), Role::Member);
        assert!(matches!(result, Err(e) if e.is(ErrorCode::Unauthorized)));
    }

    #[test]
    fn test_missing_membership_is_unauthorized() {
        let result = require_role(None, Role::Viewer);
        assert!(matches!(result, Err(e) if e.is(ErrorCode::Unauthorized)));
    }

    #[test]
    fn test_foreign_tenant_is_unauthorized() {
        let auth = AuthContext::new(TenantId::now_v7(), "u");
        let ws = Workspace::new(
            TenantId::now_v7(),
            "Other",
            "",
            Settings::new(),
            UserId::new("u"),
        );
        assert!(check_tenant_access(&auth, &ws).is_err());
    }
}
