//! Entity types for the workspace hierarchy

use crate::{
    ConnectionId, EntityIdType, ProjectId, Role, TenantId, Timestamp, UserId, ValidationError,
    WorkspaceId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Free-form settings attached to workspaces and projects.
pub type Settings = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Lifecycle state of a soft-deletable entity.
///
/// Soft-deleted entities are hidden from default reads and listings but kept
/// for audit lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Active,
    SoftDeleted { deleted_at: Timestamp },
}

impl Lifecycle {
    pub fn is_active(&self) -> bool {
        matches!(self, Lifecycle::Active)
    }

    pub fn deleted_at(&self) -> Option<Timestamp> {
        match self {
            Lifecycle::Active => None,
            Lifecycle::SoftDeleted { deleted_at } => Some(*deleted_at),
        }
    }

    /// Rebuild the state from a nullable deletion timestamp column.
    pub fn from_deleted_at(deleted_at: Option<Timestamp>) -> Self {
        match deleted_at {
            Some(deleted_at) => Lifecycle::SoftDeleted { deleted_at },
            None => Lifecycle::Active,
        }
    }
}

// ============================================================================
// PROJECT STATUS
// ============================================================================

/// Status of a project. Deletion is a lifecycle state, not a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ProjectStatus::Active),
            "archived" => Ok(ProjectStatus::Archived),
            _ => Err(ValidationError::InvalidValue {
                field: "status".to_string(),
                reason: format!("'{}' is not one of active, archived", s),
            }),
        }
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

/// Primary unit of collaboration, owned by a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: String,
    pub settings: Settings,
    pub created_by: UserId,
    pub lifecycle: Lifecycle,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Workspace {
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        description: impl Into<String>,
        settings: Settings,
        created_by: UserId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkspaceId::now_v7(),
            tenant_id,
            name: name.into(),
            description: description.into(),
            settings,
            created_by,
            lifecycle: Lifecycle::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }
}

/// Grouping of connections inside a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub description: String,
    pub status: ProjectStatus,
    pub settings: Settings,
    pub created_by: UserId,
    pub lifecycle: Lifecycle,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Project {
    pub fn new(
        workspace_id: WorkspaceId,
        name: impl Into<String>,
        description: impl Into<String>,
        settings: Settings,
        created_by: UserId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::now_v7(),
            workspace_id,
            name: name.into(),
            description: description.into(),
            status: ProjectStatus::Active,
            settings,
            created_by,
            lifecycle: Lifecycle::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }
}

/// Link from a project to one external base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub project_id: ProjectId,
    /// Identifier of the base in the external system.
    pub base_id: String,
    pub name: String,
    pub description: String,
    pub sync_enabled: bool,
    pub last_sync_at: Option<Timestamp>,
    pub lifecycle: Lifecycle,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Connection {
    pub fn new(
        project_id: ProjectId,
        base_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        sync_enabled: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ConnectionId::now_v7(),
            project_id,
            base_id: base_id.into(),
            name: name.into(),
            description: description.into(),
            sync_enabled,
            last_sync_at: None,
            lifecycle: Lifecycle::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }
}

/// A user's role inside a workspace. Removal is a hard delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub role: Role,
    pub joined_at: Timestamp,
}

impl Membership {
    pub fn new(workspace_id: WorkspaceId, user_id: UserId, role: Role) -> Self {
        Self {
            workspace_id,
            user_id,
            role,
            joined_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_round_trip_through_column() {
        let now = Utc::now();
        let state = Lifecycle::from_deleted_at(Some(now));
        assert!(!state.is_active());
        assert_eq!(state.deleted_at(), Some(now));
        assert_eq!(Lifecycle::from_deleted_at(None), Lifecycle::Active);
    }

    #[test]
    fn test_project_status_rejects_deleted() {
        assert!("deleted".parse::<ProjectStatus>().is_err());
        assert!(matches!(
            "Archived".parse::<ProjectStatus>(),
            Ok(ProjectStatus::Archived)
        ));
    }

    #[test]
    fn test_new_entities_start_active() {
        let ws = Workspace::new(
            TenantId::now_v7(),
            "Acme",
            "",
            Settings::new(),
            UserId::new("u"),
        );
        assert!(ws.is_active());
        assert_eq!(ws.created_at, ws.updated_at);

        let project = Project::new(ws.id, "p", "", Settings::new(), UserId::new("u"));
        assert_eq!(project.status, ProjectStatus::Active);

        let conn = Connection::new(project.id, "app123", "Base", "", true);
        assert!(conn.last_sync_at.is_none());
    }

    #[test]
    fn test_lifecycle_serializes_tagged() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(Lifecycle::Active)?;
        assert_eq!(json["state"], "active");
        Ok(())
    }
}
