//! Audit trail vocabulary and change payloads.

use crate::{AuditLogId, EntityIdType, Timestamp, UserId, ValidationError, WorkspaceId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "workspace.created")]
    WorkspaceCreated,
    #[serde(rename = "workspace.updated")]
    WorkspaceUpdated,
    #[serde(rename = "workspace.deleted")]
    WorkspaceDeleted,
    #[serde(rename = "project.created")]
    ProjectCreated,
    #[serde(rename = "project.updated")]
    ProjectUpdated,
    #[serde(rename = "project.deleted")]
    ProjectDeleted,
    #[serde(rename = "airtable_base.connected")]
    ConnectionConnected,
    #[serde(rename = "airtable_base.updated")]
    ConnectionUpdated,
    #[serde(rename = "airtable_base.disconnected")]
    ConnectionDisconnected,
    #[serde(rename = "member.added")]
    MemberAdded,
    #[serde(rename = "member.role_updated")]
    MemberRoleUpdated,
    #[serde(rename = "member.removed")]
    MemberRemoved,
}

impl AuditAction {
    pub const ALL: [AuditAction; 12] = [
        AuditAction::WorkspaceCreated,
        AuditAction::WorkspaceUpdated,
        AuditAction::WorkspaceDeleted,
        AuditAction::ProjectCreated,
        AuditAction::ProjectUpdated,
        AuditAction::ProjectDeleted,
        AuditAction::ConnectionConnected,
        AuditAction::ConnectionUpdated,
        AuditAction::ConnectionDisconnected,
        AuditAction::MemberAdded,
        AuditAction::MemberRoleUpdated,
        AuditAction::MemberRemoved,
    ];

    pub fn as_db_str(&self) -> &'static str {
        match self {
            AuditAction::WorkspaceCreated => "workspace.created",
            AuditAction::WorkspaceUpdated => "workspace.updated",
            AuditAction::WorkspaceDeleted => "workspace.deleted",
            AuditAction::ProjectCreated => "project.created",
            AuditAction::ProjectUpdated => "project.updated",
            AuditAction::ProjectDeleted => "project.deleted",
            AuditAction::ConnectionConnected => "airtable_base.connected",
            AuditAction::ConnectionUpdated => "airtable_base.updated",
            AuditAction::ConnectionDisconnected => "airtable_base.disconnected",
            AuditAction::MemberAdded => "member.added",
            AuditAction::MemberRoleUpdated => "member.role_updated",
            AuditAction::MemberRemoved => "member.removed",
        }
    }

    /// Resource kind the action applies to.
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            AuditAction::WorkspaceCreated
            | AuditAction::WorkspaceUpdated
            | AuditAction::WorkspaceDeleted => ResourceKind::Workspace,
            AuditAction::ProjectCreated
            | AuditAction::ProjectUpdated
            | AuditAction::ProjectDeleted => ResourceKind::Project,
            AuditAction::ConnectionConnected
            | AuditAction::ConnectionUpdated
            | AuditAction::ConnectionDisconnected => ResourceKind::Connection,
            AuditAction::MemberAdded
            | AuditAction::MemberRoleUpdated
            | AuditAction::MemberRemoved => ResourceKind::Member,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for AuditAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .into_iter()
            .find(|action| action.as_db_str() == s)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "action".to_string(),
                reason: format!("unknown audit action '{}'", s),
            })
    }
}

/// Resource type column of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "workspace")]
    Workspace,
    #[serde(rename = "project")]
    Project,
    #[serde(rename = "airtable_base")]
    Connection,
    #[serde(rename = "workspace_member")]
    Member,
}

impl ResourceKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ResourceKind::Workspace => "workspace",
            ResourceKind::Project => "project",
            ResourceKind::Connection => "airtable_base",
            ResourceKind::Member => "workspace_member",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workspace" => Ok(ResourceKind::Workspace),
            "project" => Ok(ResourceKind::Project),
            "airtable_base" => Ok(ResourceKind::Connection),
            "workspace_member" => Ok(ResourceKind::Member),
            _ => Err(ValidationError::InvalidValue {
                field: "resource_type".to_string(),
                reason: format!("unknown resource type '{}'", s),
            }),
        }
    }
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditLogId,
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub action: AuditAction,
    pub resource_type: ResourceKind,
    pub resource_id: String,
    /// Action-specific payload; `{field: {old, new}}` for updates.
    pub changes: Value,
    pub created_at: Timestamp,
}

impl AuditLogEntry {
    pub fn new(
        workspace_id: WorkspaceId,
        user_id: UserId,
        action: AuditAction,
        resource_id: impl Into<String>,
        changes: Value,
    ) -> Self {
        Self {
            id: AuditLogId::now_v7(),
            workspace_id,
            user_id,
            action,
            resource_type: action.resource_kind(),
            resource_id: resource_id.into(),
            changes,
            created_at: Utc::now(),
        }
    }
}

/// Builder for `{field: {old, new}}` update payloads.
///
/// Fields whose old and new values are equal are not recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    fields: Map<String, Value>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field change. Returns true when the values differ.
    pub fn track<T: Serialize + PartialEq>(&mut self, field: &str, old: &T, new: &T) -> bool {
        if old == new {
            return false;
        }
        let mut pair = Map::new();
        pair.insert("old".to_string(), to_value(old));
        pair.insert("new".to_string(), to_value(new));
        self.fields.insert(field.to_string(), Value::Object(pair));
        true
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_strings_round_trip() -> Result<(), ValidationError> {
        for action in AuditAction::ALL {
            assert_eq!(action.as_db_str().parse::<AuditAction>()?, action);
        }
        Ok(())
    }

    #[test]
    fn test_action_serde_matches_db_str() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(AuditAction::MemberRoleUpdated)?;
        assert_eq!(value, json!("member.role_updated"));
        Ok(())
    }

    #[test]
    fn test_resource_kind_of_actions() {
        assert_eq!(
            AuditAction::ConnectionDisconnected.resource_kind(),
            ResourceKind::Connection
        );
        assert_eq!(ResourceKind::Connection.as_db_str(), "airtable_base");
        assert_eq!(
            AuditAction::MemberAdded.resource_kind().as_db_str(),
            "workspace_member"
        );
    }

    #[test]
    fn test_change_set_skips_unchanged_fields() {
        let mut changes = ChangeSet::new();
        assert!(!changes.track("name", &"Acme", &"Acme"));
        assert!(changes.is_empty());

        assert!(changes.track("name", &"Acme", &"Acme Corp"));
        assert!(changes.track("sync_enabled", &true, &false));
        assert_eq!(changes.len(), 2);

        let value = changes.into_value();
        assert_eq!(value["name"], json!({"old": "Acme", "new": "Acme Corp"}));
        assert_eq!(value["sync_enabled"]["new"], json!(false));
    }

    #[test]
    fn test_entry_derives_resource_type() {
        let entry = AuditLogEntry::new(
            WorkspaceId::now_v7(),
            UserId::new("u"),
            AuditAction::ProjectCreated,
            "p-1",
            json!({"name": "p"}),
        );
        assert_eq!(entry.resource_type, ResourceKind::Project);
    }
}
