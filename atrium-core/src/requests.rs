//! Typed requests handed to the domain services.
//!
//! Transport-level parsing happens elsewhere; the value rules (name length,
//! required identifiers) live here so every entry point applies them.

use crate::{ProjectStatus, Role, Settings, UserId, ValidationError};
use serde::{Deserialize, Serialize};

/// Maximum length of names, in characters.
pub const MAX_NAME_LEN: usize = 255;

/// Trim and check a name: 1..=255 characters.
pub fn validate_name(field: &str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(trimmed.to_string())
}

fn validate_optional_name(field: &str, value: &mut Option<String>) -> Result<(), ValidationError> {
    if let Some(name) = value.as_deref() {
        *value = Some(validate_name(field, name)?);
    }
    Ok(())
}

fn default_sync_enabled() -> bool {
    true
}

// ============================================================================
// WORKSPACES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub settings: Settings,
}

impl CreateWorkspaceRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Validate and normalize in place.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        self.name = validate_name("name", &self.name)?;
        Ok(())
    }
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateWorkspaceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub settings: Option<Settings>,
}

impl UpdateWorkspaceRequest {
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        validate_optional_name("name", &mut self.name)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.settings.is_none()
    }
}

// ============================================================================
// PROJECTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub settings: Settings,
}

impl CreateProjectRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&mut self) -> Result<(), ValidationError> {
        self.name = validate_name("name", &self.name)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub settings: Option<Settings>,
}

impl UpdateProjectRequest {
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        validate_optional_name("name", &mut self.name)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.settings.is_none()
    }
}

// ============================================================================
// CONNECTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateConnectionRequest {
    pub base_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_sync_enabled")]
    pub sync_enabled: bool,
}

impl CreateConnectionRequest {
    pub fn new(base_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            base_id: base_id.into(),
            name: name.into(),
            description: String::new(),
            sync_enabled: true,
        }
    }

    pub fn validate(&mut self) -> Result<(), ValidationError> {
        let base_id = self.base_id.trim();
        if base_id.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "base_id".to_string(),
            });
        }
        self.base_id = base_id.to_string();
        self.name = validate_name("name", &self.name)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateConnectionRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sync_enabled: Option<bool>,
}

impl UpdateConnectionRequest {
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        validate_optional_name("name", &mut self.name)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.sync_enabled.is_none()
    }
}

// ============================================================================
// MEMBERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: UserId,
    pub role: Role,
}

impl AddMemberRequest {
    pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.as_str().trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "user_id".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub role: Role,
}
