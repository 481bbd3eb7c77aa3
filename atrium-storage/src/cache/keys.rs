//! Cache key layout.
//!
//! | Key | Value |
//! |---|---|
//! | `workspace:<id>` | workspace |
//! | `workspace:children:<id>` | keys cached under the workspace |
//! | `project:<id>` | project |
//! | `connection:<id>` | connection |
//! | `user:workspaces:<user>` | IDs of the user's workspaces |

use atrium_core::{ConnectionId, ProjectId, UserId, WorkspaceId};
use std::fmt;

const WORKSPACE: &str = "workspace:";
const WORKSPACE_CHILDREN: &str = "workspace:children:";
const PROJECT: &str = "project:";
const CONNECTION: &str = "connection:";
const USER_WORKSPACES: &str = "user:workspaces:";

/// Prefixes covering every key this crate writes.
pub const KEY_PREFIXES: [&str; 4] = [WORKSPACE, PROJECT, CONNECTION, USER_WORKSPACES];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Workspace(WorkspaceId),
    WorkspaceChildren(WorkspaceId),
    Project(ProjectId),
    Connection(ConnectionId),
    UserWorkspaces(UserId),
}

impl CacheKey {
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse an encoded key. Unknown layouts yield `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        if let Some(rest) = raw.strip_prefix(WORKSPACE_CHILDREN) {
            return rest.parse().ok().map(CacheKey::WorkspaceChildren);
        }
        if let Some(rest) = raw.strip_prefix(WORKSPACE) {
            return rest.parse().ok().map(CacheKey::Workspace);
        }
        if let Some(rest) = raw.strip_prefix(PROJECT) {
            return rest.parse().ok().map(CacheKey::Project);
        }
        if let Some(rest) = raw.strip_prefix(CONNECTION) {
            return rest.parse().ok().map(CacheKey::Connection);
        }
        raw.strip_prefix(USER_WORKSPACES)
            .filter(|user| !user.is_empty())
            .map(|user| CacheKey::UserWorkspaces(UserId::new(user)))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Workspace(id) => write!(f, "{WORKSPACE}{id}"),
            CacheKey::WorkspaceChildren(id) => write!(f, "{WORKSPACE_CHILDREN}{id}"),
            CacheKey::Project(id) => write!(f, "{PROJECT}{id}"),
            CacheKey::Connection(id) => write!(f, "{CONNECTION}{id}"),
            CacheKey::UserWorkspaces(user) => write!(f, "{USER_WORKSPACES}{user}"),
        }
    }
}
