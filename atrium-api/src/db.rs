//! PostgreSQL Store
//!
//! Connection pooling with deadpool-postgres and an implementation of every
//! store trait over the schema in `sql/schema.sql`.
//!
//! Uniqueness of names and base ids is enforced by partial unique indexes;
//! a unique violation surfaces as `Duplicate`. Rules that span rows (the
//! owner of a new workspace, the last owner, children on delete) run inside
//! one transaction with the affected rows locked.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use atrium_core::{
    normalize_search, AtriumError, AtriumResult, AuditLogEntry, AuditLogFilter, Connection,
    ConnectionFilter, ConnectionId, EntityIdType, EntityKind, Lifecycle, Membership, PageRequest,
    Project, ProjectFilter, ProjectId, Role, Settings, Sort, StorageError, TenantId, Timestamp,
    UserId, Workspace, WorkspaceFilter, WorkspaceId, WorkspaceStats,
};
use atrium_storage::{AuditLogStore, ConnectionStore, MembershipStore, ProjectStore, WorkspaceStore};
use chrono::Utc;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::{NoTls, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Schema applied by [`PgStore::migrate`].
pub const SCHEMA: &str = include_str!("../sql/schema.sql");

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long to wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "workspace_service_db".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 25,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("ATRIUM_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("ATRIUM_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("ATRIUM_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("ATRIUM_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("ATRIUM_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("ATRIUM_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("ATRIUM_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::internal_error(format!("Failed to create pool: {}", e)))
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn db_error(err: tokio_postgres::Error) -> AtriumError {
    StorageError::backend(err).into()
}

fn pool_error(err: deadpool_postgres::PoolError) -> AtriumError {
    StorageError::backend(format!("connection pool: {}", err)).into()
}

/// Map a write failure, turning a unique violation into `Duplicate`.
fn write_error(err: tokio_postgres::Error, entity: EntityKind, key: impl fmt::Display) -> AtriumError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        StorageError::duplicate(entity, key).into()
    } else {
        db_error(err)
    }
}

fn col<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> AtriumResult<T> {
    row.try_get(name).map_err(db_error)
}

fn count(row: &Row, idx: usize) -> AtriumResult<u64> {
    let value: i64 = row.try_get(idx).map_err(db_error)?;
    Ok(u64::try_from(value).unwrap_or(0))
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const WORKSPACE_COLUMNS: &str =
    "id, tenant_id, name, description, settings, created_by, created_at, updated_at, deleted_at";
const PROJECT_COLUMNS: &str = "id, workspace_id, name, description, status, settings, created_by, \
     created_at, updated_at, deleted_at";
const PROJECT_PARENT_SQL: &str =
    "SELECT id FROM workspaces WHERE id = $1 AND deleted_at IS NULL FOR SHARE";
const CONNECTION_PARENT_SQL: &str =
    "SELECT id FROM projects WHERE id = $1 AND deleted_at IS NULL FOR SHARE";
const CONNECTION_COLUMNS: &str = "id, project_id, base_id, name, description, sync_enabled, \
     last_sync_at, created_at, updated_at, deleted_at";
const MEMBER_COLUMNS: &str = "workspace_id, user_id, role, joined_at";
const AUDIT_COLUMNS: &str =
    "id, workspace_id, user_id, action, resource_type, resource_id, changes, created_at";

fn settings_from(value: JsonValue) -> Settings {
    match value {
        JsonValue::Object(map) => map,
        _ => Settings::new(),
    }
}

fn workspace_from_row(row: &Row) -> AtriumResult<Workspace> {
    Ok(Workspace {
        id: WorkspaceId::from(col::<Uuid>(row, "id")?),
        tenant_id: TenantId::from(col::<Uuid>(row, "tenant_id")?),
        name: col(row, "name")?,
        description: col(row, "description")?,
        settings: settings_from(col(row, "settings")?),
        created_by: UserId::new(col::<String>(row, "created_by")?),
        lifecycle: Lifecycle::from_deleted_at(col(row, "deleted_at")?),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn project_from_row(row: &Row) -> AtriumResult<Project> {
    Ok(Project {
        id: ProjectId::from(col::<Uuid>(row, "id")?),
        workspace_id: WorkspaceId::from(col::<Uuid>(row, "workspace_id")?),
        name: col(row, "name")?,
        description: col(row, "description")?,
        status: col::<String>(row, "status")?.parse()?,
        settings: settings_from(col(row, "settings")?),
        created_by: UserId::new(col::<String>(row, "created_by")?),
        lifecycle: Lifecycle::from_deleted_at(col(row, "deleted_at")?),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn connection_from_row(row: &Row) -> AtriumResult<Connection> {
    Ok(Connection {
        id: ConnectionId::from(col::<Uuid>(row, "id")?),
        project_id: ProjectId::from(col::<Uuid>(row, "project_id")?),
        base_id: col(row, "base_id")?,
        name: col(row, "name")?,
        description: col(row, "description")?,
        sync_enabled: col(row, "sync_enabled")?,
        last_sync_at: col(row, "last_sync_at")?,
        lifecycle: Lifecycle::from_deleted_at(col(row, "deleted_at")?),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn member_from_row(row: &Row) -> AtriumResult<Membership> {
    Ok(Membership {
        workspace_id: WorkspaceId::from(col::<Uuid>(row, "workspace_id")?),
        user_id: UserId::new(col::<String>(row, "user_id")?),
        role: Role::from_db_str(&col::<String>(row, "role")?)?,
        joined_at: col(row, "joined_at")?,
    })
}

fn audit_from_row(row: &Row) -> AtriumResult<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: col::<Uuid>(row, "id")?.into(),
        workspace_id: WorkspaceId::from(col::<Uuid>(row, "workspace_id")?),
        user_id: UserId::new(col::<String>(row, "user_id")?),
        action: col::<String>(row, "action")?.parse()?,
        resource_type: col::<String>(row, "resource_type")?.parse()?,
        resource_id: col(row, "resource_id")?,
        changes: col(row, "changes")?,
        created_at: col(row, "created_at")?,
    })
}

fn member_key(workspace_id: WorkspaceId, user_id: &UserId) -> String {
    format!("{}/{}", workspace_id, user_id)
}

// ============================================================================
// DYNAMIC FILTERS
// ============================================================================

/// WHERE clause under construction, with its positional parameters.
#[derive(Default)]
struct Conditions {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql + Sync + Send>>,
}

impl Conditions {
    /// Add a parameter and return its placeholder.
    fn bind<T: ToSql + Sync + Send + 'static>(&mut self, value: T) -> String {
        self.params.push(Box::new(value));
        format!("${}", self.params.len())
    }

    fn and(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn eq<T: ToSql + Sync + Send + 'static>(&mut self, column: &str, value: Option<T>) {
        if let Some(value) = value {
            let p = self.bind(value);
            self.and(format!("{} = {}", column, p));
        }
    }

    fn active_only(&mut self, include_deleted: bool) {
        if !include_deleted {
            self.and("deleted_at IS NULL".to_string());
        }
    }

    /// Case-insensitive substring match over any of `columns`.
    fn search(&mut self, search: Option<&str>, columns: &[&str]) {
        if let Some(needle) = normalize_search(search) {
            let p = self.bind(needle);
            let any: Vec<String> = columns
                .iter()
                .map(|c| format!("strpos(lower({}), {}) > 0", c, p))
                .collect();
            self.and(format!("({})", any.join(" OR ")));
        }
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

fn order_by(sort: Sort) -> String {
    format!(
        "{column} {dir}, id {dir}",
        column = sort.field.as_column(),
        dir = sort.order.as_sql()
    )
}

fn uuids<T: EntityIdType>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(EntityIdType::as_uuid).collect()
}

// ============================================================================
// STORE
// ============================================================================

/// Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Create missing tables and indexes.
    pub async fn migrate(&self) -> AtriumResult<()> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA).await.map_err(db_error)?;
        debug!("Schema applied");
        Ok(())
    }

    async fn client(&self) -> AtriumResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Count the filtered rows, then fetch one ordered page of them.
    async fn paged(
        &self,
        table: &str,
        columns: &str,
        mut conditions: Conditions,
        order: String,
        page: PageRequest,
    ) -> AtriumResult<(Vec<Row>, u64)> {
        let client = self.client().await?;
        let where_sql = conditions.where_clause();

        let count_sql = format!("SELECT COUNT(*) FROM {}{}", table, where_sql);
        let total_row = client
            .query_one(count_sql.as_str(), &conditions.params())
            .await
            .map_err(db_error)?;
        let total = count(&total_row, 0)?;

        let limit = conditions.bind(i64::try_from(page.limit()).unwrap_or(i64::MAX));
        let offset = conditions.bind(i64::try_from(page.offset()).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {} LIMIT {} OFFSET {}",
            columns, table, where_sql, order, limit, offset
        );
        let rows = client
            .query(sql.as_str(), &conditions.params())
            .await
            .map_err(db_error)?;
        Ok((rows, total))
    }
}

impl fmt::Debug for PgStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgStore")
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

// ============================================================================
// WORKSPACES
// ============================================================================

#[async_trait]
impl WorkspaceStore for PgStore {
    async fn workspace_create_with_owner(
        &self,
        workspace: &Workspace,
        owner: &Membership,
    ) -> AtriumResult<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(db_error)?;

        tx.execute(
        "INSERT INTO workspaces (id, tenant_id, name, description, settings, created_by, \
         created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        &[
            &workspace.id.as_uuid(),
            &workspace.tenant_id.as_uuid(),
            &workspace.name,
            &workspace.description,
            &JsonValue::Object(workspace.settings.clone()),
            &workspace.created_by.as_str(),
            &workspace.created_at,
            &workspace.updated_at,
        ],
    )
    .await
    .map_err(|e| write_error(e, EntityKind::Workspace, &workspace.name))?;

        tx.execute(
        "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at) \
         VALUES ($1, $2, $3, $4)",
        &[
            &owner.workspace_id.as_uuid(),
            &owner.user_id.as_str(),
            &owner.role.as_db_str(),
            &owner.joined_at,
        ],
    )
    .await
    .map_err(|e| write_error(e, EntityKind::Member, member_key(owner.workspace_id, &owner.user_id)))?;

        tx.commit().await.map_err(db_error)
    }

    async fn workspace_get(&self, id: WorkspaceId) -> AtriumResult<Option<Workspace>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM workspaces WHERE id = $1 AND deleted_at IS NULL",
            WORKSPACE_COLUMNS
        );
        client
            .query_opt(sql.as_str(), &[&id.as_uuid()])
            .await
            .map_err(db_error)?
            .as_ref()
            .map(workspace_from_row)
            .transpose()
    }

    async fn workspace_update(&self, workspace: &Workspace) -> AtriumResult<()> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE workspaces SET name = $2, description = $3, settings = $4, updated_at = $5 \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[
                    &workspace.id.as_uuid(),
                    &workspace.name,
                    &workspace.description,
                    &JsonValue::Object(workspace.settings.clone()),
                    &workspace.updated_at,
                ],
            )
            .await
            .map_err(|e| write_error(e, EntityKind::Workspace, &workspace.name))?;
        if updated == 0 {
            return Err(StorageError::not_found(EntityKind::Workspace, workspace.id).into());
        }
        Ok(())
    }

    async fn workspace_soft_delete(&self, id: WorkspaceId) -> AtriumResult<Workspace> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(db_error)?;

        let locked = tx
            .query_opt(
                "SELECT id FROM workspaces WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
                &[&id.as_uuid()],
            )
            .await
            .map_err(db_error)?;
        if locked.is_none() {
            return Err(StorageError::not_found(EntityKind::Workspace, id).into());
        }

        let row = tx
            .query_one(
                "SELECT COUNT(*) FROM projects WHERE workspace_id = $1 AND deleted_at IS NULL",
                &[&id.as_uuid()],
            )
            .await
            .map_err(db_error)?;
        let children = count(&row, 0)?;
        if children > 0 {
            return Err(StorageError::HasChildren {
                entity: EntityKind::Workspace,
                id: id.to_string(),
                children,
            }
            .into());
        }

        let sql = format!(
            "UPDATE workspaces SET deleted_at = $2, updated_at = $2 WHERE id = $1 RETURNING {}",
            WORKSPACE_COLUMNS
        );
        let row = tx
            .query_one(sql.as_str(), &[&id.as_uuid(), &Utc::now()])
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        workspace_from_row(&row)
    }

    async fn workspace_list(&self, filter: &WorkspaceFilter) -> AtriumResult<(Vec<Workspace>, u64)> {
        let mut conditions = Conditions::default();
        conditions.active_only(filter.include_deleted);
        conditions.eq("tenant_id", filter.tenant_id.map(|t| t.as_uuid()));
        conditions.eq(
            "created_by",
            filter.created_by.as_ref().map(|u| u.as_str().to_string()),
        );
        if let Some(ids) = &filter.ids {
            let p = conditions.bind(uuids(ids));
            conditions.and(format!("id = ANY({})", p));
        }
        conditions.search(filter.search.as_deref(), &["name", "description"]);

        let (rows, total) = self
            .paged(
                "workspaces",
                WORKSPACE_COLUMNS,
                conditions,
                order_by(filter.sort),
                filter.page,
            )
            .await?;
        let items = rows.iter().map(workspace_from_row).collect::<AtriumResult<_>>()?;
        Ok((items, total))
    }

    async fn workspace_count_active(&self, tenant_id: TenantId) -> AtriumResult<u64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM workspaces WHERE tenant_id = $1 AND deleted_at IS NULL",
                &[&tenant_id.as_uuid()],
            )
            .await
            .map_err(db_error)?;
        count(&row, 0)
    }

    async fn workspace_stats(&self, tenant_id: TenantId) -> AtriumResult<WorkspaceStats> {
        let client = self.client().await?;
        let tenant = tenant_id.as_uuid();

        let workspaces = client
            .query_one(
                "SELECT COUNT(*), COUNT(*) FILTER (WHERE deleted_at IS NULL) \
                 FROM workspaces WHERE tenant_id = $1",
                &[&tenant],
            )
            .await
            .map_err(db_error)?;

        let by_status = client
            .query(
                "SELECT p.status, COUNT(*) FROM projects p \
                 JOIN workspaces w ON w.id = p.workspace_id \
                 WHERE w.tenant_id = $1 AND p.deleted_at IS NULL GROUP BY p.status",
                &[&tenant],
            )
            .await
            .map_err(db_error)?;

        let connections = client
            .query_one(
                "SELECT COUNT(*) FROM airtable_bases c \
                 JOIN projects p ON p.id = c.project_id \
                 JOIN workspaces w ON w.id = p.workspace_id \
                 WHERE w.tenant_id = $1 AND c.deleted_at IS NULL AND p.deleted_at IS NULL",
                &[&tenant],
            )
            .await
            .map_err(db_error)?;

        let mut projects_by_status = BTreeMap::new();
        for row in &by_status {
            let status: String = row.try_get(0).map_err(db_error)?;
            projects_by_status.insert(status, count(row, 1)?);
        }
        let total_projects: u64 = projects_by_status.values().sum();
        let active_projects = projects_by_status.get("active").copied().unwrap_or(0);

        Ok(WorkspaceStats {
            tenant_id,
            total_workspaces: count(&workspaces, 0)?,
            active_workspaces: count(&workspaces, 1)?,
            total_projects,
            active_projects,
            total_connections: count(&connections, 0)?,
            projects_by_status,
            last_updated: Utc::now(),
        })
    }
}

// ============================================================================
// PROJECTS
// ============================================================================

#[async_trait]
impl ProjectStore for PgStore {
    async fn project_insert(&self, project: &Project) -> AtriumResult<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(db_error)?;

        // Holds off a concurrent soft delete of the parent until commit.
        let parent = tx
            .query_opt(PROJECT_PARENT_SQL, &[&project.workspace_id.as_uuid()])
            .await
            .map_err(db_error)?;
        if parent.is_none() {
            return Err(StorageError::not_found(EntityKind::Workspace, project.workspace_id).into());
        }

        tx.execute(
            "INSERT INTO projects (id, workspace_id, name, description, status, settings, \
             created_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &project.id.as_uuid(),
                &project.workspace_id.as_uuid(),
                &project.name,
                &project.description,
                &project.status.as_db_str(),
                &JsonValue::Object(project.settings.clone()),
                &project.created_by.as_str(),
                &project.created_at,
                &project.updated_at,
            ],
        )
        .await
        .map_err(|e| write_error(e, EntityKind::Project, &project.name))?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn project_get(&self, id: ProjectId) -> AtriumResult<Option<Project>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM projects WHERE id = $1 AND deleted_at IS NULL",
            PROJECT_COLUMNS
        );
        client
            .query_opt(sql.as_str(), &[&id.as_uuid()])
            .await
            .map_err(db_error)?
            .as_ref()
            .map(project_from_row)
            .transpose()
    }

    async fn project_update(&self, project: &Project) -> AtriumResult<()> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE projects SET name = $2, description = $3, status = $4, settings = $5, \
                 updated_at = $6 WHERE id = $1 AND deleted_at IS NULL",
                &[
                    &project.id.as_uuid(),
                    &project.name,
                    &project.description,
                    &project.status.as_db_str(),
                    &JsonValue::Object(project.settings.clone()),
                    &project.updated_at,
                ],
            )
            .await
            .map_err(|e| write_error(e, EntityKind::Project, &project.name))?;
        if updated == 0 {
            return Err(StorageError::not_found(EntityKind::Project, project.id).into());
        }
        Ok(())
    }

    async fn project_soft_delete(&self, id: ProjectId) -> AtriumResult<Project> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(db_error)?;

        let locked = tx
            .query_opt(
                "SELECT id FROM projects WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
                &[&id.as_uuid()],
            )
            .await
            .map_err(db_error)?;
        if locked.is_none() {
            return Err(StorageError::not_found(EntityKind::Project, id).into());
        }

        let row = tx
            .query_one(
                "SELECT COUNT(*) FROM airtable_bases WHERE project_id = $1 AND deleted_at IS NULL",
                &[&id.as_uuid()],
            )
            .await
            .map_err(db_error)?;
        let children = count(&row, 0)?;
        if children > 0 {
            return Err(StorageError::HasChildren {
                entity: EntityKind::Project,
                id: id.to_string(),
                children,
            }
            .into());
        }

        let sql = format!(
            "UPDATE projects SET deleted_at = $2, updated_at = $2 WHERE id = $1 RETURNING {}",
            PROJECT_COLUMNS
        );
        let row = tx
            .query_one(sql.as_str(), &[&id.as_uuid(), &Utc::now()])
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        project_from_row(&row)
    }

    async fn project_list(&self, filter: &ProjectFilter) -> AtriumResult<(Vec<Project>, u64)> {
        let mut conditions = Conditions::default();
        conditions.active_only(filter.include_deleted);
        conditions.eq("workspace_id", filter.workspace_id.map(|w| w.as_uuid()));
        if let Some(ids) = &filter.workspace_ids {
            let p = conditions.bind(uuids(ids));
            conditions.and(format!("workspace_id = ANY({})", p));
        }
        conditions.eq("status", filter.status.map(|s| s.as_db_str().to_string()));
        conditions.eq(
            "created_by",
            filter.created_by.as_ref().map(|u| u.as_str().to_string()),
        );
        conditions.search(filter.search.as_deref(), &["name", "description"]);

        let (rows, total) = self
            .paged(
                "projects",
                PROJECT_COLUMNS,
                conditions,
                order_by(filter.sort),
                filter.page,
            )
            .await?;
        let items = rows.iter().map(project_from_row).collect::<AtriumResult<_>>()?;
        Ok((items, total))
    }

    async fn project_count_active(&self, workspace_id: WorkspaceId) -> AtriumResult<u64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM projects WHERE workspace_id = $1 AND deleted_at IS NULL",
                &[&workspace_id.as_uuid()],
            )
            .await
            .map_err(db_error)?;
        count(&row, 0)
    }
}

// ============================================================================
// CONNECTIONS
// ============================================================================

#[async_trait]
impl ConnectionStore for PgStore {
    async fn connection_insert(&self, connection: &Connection) -> AtriumResult<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(db_error)?;

        let parent = tx
            .query_opt(CONNECTION_PARENT_SQL, &[&connection.project_id.as_uuid()])
            .await
            .map_err(db_error)?;
        if parent.is_none() {
            return Err(StorageError::not_found(EntityKind::Project, connection.project_id).into());
        }

        tx.execute(
            "INSERT INTO airtable_bases (id, project_id, base_id, name, description, \
             sync_enabled, last_sync_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &connection.id.as_uuid(),
                &connection.project_id.as_uuid(),
                &connection.base_id,
                &connection.name,
                &connection.description,
                &connection.sync_enabled,
                &connection.last_sync_at,
                &connection.created_at,
                &connection.updated_at,
            ],
        )
        .await
        .map_err(|e| write_error(e, EntityKind::Connection, &connection.base_id))?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn connection_get(&self, id: ConnectionId) -> AtriumResult<Option<Connection>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM airtable_bases WHERE id = $1 AND deleted_at IS NULL",
            CONNECTION_COLUMNS
        );
        client
            .query_opt(sql.as_str(), &[&id.as_uuid()])
            .await
            .map_err(db_error)?
            .as_ref()
            .map(connection_from_row)
            .transpose()
    }

    async fn connection_update(&self, connection: &Connection) -> AtriumResult<()> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE airtable_bases SET name = $2, description = $3, sync_enabled = $4, \
                 updated_at = $5 WHERE id = $1 AND deleted_at IS NULL",
                &[
                    &connection.id.as_uuid(),
                    &connection.name,
                    &connection.description,
                    &connection.sync_enabled,
                    &connection.updated_at,
                ],
            )
            .await
            .map_err(db_error)?;
        if updated == 0 {
            return Err(StorageError::not_found(EntityKind::Connection, connection.id).into());
        }
        Ok(())
    }

    async fn connection_soft_delete(&self, id: ConnectionId) -> AtriumResult<Connection> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE airtable_bases SET deleted_at = $2, updated_at = $2 \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {}",
            CONNECTION_COLUMNS
        );
        let row = client
            .query_opt(sql.as_str(), &[&id.as_uuid(), &Utc::now()])
            .await
            .map_err(db_error)?
            .ok_or_else(|| StorageError::not_found(EntityKind::Connection, id))?;
        connection_from_row(&row)
    }

    async fn connection_list(
        &self,
        filter: &ConnectionFilter,
    ) -> AtriumResult<(Vec<Connection>, u64)> {
        let mut conditions = Conditions::default();
        conditions.active_only(filter.include_deleted);
        conditions.eq("project_id", filter.project_id.map(|p| p.as_uuid()));
        conditions.eq("sync_enabled", filter.sync_enabled);
        conditions.search(filter.search.as_deref(), &["name", "description", "base_id"]);

        let (rows, total) = self
            .paged(
                "airtable_bases",
                CONNECTION_COLUMNS,
                conditions,
                order_by(filter.sort),
                filter.page,
            )
            .await?;
        let items = rows.iter().map(connection_from_row).collect::<AtriumResult<_>>()?;
        Ok((items, total))
    }

    async fn connection_count_active(&self, project_id: ProjectId) -> AtriumResult<u64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM airtable_bases WHERE project_id = $1 AND deleted_at IS NULL",
                &[&project_id.as_uuid()],
            )
            .await
            .map_err(db_error)?;
        count(&row, 0)
    }

    async fn connection_touch_sync(
        &self,
        id: ConnectionId,
        at: Timestamp,
    ) -> AtriumResult<Connection> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE airtable_bases SET last_sync_at = $2, updated_at = $2 \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {}",
            CONNECTION_COLUMNS
        );
        let row = client
            .query_opt(sql.as_str(), &[&id.as_uuid(), &at])
            .await
            .map_err(db_error)?
            .ok_or_else(|| StorageError::not_found(EntityKind::Connection, id))?;
        connection_from_row(&row)
    }
}

// ============================================================================
// MEMBERSHIPS
// ============================================================================

/// Lock every membership row of a workspace and return them.
async fn lock_members(
    tx: &deadpool_postgres::Transaction<'_>,
    workspace_id: WorkspaceId,
) -> AtriumResult<Vec<Membership>> {
    let sql = format!(
        "SELECT {} FROM workspace_members WHERE workspace_id = $1 FOR UPDATE",
        MEMBER_COLUMNS
    );
    tx.query(sql.as_str(), &[&workspace_id.as_uuid()])
        .await
        .map_err(db_error)?
        .iter()
        .map(member_from_row)
        .collect()
}

fn owner_count(members: &[Membership]) -> usize {
    members.iter().filter(|m| m.role.is_owner()).count()
}

#[async_trait]
impl MembershipStore for PgStore {
    async fn member_add(&self, membership: &Membership) -> AtriumResult<()> {
        let client = self.client().await?;
        let inserted = client
            .execute(
                "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at) \
                 SELECT $1, $2, $3, $4 \
                 WHERE EXISTS (SELECT 1 FROM workspaces WHERE id = $1 AND deleted_at IS NULL)",
                &[
                    &membership.workspace_id.as_uuid(),
                    &membership.user_id.as_str(),
                    &membership.role.as_db_str(),
                    &membership.joined_at,
                ],
            )
            .await
            .map_err(|e| {
                write_error(
                    e,
                    EntityKind::Member,
                    member_key(membership.workspace_id, &membership.user_id),
                )
            })?;
        if inserted == 0 {
            return Err(
                StorageError::not_found(EntityKind::Workspace, membership.workspace_id).into(),
            );
        }
        Ok(())
    }

    async fn member_get(
        &self,
        workspace_id: WorkspaceId,
        user_id: &UserId,
    ) -> AtriumResult<Option<Membership>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM workspace_members WHERE workspace_id = $1 AND user_id = $2",
            MEMBER_COLUMNS
        );
        client
            .query_opt(sql.as_str(), &[&workspace_id.as_uuid(), &user_id.as_str()])
            .await
            .map_err(db_error)?
            .as_ref()
            .map(member_from_row)
            .transpose()
    }

    async fn member_update_role(
        &self,
        workspace_id: WorkspaceId,
        user_id: &UserId,
        role: Role,
    ) -> AtriumResult<Membership> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(db_error)?;

        let members = lock_members(&tx, workspace_id).await?;
        let previous = members
            .iter()
            .find(|m| &m.user_id == user_id)
            .cloned()
            .ok_or_else(|| {
                StorageError::not_found(EntityKind::Member, member_key(workspace_id, user_id))
            })?;
        if previous.role.is_owner() && !role.is_owner() && owner_count(&members) <= 1 {
            return Err(StorageError::LastOwner { workspace_id }.into());
        }

        tx.execute(
        "UPDATE workspace_members SET role = $3 WHERE workspace_id = $1 AND user_id = $2",
        &[&workspace_id.as_uuid(), &user_id.as_str(), &role.as_db_str()],
    )
    .await
    .map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;
    Ok(previous)
}

async fn member_remove(
    &self,
    workspace_id: WorkspaceId,
    user_id: &UserId,
) -> AtriumResult<Membership> {
    let mut client = self.client().await?;
    let tx = client.transaction().await.map_err(db_error)?;

    let members = lock_members(&tx, workspace_id).await?;
    let existing = members
        .iter()
        .find(|m| &m.user_id == user_id)
        .cloned()
        .ok_or_else(|| {
            StorageError::not_found(EntityKind::Member, member_key(workspace_id, user_id))
        })?;
    if existing.role.is_owner() && owner_count(&members) <= 1 {
        return Err(StorageError::LastOwner { workspace_id }.into());
    }

    tx.execute(
        "DELETE FROM workspace_members WHERE workspace_id = $1 AND user_id = $2",
        &[&workspace_id.as_uuid(), &user_id.as_str()],
    )
    .await
    .map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;
    Ok(existing)
}

async fn member_list(
    &self,
    workspace_id: WorkspaceId,
    page: PageRequest,
) -> AtriumResult<(Vec<Membership>, u64)> {
    let mut conditions = Conditions::default();
    conditions.eq("workspace_id", Some(workspace_id.as_uuid()));
    let (rows, total) = self
        .paged(
            "workspace_members",
            MEMBER_COLUMNS,
            conditions,
            "joined_at DESC, user_id ASC".to_string(),
            page,
        )
        .await?;
    let items = rows.iter().map(member_from_row).collect::<AtriumResult<_>>()?;
    Ok((items, total))
}

async fn member_list_all(&self, workspace_id: WorkspaceId) -> AtriumResult<Vec<Membership>> {
    let client = self.client().await?;
    let sql = format!(
        "SELECT {} FROM workspace_members WHERE workspace_id = $1",
        MEMBER_COLUMNS
    );
    client
        .query(sql.as_str(), &[&workspace_id.as_uuid()])
        .await
        .map_err(db_error)?
        .iter()
        .map(member_from_row)
        .collect()
}

async fn member_list_by_user(&self, user_id: &UserId) -> AtriumResult<Vec<Membership>> {
    let client = self.client().await?;
    let sql = format!(
        "SELECT {} FROM workspace_members WHERE user_id = $1",
        MEMBER_COLUMNS
    );
    client
        .query(sql.as_str(), &[&user_id.as_str()])
        .await
        .map_err(db_error)?
        .iter()
        .map(member_from_row)
        .collect()
}

async fn member_count_owners(&self, workspace_id: WorkspaceId) -> AtriumResult<u64> {
    let client = self.client().await?;
    let row = client
        .query_one(
            "SELECT COUNT(*) FROM workspace_members WHERE workspace_id = $1 AND role = 'owner'",
            &[&workspace_id.as_uuid()],
        )
        .await
        .map_err(db_error)?;
    count(&row, 0)
}
}

// ============================================================================
// AUDIT LOG
// ============================================================================

#[async_trait]
impl AuditLogStore for PgStore {
async fn audit_append(&self, entry: &AuditLogEntry) -> AtriumResult<()> {
    let client = self.client().await?;
    client
        .execute(
            "INSERT INTO workspace_audit_logs (id, workspace_id, user_id, action, \
             resource_type, resource_id, changes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &entry.id.as_uuid(),
                &entry.workspace_id.as_uuid(),
                &entry.user_id.as_str(),
                &entry.action.as_db_str(),
                &entry.resource_type.as_db_str(),
                &entry.resource_id,
                &entry.changes,
                &entry.created_at,
            ],
        )
        .await
        .map_err(|e| write_error(e, EntityKind::AuditLog, entry.id))?;
        Ok(())
    }

    async fn audit_list(
        &self,
        filter: &AuditLogFilter,
    ) -> AtriumResult<(Vec<AuditLogEntry>, u64)> {
        let mut conditions = Conditions::default();
        conditions.eq("workspace_id", filter.workspace_id.map(|w| w.as_uuid()));
        conditions.eq(
            "user_id",
            filter.user_id.as_ref().map(|u| u.as_str().to_string()),
        );
        conditions.eq("action", filter.action.map(|a| a.as_db_str().to_string()));
        conditions.eq(
            "resource_type",
            filter.resource_type.map(|r| r.as_db_str().to_string()),
        );
        conditions.eq("resource_id", filter.resource_id.clone());

        let order = format!(
            "created_at {dir}, id {dir}",
            dir = filter.order.as_sql()
        );
        let (rows, total) = self
            .paged(
                "workspace_audit_logs",
                AUDIT_COLUMNS,
                conditions,
                order,
                filter.page,
            )
            .await?;
        let items = rows.iter().map(audit_from_row).collect::<AtriumResult<_>>()?;
        Ok((items, total))
    }

    async fn audit_purge_before(&self, cutoff: Timestamp) -> AtriumResult<u64> {
        let client = self.client().await?;
        client
            .execute(
                "DELETE FROM workspace_audit_logs WHERE created_at < $1",
                &[&cutoff],
            )
            .await
            .map_err(db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::{SortField, SortOrder};

    #[test]
    fn test_db_config_default() {
        let config = DbConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "workspace_service_db");
        assert_eq!(config.max_size, 25);
    }

    #[test]
    fn test_conditions_number_placeholders() {
        let mut conditions = Conditions::default();
        conditions.active_only(false);
        conditions.eq("tenant_id", Some(Uuid::nil()));
        conditions.eq::<String>("created_by", None);
        conditions.search(Some("  Acme "), &["name", "description"]);

        assert_eq!(
            conditions.where_clause(),
            " WHERE deleted_at IS NULL AND tenant_id = $1 AND \
             (strpos(lower(name), $2) > 0 OR strpos(lower(description), $2) > 0)"
        );
        assert_eq!(conditions.params().len(), 2);
    }

    #[test]
    fn test_blank_search_adds_nothing() {
        let mut conditions = Conditions::default();
        conditions.search(Some("   "), &["name"]);
        conditions.active_only(true);
        assert_eq!(conditions.where_clause(), "");
    }

    #[test]
    fn test_order_by_breaks_ties_on_id() {
        assert_eq!(
            order_by(Sort::new(SortField::Name, SortOrder::Asc)),
            "name ASC, id ASC"
        );
        assert_eq!(order_by(Sort::default()), "created_at DESC, id DESC");
    }

    #[test]
    fn test_settings_from_non_object_is_empty() {
        assert!(settings_from(JsonValue::Null).is_empty());
        let mut map = Settings::new();
        map.insert("color".to_string(), JsonValue::from("blue"));
        assert_eq!(settings_from(JsonValue::Object(map.clone())), map);
    }

    #[test]
    fn test_schema_declares_partial_unique_indexes() {
        assert!(SCHEMA.contains("workspaces_tenant_name_key"));
        assert!(SCHEMA.contains("projects_workspace_name_key"));
        assert!(SCHEMA.contains("airtable_bases_project_base_key"));
        assert_eq!(SCHEMA.matches("WHERE deleted_at IS NULL").count(), 4);
    }

    #[test]
    fn test_hard_delete_cascades_to_children() {
        assert_eq!(SCHEMA.matches("REFERENCES").count(), 3);
        assert_eq!(SCHEMA.matches("ON DELETE CASCADE").count(), 3);
    }

    #[test]
    fn test_child_insert_takes_shared_lock_on_live_parent() {
        for sql in [PROJECT_PARENT_SQL, CONNECTION_PARENT_SQL] {
            assert!(sql.contains("deleted_at IS NULL"));
            assert!(sql.ends_with("FOR SHARE"));
        }
        assert!(PROJECT_PARENT_SQL.contains("FROM workspaces"));
        assert!(CONNECTION_PARENT_SQL.contains("FROM projects"));
    }
}
