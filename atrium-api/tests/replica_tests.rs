//! Two service processes sharing one store and one cache backend.
//!
//! Each process keeps its own invalidation journal, so an invalidation that
//! fails in one leaves a stale entry the other will read until it expires.
//! Writes must still start from the stored row.

use std::sync::Arc;

use atrium_api::ApiResult;
use atrium_core::{
    AtriumConfig, CreateConnectionRequest, CreateProjectRequest, ProjectStatus,
    UpdateConnectionRequest, UpdateProjectRequest, UpdateWorkspaceRequest,
};
use atrium_storage::{ConnectionStore, ProjectStore, WorkspaceStore};
use atrium_test_utils::FlakyCacheBackend;

#[path = "support/services.rs"]
mod services_support;
use services_support::{create_workspace, harness_with, replica, tenant, user};

#[tokio::test]
async fn test_update_after_missed_invalidation_keeps_other_replica_rename() -> ApiResult<()> {
    let cache = Arc::new(FlakyCacheBackend::new());
    let a = harness_with(AtriumConfig::default(), None, cache.clone());
    let b = replica(&a, cache.clone());
    let owner = user(tenant(), "owner");
    let ws = create_workspace(&a, &owner, "Acme").await;

    // A caches the workspace.
    assert_eq!(a.services.workspaces.get(&owner, ws.id).await?.name, "Acme");

    cache.set_fail_writes(true);
    b.workspaces
        .update(
            &owner,
            ws.id,
            UpdateWorkspaceRequest {
                name: Some("Renamed".to_string()),
                ..UpdateWorkspaceRequest::default()
            },
        )
        .await?;
    cache.set_fail_writes(false);

    // A still holds the old name in cache; its update must not write it back.
    let updated = a
        .services
        .workspaces
        .update(
            &owner,
            ws.id,
            UpdateWorkspaceRequest {
                description: Some("from A".to_string()),
                ..UpdateWorkspaceRequest::default()
            },
        )
        .await?;
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.description, "from A");

    let stored = a.store.workspace_get(ws.id).await?;
    assert_eq!(
        stored.map(|w| (w.name, w.description)),
        Some(("Renamed".to_string(), "from A".to_string()))
    );
    assert_eq!(b.workspaces.get(&owner, ws.id).await?.name, "Renamed");
    Ok(())
}

#[tokio::test]
async fn test_project_update_after_missed_invalidation() -> ApiResult<()> {
    let cache = Arc::new(FlakyCacheBackend::new());
    let a = harness_with(AtriumConfig::default(), None, cache.clone());
    let b = replica(&a, cache.clone());
    let owner = user(tenant(), "owner");
    let ws = create_workspace(&a, &owner, "Projects").await;
    let project = a
        .services
        .projects
        .create(&owner, ws.id, CreateProjectRequest::new("Draft"))
        .await?;
    assert_eq!(a.services.projects.get(&owner, project.id).await?.name, "Draft");

    cache.set_fail_writes(true);
    b.projects
        .update(
            &owner,
            project.id,
            UpdateProjectRequest {
                name: Some("Final".to_string()),
                ..UpdateProjectRequest::default()
            },
        )
        .await?;
    cache.set_fail_writes(false);

    let archived = a
        .services
        .projects
        .update(
            &owner,
            project.id,
            UpdateProjectRequest {
                status: Some(ProjectStatus::Archived),
                ..UpdateProjectRequest::default()
            },
        )
        .await?;
    assert_eq!(archived.name, "Final");
    assert_eq!(archived.status, ProjectStatus::Archived);

    let stored = a.store.project_get(project.id).await?;
    assert_eq!(
        stored.map(|p| (p.name, p.status)),
        Some(("Final".to_string(), ProjectStatus::Archived))
    );

    // Each replica reads its own write back.
    let seen = a.services.projects.get(&owner, project.id).await?;
    assert_eq!((seen.name.as_str(), seen.status), ("Final", ProjectStatus::Archived));
    Ok(())
}

#[tokio::test]
async fn test_connection_update_after_missed_invalidation() -> ApiResult<()> {
    let cache = Arc::new(FlakyCacheBackend::new());
    let a = harness_with(AtriumConfig::default(), None, cache.clone());
    let b = replica(&a, cache.clone());
    let owner = user(tenant(), "owner");
    let ws = create_workspace(&a, &owner, "Bases").await;
    let project = a
        .services
        .projects
        .create(&owner, ws.id, CreateProjectRequest::new("Sync"))
        .await?;
    let connection = a
        .services
        .connections
        .create(&owner, project.id, CreateConnectionRequest::new("appOne", "Orders"))
        .await?;
    assert!(a.services.connections.get(&owner, connection.id).await?.sync_enabled);

    cache.set_fail_writes(true);
    b.connections
        .update(
            &owner,
            connection.id,
            UpdateConnectionRequest {
                name: Some("Orders 2024".to_string()),
                ..UpdateConnectionRequest::default()
            },
        )
        .await?;
    cache.set_fail_writes(false);

    let paused = a
        .services
        .connections
        .update(
            &owner,
            connection.id,
            UpdateConnectionRequest {
                sync_enabled: Some(false),
                ..UpdateConnectionRequest::default()
            },
        )
        .await?;
    assert_eq!(paused.name, "Orders 2024");
    assert!(!paused.sync_enabled);

    let stored = a.store.connection_get(connection.id).await?;
    assert_eq!(
        stored.map(|c| (c.name, c.sync_enabled)),
        Some(("Orders 2024".to_string(), false))
    );
    let seen = a.services.connections.get(&owner, connection.id).await?;
    assert_eq!(seen.name, "Orders 2024");
    assert!(!seen.sync_enabled);
    Ok(())
}

#[tokio::test]
async fn test_replicas_see_each_others_writes_when_invalidation_succeeds() -> ApiResult<()> {
    let cache = Arc::new(FlakyCacheBackend::new());
    let a = harness_with(AtriumConfig::default(), None, cache.clone());
    let b = replica(&a, cache.clone());
    let owner = user(tenant(), "owner");
    let ws = create_workspace(&a, &owner, "Shared").await;
    let project = a
        .services
        .projects
        .create(&owner, ws.id, CreateProjectRequest::new("One"))
        .await?;
    assert_eq!(b.projects.get(&owner, project.id).await?.name, "One");

    a.services
        .projects
        .update(
            &owner,
            project.id,
            UpdateProjectRequest {
                name: Some("Two".to_string()),
                ..UpdateProjectRequest::default()
            },
        )
        .await?;
    assert_eq!(b.projects.get(&owner, project.id).await?.name, "Two");
    Ok(())
}
