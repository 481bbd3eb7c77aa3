//! End-to-end scenarios over the in-memory store.

use atrium_api::{ApiResult, ErrorCode};
use atrium_core::{
    AddMemberRequest, AuditAction, AuditLogFilter, CreateConnectionRequest, CreateProjectRequest,
    ProjectFilter, Role, UpdateWorkspaceRequest, WorkspaceFilter,
};

#[path = "support/services.rs"]
mod services_support;
use services_support::{create_workspace, harness, tenant, user};

#[tokio::test]
async fn test_workspace_lifecycle_end_to_end() -> ApiResult<()> {
    let h = harness();
    let tenant_id = tenant();
    let u = user(tenant_id, "user-u");
    let v = user(tenant_id, "user-v");

    let acme = create_workspace(&h, &u, "Acme").await;
    assert_eq!(
        h.services.workspaces.check_access(&u, acme.id, Role::Owner).await?,
        Role::Owner
    );

    h.services
        .members
        .add(&u, acme.id, AddMemberRequest::new("user-v", Role::Member))
        .await?;

    let project = h
        .services
        .projects
        .create(&u, acme.id, CreateProjectRequest::new("Roadmap"))
        .await?;

    // V is only a member.
    let denied = h.services.workspaces.delete(&v, acme.id).await;
    assert!(matches!(denied, Err(e) if e.is(ErrorCode::Unauthorized)));

    // Still has a project.
    let blocked = h.services.workspaces.delete(&u, acme.id).await;
    assert!(matches!(blocked, Err(e) if e.is(ErrorCode::Conflict)));

    h.services.projects.delete(&u, project.id).await?;
    h.services.workspaces.delete(&u, acme.id).await?;

    let listed = h
        .services
        .workspaces
        .list(&u, WorkspaceFilter::default())
        .await?;
    assert!(listed.items.iter().all(|ws| ws.id != acme.id));
    assert_eq!(listed.total, 0);

    let gone = h.services.workspaces.get(&u, acme.id).await;
    assert!(matches!(gone, Err(e) if e.is(ErrorCode::NotFound)));

    let trail = h
        .services
        .audit
        .logs(&u, AuditLogFilter::for_workspace(acme.id))
        .await?;
    let actions: Vec<AuditAction> = trail.items.iter().map(|e| e.action).collect();
    assert_eq!(trail.total, 5);
    assert_eq!(actions[0], AuditAction::WorkspaceDeleted);
    assert!(actions.contains(&AuditAction::WorkspaceCreated));
    assert!(actions.contains(&AuditAction::MemberAdded));
    assert!(actions.contains(&AuditAction::ProjectCreated));
    assert!(actions.contains(&AuditAction::ProjectDeleted));

    // V is not an admin, even of a deleted workspace.
    let hidden = h
        .services
        .audit
        .logs(&v, AuditLogFilter::for_workspace(acme.id))
        .await;
    assert!(matches!(hidden, Err(e) if e.is(ErrorCode::Unauthorized)));
    Ok(())
}

#[tokio::test]
async fn test_non_member_sees_unauthorized_not_not_found() -> ApiResult<()> {
    let h = harness();
    let tenant_id = tenant();
    let owner = user(tenant_id, "owner");
    let stranger = user(tenant_id, "stranger");
    let ws = create_workspace(&h, &owner, "Private").await;
    let project = h
        .services
        .projects
        .create(&owner, ws.id, CreateProjectRequest::new("Secret"))
        .await?;

    let ws_result = h.services.workspaces.get(&stranger, ws.id).await;
    assert!(matches!(ws_result, Err(e) if e.is(ErrorCode::Unauthorized)));
    let project_result = h.services.projects.get(&stranger, project.id).await;
    assert!(matches!(project_result, Err(e) if e.is(ErrorCode::Unauthorized)));
    Ok(())
}

#[tokio::test]
async fn test_other_tenant_is_rejected_even_with_membership() -> ApiResult<()> {
    let h = harness();
    let home = tenant();
    let owner = user(home, "owner");
    let ws = create_workspace(&h, &owner, "Home").await;

    // Same user id, different tenant.
    let foreign = user(tenant(), "owner");
    let result = h.services.workspaces.get(&foreign, ws.id).await;
    assert!(matches!(result, Err(e) if e.is(ErrorCode::Unauthorized)));

    let listed = h
        .services
        .workspaces
        .list(&foreign, WorkspaceFilter::default())
        .await?;
    assert_eq!(listed.total, 0);
    assert!(h.services.members.user_workspaces(&foreign).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_listing_follows_membership_changes() -> ApiResult<()> {
    let h = harness();
    let tenant_id = tenant();
    let owner = user(tenant_id, "owner");
    let guest = user(tenant_id, "guest");
    let ws = create_workspace(&h, &owner, "Shared").await;
    create_workspace(&h, &owner, "Solo").await;

    // Caches the empty index.
    assert!(h.services.members.user_workspaces(&guest).await?.is_empty());

    h.services
        .members
        .add(&owner, ws.id, AddMemberRequest::new("guest", Role::Viewer))
        .await?;
    let visible = h.services.members.user_workspaces(&guest).await?;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, ws.id);

    let page = h
        .services
        .workspaces
        .list(&owner, WorkspaceFilter::default())
        .await?;
    assert_eq!(page.total, 2);

    h.services.members.remove(&guest, ws.id, &guest.user_id).await?;
    assert!(h.services.members.user_workspaces(&guest).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_project_listing_without_workspace_spans_visible_workspaces() -> ApiResult<()> {
    let h = harness();
    let tenant_id = tenant();
    let alice = user(tenant_id, "alice");
    let bob = user(tenant_id, "bob");
    let a = create_workspace(&h, &alice, "A").await;
    let b = create_workspace(&h, &bob, "B").await;
    h.services
        .projects
        .create(&alice, a.id, CreateProjectRequest::new("Alpha"))
        .await?;
    h.services
        .projects
        .create(&bob, b.id, CreateProjectRequest::new("Beta"))
        .await?;

    let mine = h.services.projects.list(&alice, ProjectFilter::default()).await?;
    assert_eq!(mine.total, 1);
    assert_eq!(mine.items[0].name, "Alpha");

    let scoped = ProjectFilter {
        workspace_id: Some(b.id),
        ..ProjectFilter::default()
    };
    let denied = h.services.projects.list(&alice, scoped).await;
    assert!(matches!(denied, Err(e) if e.is(ErrorCode::Unauthorized)));
    Ok(())
}

#[tokio::test]
async fn test_connection_flow() -> ApiResult<()> {
    let h = harness();
    let tenant_id = tenant();
    let owner = user(tenant_id, "owner");
    let ws = create_workspace(&h, &owner, "Data").await;
    let project = h
        .services
        .projects
        .create(&owner, ws.id, CreateProjectRequest::new("Sync"))
        .await?;

    let connection = h
        .services
        .connections
        .create(&owner, project.id, CreateConnectionRequest::new("app123", "CRM"))
        .await?;
    assert!(connection.sync_enabled);

    let duplicate = h
        .services
        .connections
        .create(&owner, project.id, CreateConnectionRequest::new("app123", "Again"))
        .await;
    assert!(matches!(duplicate, Err(e) if e.is(ErrorCode::DuplicateResource)));

    // Cached read, then a sync stamp must be visible.
    assert!(h.services.connections.get(&owner, connection.id).await?.last_sync_at.is_none());
    h.services.connections.record_sync(connection.id).await?;
    let synced = h.services.connections.get(&owner, connection.id).await?;
    assert!(synced.last_sync_at.is_some());

    let blocked = h.services.projects.delete(&owner, project.id).await;
    assert!(matches!(blocked, Err(e) if e.is(ErrorCode::Conflict)));
    assert!(h.services.projects.get(&owner, project.id).await.is_ok());

    h.services.connections.delete(&owner, connection.id).await?;
    h.services.projects.delete(&owner, project.id).await?;
    Ok(())
}

#[tokio::test]
async fn test_workspace_rename_is_checked_for_duplicates() -> ApiResult<()> {
    let h = harness();
    let tenant_id = tenant();
    let owner = user(tenant_id, "owner");
    create_workspace(&h, &owner, "Taken").await;
    let ws = create_workspace(&h, &owner, "Free").await;

    let result = h
        .services
        .workspaces
        .update(
            &owner,
            ws.id,
            UpdateWorkspaceRequest {
                name: Some("Taken".to_string()),
                ..UpdateWorkspaceRequest::default()
            },
        )
        .await;
    assert!(matches!(result, Err(e) if e.is(ErrorCode::DuplicateResource)));
    Ok(())
}

#[tokio::test]
async fn test_stats_cover_tenant() -> ApiResult<()> {
    let h = harness();
    let tenant_id = tenant();
    let owner = user(tenant_id, "owner");
    let ws = create_workspace(&h, &owner, "Stats").await;
    h.services
        .projects
        .create(&owner, ws.id, CreateProjectRequest::new("One"))
        .await?;
    create_workspace(&h, &user(tenant(), "elsewhere"), "Other").await;

    let stats = h.services.workspaces.stats(&owner).await?;
    assert_eq!(stats.tenant_id, tenant_id);
    assert_eq!(stats.total_workspaces, 1);
    assert_eq!(stats.active_workspaces, 1);
    assert_eq!(stats.total_projects, 1);
    assert_eq!(stats.projects_by_status.get("active"), Some(&1));
    Ok(())
}
