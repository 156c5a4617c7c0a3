//! Group Admin API Routes
//!
//! CRUD for groups and their member, permission and role relations. Every
//! write commits first and then fires the matching cache invalidation hook.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{permissions, MembershipGraph};
use crate::db::{row_parsers, SqliteStore};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::jwt::AuthUser;
use crate::models::group::*;
use crate::utils::{require_name, slugify};

const GROUP_COLUMNS: &str = "id, name, slug, description, created_at, updated_at";

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_groups).post(create_group))
        .route("/:group_id", get(get_group).put(update_group).delete(delete_group))
        .route("/:group_id/members", post(add_member))
        .route("/:group_id/members/:user_id", delete(remove_member))
        .route("/:group_id/permissions", post(attach_permission))
        .route("/:group_id/permissions/:permission_id", delete(detach_permission))
        .route("/:group_id/roles", post(attach_role))
        .route("/:group_id/roles/:role_id", delete(detach_role))
}

pub(crate) async fn fetch_group(pool: &SqlitePool, group_id: Uuid) -> AppResult<Group> {
    let row = sqlx::query(&format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?"))
        .bind(group_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Group not found"))?;

    row_parsers::group_from_row(&row)
}

// =============================================================================
// GROUP ENDPOINTS
// =============================================================================

/// List all groups
#[utoipa::path(
    get,
    path = "/groups",
    tag = "Groups",
    responses(
        (status = 200, description = "List of groups", body = Vec<Group>),
    ),
    security(("bearerAuth" = []))
)]
async fn list_groups(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Group>>> {
    state.require(&auth, permissions::GROUP_VIEW).await?;

    let rows = sqlx::query(&format!("SELECT {GROUP_COLUMNS} FROM groups ORDER BY name"))
        .fetch_all(&state.pool)
        .await?;

    let groups = rows
        .iter()
        .map(row_parsers::group_from_row)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(groups))
}

/// Create a group, optionally with initial members, permissions and roles
#[utoipa::path(
    post,
    path = "/groups",
    tag = "Groups",
    request_body = GroupCreateRequest,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 409, description = "Slug already exists"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<GroupCreateRequest>,
) -> AppResult<(StatusCode, Json<Group>)> {
    state.require(&auth, permissions::GROUP_CREATE).await?;

    let name = require_name(&req.name, "group")?;
    let slug = match req.slug.as_deref().map(str::trim) {
        Some(explicit) if !explicit.is_empty() => slugify(explicit),
        _ => slugify(&name),
    };
    if slug.is_empty() {
        return Err(AppError::bad_request("group slug must contain letters or digits"));
    }

    let id = Uuid::new_v4();
    let now = Utc::now();
    let group_id = id.to_string();

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO groups (id, name, slug, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&group_id)
    .bind(&name)
    .bind(&slug)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for user_id in &req.user_ids {
        sqlx::query("INSERT OR IGNORE INTO group_user (group_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&group_id)
            .bind(user_id.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    for permission_id in &req.permission_ids {
        sqlx::query("INSERT OR IGNORE INTO group_permission (group_id, permission_id, created_at) VALUES (?, ?, ?)")
            .bind(&group_id)
            .bind(permission_id.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    for role_id in &req.role_ids {
        sqlx::query("INSERT OR IGNORE INTO group_role (group_id, role_id, created_at) VALUES (?, ?, ?)")
            .bind(&group_id)
            .bind(role_id.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    state.authz.hooks().on_group_created(&req.user_ids).await;

    let group = Group {
        id,
        name,
        slug,
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    log_activity(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &group,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(group)))
}

/// Get a group with its members, permissions and roles
#[utoipa::path(
    get,
    path = "/groups/{group_id}",
    tag = "Groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
    ),
    responses(
        (status = 200, description = "Group details", body = GroupDetail),
        (status = 404, description = "Group not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn get_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<GroupDetail>> {
    state.require(&auth, permissions::GROUP_VIEW).await?;

    let group = fetch_group(&state.pool, group_id).await?;
    let store = SqliteStore::new(state.pool.clone());

    let mut member_ids = store.members_of_group(group_id).await?;
    let mut permissions = store.permissions_of_group(group_id).await?;
    let mut role_ids = store.roles_of_group(group_id).await?;
    member_ids.sort();
    permissions.sort();
    role_ids.sort();

    Ok(Json(GroupDetail {
        group,
        member_ids,
        permissions,
        role_ids,
    }))
}

/// Rename or re-describe a group. The slug is kept.
#[utoipa::path(
    put,
    path = "/groups/{group_id}",
    tag = "Groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
    ),
    request_body = GroupUpdateRequest,
    responses(
        (status = 200, description = "Group updated", body = Group),
        (status = 404, description = "Group not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn update_group(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
    Json(req): Json<GroupUpdateRequest>,
) -> AppResult<Json<Group>> {
    state.require(&auth, permissions::GROUP_EDIT).await?;

    let old = fetch_group(&state.pool, group_id).await?;
    let name = match req.name.as_deref() {
        Some(name) => require_name(name, "group")?,
        None => old.name.clone(),
    };
    let description = match req.description {
        Some(description) => description,
        None => old.description.clone(),
    };
    let now = Utc::now();

    sqlx::query("UPDATE groups SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(now)
        .bind(group_id.to_string())
        .execute(&state.pool)
        .await?;

    // Names and descriptions never change anyone's permission set.
    let group = Group {
        name,
        description,
        updated_at: now,
        ..old.clone()
    };

    log_activity(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &group,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(group))
}

/// Delete a group and all of its relations
#[utoipa::path(
    delete,
    path = "/groups/{group_id}",
    tag = "Groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
    ),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 404, description = "Group not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn delete_group(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::GROUP_DELETE).await?;

    let group = fetch_group(&state.pool, group_id).await?;

    let mut tx = state.pool.begin().await?;

    // Capture members before the cascade removes the pivot rows.
    let member_rows: Vec<String> = sqlx::query_scalar("SELECT user_id FROM group_user WHERE group_id = ?")
        .bind(group_id.to_string())
        .fetch_all(&mut *tx)
        .await?;
    let members = member_rows
        .iter()
        .map(|id| row_parsers::parse_uuid(id))
        .collect::<AppResult<Vec<_>>>()?;

    sqlx::query("DELETE FROM groups WHERE id = ?")
        .bind(group_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    state.authz.hooks().on_group_deleted(group_id, &members).await;

    log_activity(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &group,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// MEMBERSHIP ENDPOINTS
// =============================================================================

/// Add a user to a group
#[utoipa::path(
    post,
    path = "/groups/{group_id}/members",
    tag = "Groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
    ),
    request_body = AddMemberRequest,
    responses(
        (status = 201, description = "Member added"),
        (status = 404, description = "Group or user not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::GROUP_EDIT).await?;
    fetch_group(&state.pool, group_id).await?;

    let inserted = sqlx::query("INSERT OR IGNORE INTO group_user (group_id, user_id, created_at) VALUES (?, ?, ?)")
        .bind(group_id.to_string())
        .bind(req.user_id.to_string())
        .bind(Utc::now())
        .execute(&state.pool)
        .await?
        .rows_affected();

    if inserted > 0 {
        state.authz.hooks().on_group_membership_changed(req.user_id).await;
        log_activity(
            &state.event_bus,
            "added",
            Some(auth.user_id),
            &GroupMember { group_id, user_id: req.user_id },
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(StatusCode::CREATED)
}

/// Remove a user from a group
#[utoipa::path(
    delete,
    path = "/groups/{group_id}/members/{user_id}",
    tag = "Groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 204, description = "Member removed"),
    ),
    security(("bearerAuth" = []))
)]
async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::GROUP_EDIT).await?;

    let removed = sqlx::query("DELETE FROM group_user WHERE group_id = ? AND user_id = ?")
        .bind(group_id.to_string())
        .bind(user_id.to_string())
        .execute(&state.pool)
        .await?
        .rows_affected();

    if removed > 0 {
        state.authz.hooks().on_group_membership_changed(user_id).await;
        log_activity(
            &state.event_bus,
            "removed",
            Some(auth.user_id),
            &GroupMember { group_id, user_id },
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// GROUP PERMISSION ENDPOINTS
// =============================================================================

/// Attach a permission directly to a group
#[utoipa::path(
    post,
    path = "/groups/{group_id}/permissions",
    tag = "Groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
    ),
    request_body = AttachGroupPermissionRequest,
    responses(
        (status = 201, description = "Permission attached"),
        (status = 404, description = "Group or permission not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn attach_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
    Json(req): Json<AttachGroupPermissionRequest>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::GROUP_EDIT).await?;
    fetch_group(&state.pool, group_id).await?;

    let inserted = sqlx::query("INSERT OR IGNORE INTO group_permission (group_id, permission_id, created_at) VALUES (?, ?, ?)")
        .bind(group_id.to_string())
        .bind(req.permission_id.to_string())
        .bind(Utc::now())
        .execute(&state.pool)
        .await?
        .rows_affected();

    if inserted > 0 {
        state.authz.hooks().on_group_permissions_changed(group_id).await;
        log_activity(
            &state.event_bus,
            "attached",
            Some(auth.user_id),
            &GroupPermission { group_id, permission_id: req.permission_id },
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(StatusCode::CREATED)
}

/// Detach a permission from a group
#[utoipa::path(
    delete,
    path = "/groups/{group_id}/permissions/{permission_id}",
    tag = "Groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Permission detached"),
    ),
    security(("bearerAuth" = []))
)]
async fn detach_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((group_id, permission_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::GROUP_EDIT).await?;

    let removed = sqlx::query("DELETE FROM group_permission WHERE group_id = ? AND permission_id = ?")
        .bind(group_id.to_string())
        .bind(permission_id.to_string())
        .execute(&state.pool)
        .await?
        .rows_affected();

    if removed > 0 {
        state.authz.hooks().on_group_permissions_changed(group_id).await;
        log_activity(
            &state.event_bus,
            "detached",
            Some(auth.user_id),
            &GroupPermission { group_id, permission_id },
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// GROUP ROLE ENDPOINTS
// =============================================================================

/// Attach a role to a group
#[utoipa::path(
    post,
    path = "/groups/{group_id}/roles",
    tag = "Groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
    ),
    request_body = AttachGroupRoleRequest,
    responses(
        (status = 201, description = "Role attached"),
        (status = 404, description = "Group or role not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn attach_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
    Json(req): Json<AttachGroupRoleRequest>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::GROUP_EDIT).await?;
    fetch_group(&state.pool, group_id).await?;

    let inserted = sqlx::query("INSERT OR IGNORE INTO group_role (group_id, role_id, created_at) VALUES (?, ?, ?)")
        .bind(group_id.to_string())
        .bind(req.role_id.to_string())
        .bind(Utc::now())
        .execute(&state.pool)
        .await?
        .rows_affected();

    if inserted > 0 {
        state.authz.hooks().on_group_roles_changed(group_id).await;
        log_activity(
            &state.event_bus,
            "attached",
            Some(auth.user_id),
            &GroupRole { group_id, role_id: req.role_id },
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(StatusCode::CREATED)
}

/// Detach a role from a group
#[utoipa::path(
    delete,
    path = "/groups/{group_id}/roles/{role_id}",
    tag = "Groups",
    params(
        ("group_id" = Uuid, Path, description = "Group ID"),
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role detached"),
    ),
    security(("bearerAuth" = []))
)]
async fn detach_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((group_id, role_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::GROUP_EDIT).await?;

    let removed = sqlx::query("DELETE FROM group_role WHERE group_id = ? AND role_id = ?")
        .bind(group_id.to_string())
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?
        .rows_affected();

    if removed > 0 {
        state.authz.hooks().on_group_roles_changed(group_id).await;
        log_activity(
            &state.event_bus,
            "detached",
            Some(auth.user_id),
            &GroupRole { group_id, role_id },
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(StatusCode::NO_CONTENT)
}
