//! RBAC Admin API Routes
//!
//! Endpoints for managing roles, permissions, and user role assignments.
//! Edits that can change a derived permission set clear the permission cache
//! after they commit.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, put},
    Json, Router,
};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::permissions;
use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::jwt::AuthUser;
use crate::models::rbac::*;
use crate::routes::auth::fetch_user_by_id;
use crate::utils::require_name;

const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, name, description, created_at, updated_at";

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        // Roles
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).put(update_role).delete(delete_role))
        .route("/roles/:role_id/permissions", get(get_role_permissions).post(assign_permission_to_role))
        .route(
            "/roles/:role_id/permissions/:permission_id",
            delete(remove_permission_from_role),
        )
        // Permissions
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/:permission_id", put(update_permission).delete(delete_permission))
        // User role assignments
        .route("/users/:user_id/roles", get(get_user_roles).post(assign_role_to_user))
        .route("/users/:user_id/roles/:role_id", delete(revoke_role_from_user))
        // Effective permissions (computed)
        .route("/users/:user_id/effective-permissions", get(get_effective_permissions))
}

async fn fetch_role(pool: &SqlitePool, role_id: Uuid) -> AppResult<Role> {
    let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?"))
        .bind(role_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Role not found"))?;

    row_parsers::role_from_row(&row)
}

async fn fetch_permission(pool: &SqlitePool, permission_id: Uuid) -> AppResult<Permission> {
    let row = sqlx::query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?"))
        .bind(permission_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Permission not found"))?;

    row_parsers::permission_from_row(&row)
}

/// Names of the roles assigned directly to a user, sorted.
pub async fn direct_role_names(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<String>> {
    let names = sqlx::query_scalar(
        r#"
        SELECT r.name FROM roles r
        INNER JOIN user_roles ur ON ur.role_id = r.id
        WHERE ur.user_id = ?
        ORDER BY r.name
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(names)
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

/// List all roles
#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
    ),
    security(("bearerAuth" = []))
)]
async fn list_roles(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Role>>> {
    state.require(&auth, permissions::ROLE_VIEW).await?;

    let rows = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"))
        .fetch_all(&state.pool)
        .await?;

    let roles = rows
        .iter()
        .map(row_parsers::role_from_row)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(roles))
}

/// Create a new role
#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    state.require(&auth, permissions::ROLE_CREATE).await?;

    let name = require_name(&req.name, "role")?;
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&name)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let role = Role {
        id,
        name,
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    log_activity(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(role)))
}

/// Get a role by ID
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "Role details", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn get_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Role>> {
    state.require(&auth, permissions::ROLE_VIEW).await?;
    Ok(Json(fetch_role(&state.pool, role_id).await?))
}

/// Rename or re-describe a role
#[utoipa::path(
    put,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
async fn update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    Json(req): Json<RoleUpdateRequest>,
) -> AppResult<Json<Role>> {
    state.require(&auth, permissions::ROLE_EDIT).await?;

    let old = fetch_role(&state.pool, role_id).await?;
    let name = match req.name.as_deref() {
        Some(name) => require_name(name, "role")?,
        None => old.name.clone(),
    };
    let description = match req.description {
        Some(description) => description,
        None => old.description.clone(),
    };
    let now = Utc::now();

    sqlx::query("UPDATE roles SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(now)
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?;

    // Cached sets hold permission names only; the bypass lookup is never cached.
    let role = Role {
        name,
        description,
        updated_at: now,
        ..old.clone()
    };

    log_activity(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &role,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(role))
}

/// Delete a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::ROLE_DELETE).await?;

    let role = fetch_role(&state.pool, role_id).await?;

    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?;

    state.authz.hooks().on_role_deleted(role_id).await;

    log_activity(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Get permissions for a role
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "Role permissions", body = Vec<Permission>),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn get_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Vec<Permission>>> {
    state.require(&auth, permissions::ROLE_VIEW).await?;
    fetch_role(&state.pool, role_id).await?;

    let rows = sqlx::query(
        r#"
        SELECT p.id, p.name, p.description, p.created_at, p.updated_at
        FROM permissions p
        INNER JOIN role_permissions rp ON rp.permission_id = p.id
        WHERE rp.role_id = ?
        ORDER BY p.name
        "#,
    )
    .bind(role_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let perms = rows
        .iter()
        .map(row_parsers::permission_from_row)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(perms))
}

/// Assign a permission to a role
#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    request_body = AssignPermissionToRoleRequest,
    responses(
        (status = 201, description = "Permission assigned", body = RolePermission),
        (status = 404, description = "Role or permission not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn assign_permission_to_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    Json(req): Json<AssignPermissionToRoleRequest>,
) -> AppResult<(StatusCode, Json<RolePermission>)> {
    state.require(&auth, permissions::ROLE_EDIT).await?;
    fetch_role(&state.pool, role_id).await?;

    let now = Utc::now();
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(role_id.to_string())
    .bind(req.permission_id.to_string())
    .bind(now)
    .execute(&state.pool)
    .await?
    .rows_affected();

    let rp = RolePermission {
        role_id,
        permission_id: req.permission_id,
        created_at: now,
    };

    if inserted > 0 {
        state.authz.hooks().on_role_permissions_changed(role_id).await;
        log_activity(
            &state.event_bus,
            "attached",
            Some(auth.user_id),
            &rp,
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok((StatusCode::CREATED, Json(rp)))
}

/// Remove a permission from a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Permission removed from role"),
    ),
    security(("bearerAuth" = []))
)]
async fn remove_permission_from_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::ROLE_EDIT).await?;

    let removed = sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .execute(&state.pool)
        .await?
        .rows_affected();

    if removed > 0 {
        state.authz.hooks().on_role_permissions_changed(role_id).await;
        log_activity(
            &state.event_bus,
            "detached",
            Some(auth.user_id),
            &RolePermission {
                role_id,
                permission_id,
                created_at: Utc::now(),
            },
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PERMISSION ENDPOINTS
// =============================================================================

/// List all permissions
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of permissions", body = Vec<Permission>),
    ),
    security(("bearerAuth" = []))
)]
async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Permission>>> {
    state.require(&auth, permissions::PERMISSION_VIEW).await?;

    let rows = sqlx::query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY name"))
        .fetch_all(&state.pool)
        .await?;

    let perms = rows
        .iter()
        .map(row_parsers::permission_from_row)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(perms))
}

/// Create a new permission
#[utoipa::path(
    post,
    path = "/rbac/permissions",
    tag = "RBAC",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission name already exists"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<PermissionCreateRequest>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    state.require(&auth, permissions::PERMISSION_CREATE).await?;

    let name = require_name(&req.name, "permission")?;
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO permissions (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&name)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    // Nothing references a new permission yet, so no cached set can be stale.
    let perm = Permission {
        id,
        name,
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    log_activity(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &perm,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(perm)))
}

/// Rename or re-describe a permission
#[utoipa::path(
    put,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    request_body = PermissionUpdateRequest,
    responses(
        (status = 200, description = "Permission updated", body = Permission),
        (status = 404, description = "Permission not found"),
        (status = 409, description = "Permission name already exists"),
    ),
    security(("bearerAuth" = []))
)]
async fn update_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(permission_id): Path<Uuid>,
    Json(req): Json<PermissionUpdateRequest>,
) -> AppResult<Json<Permission>> {
    state.require(&auth, permissions::PERMISSION_EDIT).await?;

    let old = fetch_permission(&state.pool, permission_id).await?;
    let name = match req.name.as_deref() {
        Some(name) => require_name(name, "permission")?,
        None => old.name.clone(),
    };
    let description = match req.description {
        Some(description) => description,
        None => old.description.clone(),
    };
    let now = Utc::now();

    sqlx::query("UPDATE permissions SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(now)
        .bind(permission_id.to_string())
        .execute(&state.pool)
        .await?;

    if name != old.name {
        state.authz.hooks().on_permission_changed(permission_id).await;
    }

    let perm = Permission {
        name,
        description,
        updated_at: now,
        ..old.clone()
    };

    log_activity(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &perm,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(perm))
}

/// Delete a permission
#[utoipa::path(
    delete,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Permission deleted"),
        (status = 404, description = "Permission not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn delete_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(permission_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::PERMISSION_DELETE).await?;

    let perm = fetch_permission(&state.pool, permission_id).await?;

    sqlx::query("DELETE FROM permissions WHERE id = ?")
        .bind(permission_id.to_string())
        .execute(&state.pool)
        .await?;

    state.authz.hooks().on_permission_changed(permission_id).await;

    log_activity(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &perm,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// USER ROLE ENDPOINTS
// =============================================================================

/// Get roles assigned directly to a user
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "User's roles", body = Vec<Role>),
    ),
    security(("bearerAuth" = []))
)]
async fn get_user_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<Role>>> {
    state.require(&auth, permissions::USER_ROLE_VIEW).await?;

    let rows = sqlx::query(
        r#"
        SELECT r.id, r.name, r.description, r.created_at, r.updated_at
        FROM roles r
        INNER JOIN user_roles ur ON ur.role_id = r.id
        WHERE ur.user_id = ?
        ORDER BY r.name
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let roles = rows
        .iter()
        .map(row_parsers::role_from_row)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(roles))
}

/// Assign a role directly to a user
#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned", body = UserRole),
        (status = 404, description = "User or role not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn assign_role_to_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AssignRoleRequest>,
) -> AppResult<(StatusCode, Json<UserRole>)> {
    state.require(&auth, permissions::USER_ROLE_MANAGE).await?;

    let now = Utc::now();
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(req.role_id.to_string())
    .bind(now)
    .execute(&state.pool)
    .await?
    .rows_affected();

    // Direct roles only feed the bypass check, which reads the store each time.
    let ur = UserRole {
        user_id,
        role_id: req.role_id,
        created_at: now,
    };

    if inserted > 0 {
        log_activity(
            &state.event_bus,
            "assigned",
            Some(auth.user_id),
            &ur,
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok((StatusCode::CREATED, Json(ur)))
}

/// Revoke a role from a user
#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/roles/{role_id}",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role revoked"),
    ),
    security(("bearerAuth" = []))
)]
async fn revoke_role_from_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    state.require(&auth, permissions::USER_ROLE_MANAGE).await?;

    let removed = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?
        .rows_affected();

    if removed > 0 {
        log_activity(
            &state.event_bus,
            "revoked",
            Some(auth.user_id),
            &UserRole {
                user_id,
                role_id,
                created_at: Utc::now(),
            },
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// EFFECTIVE PERMISSIONS
// =============================================================================

/// Get a user's bypass flag, direct roles and group-derived permissions
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/effective-permissions",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "Effective permissions", body = EffectivePermissions),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn get_effective_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissions>> {
    state.require(&auth, permissions::USER_PERMISSION_VIEW).await?;
    fetch_user_by_id(&state.pool, user_id).await?;

    let principal = state.authz.principal(user_id).await?;
    let roles = direct_role_names(&state.pool, user_id).await?;

    Ok(Json(EffectivePermissions {
        user_id,
        super_admin: principal.super_admin,
        roles,
        permissions: principal.sorted_permissions(),
    }))
}
