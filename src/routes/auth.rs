use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::jwt::AuthUser;
use crate::models::rbac::EffectivePermissions;
use crate::models::user::{AuthResponse, DbUser, LoginRequest, RegisterRequest, User};
use crate::routes::rbac::direct_role_names;
use crate::utils::{hash_password, verify_password};

const USER_COLUMNS: &str = "id, name, email, password_hash, created_at, updated_at";

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    ensure_email_available(&state.pool, &payload.email).await?;

    let password_hash = hash_password(&payload.password)?;
    let now = Utc::now();
    let user_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(password_hash)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let user: User = fetch_user_by_id(&state.pool, user_id).await?.into();
    let token = state.jwt.encode(user.id)?;

    log_activity(
        &state.event_bus,
        "registered",
        Some(user.id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
        .bind(&payload.email)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;
    let db_user = row_parsers::db_user_from_row(&row)?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let token = state.jwt.encode(db_user.id)?;
    Ok(Json(AuthResponse {
        token,
        user: db_user.into(),
    }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    let user = fetch_user_by_id(&state.pool, auth.user_id).await?;
    Ok(Json(user.into()))
}

/// What the caller can do: bypass flag, direct roles and group-derived
/// permissions. Always allowed for the caller themself.
#[utoipa::path(
    get,
    path = "/auth/me/permissions",
    tag = "Auth",
    responses((status = 200, description = "Caller's effective permissions", body = EffectivePermissions)),
    security(("bearerAuth" = []))
)]
pub async fn my_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<EffectivePermissions>> {
    let principal = state.authz.principal(auth.user_id).await?;
    let roles = direct_role_names(&state.pool, auth.user_id).await?;

    Ok(Json(EffectivePermissions {
        user_id: auth.user_id,
        super_admin: principal.super_admin,
        roles,
        permissions: principal.sorted_permissions(),
    }))
}

async fn ensure_email_available(pool: &SqlitePool, email: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
        .bind(email)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    Ok(())
}

pub(crate) async fn fetch_user_by_id(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    row_parsers::db_user_from_row(&row)
}
