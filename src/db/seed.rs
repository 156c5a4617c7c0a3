//! Bootstrap data: the well-known permission catalog and the super-admin role.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::authz::permissions;
use crate::errors::{AppError, AppResult};

/// Insert every well-known permission and the named super-admin role, skipping
/// rows that already exist. Returns the number of rows inserted.
pub async fn seed_catalog(pool: &SqlitePool, super_admin_role: &str) -> AppResult<u64> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for name in permissions::ALL {
        inserted += sqlx::query(
            "INSERT OR IGNORE INTO permissions (id, name, description, created_at, updated_at) VALUES (?, ?, NULL, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(*name)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    inserted += sqlx::query(
        "INSERT OR IGNORE INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(super_admin_role)
    .bind("Bypasses every permission check")
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(inserted)
}

/// Assign a role directly to the user with `email`.
pub async fn grant_role(pool: &SqlitePool, email: &str, role_name: &str) -> AppResult<(Uuid, Uuid)> {
    let user_id: String = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no user with email {email}")))?;

    let role_id: String = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
        .bind(role_name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no role named {role_name}")))?;

    sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
        .bind(&user_id)
        .bind(&role_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

    let parse = crate::db::row_parsers::parse_uuid;
    Ok((parse(&user_id)?, parse(&role_id)?))
}
