use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::group::Group;
use crate::models::rbac::{Permission, Role};
use crate::models::user::DbUser;

pub fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s.trim()).map_err(|e| AppError::internal(format!("invalid uuid {s:?}: {e}")))
}

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // RFC3339 (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // sqlx's chrono encoding: "YYYY-MM-DD HH:MM:SS.f+00:00"
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP: "YYYY-MM-DD HH:MM:SS"
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range"))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn text(row: &SqliteRow, column: &str) -> Result<String, AppError> {
    row.try_get(column)
        .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

fn opt_text(row: &SqliteRow, column: &str) -> Result<Option<String>, AppError> {
    row.try_get(column)
        .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, AppError> {
    Ok(DbUser {
        id: parse_uuid(&text(row, "id")?)?,
        name: text(row, "name")?,
        email: text(row, "email")?,
        password_hash: text(row, "password_hash")?,
        created_at: parse_datetime(&text(row, "created_at")?)?,
        updated_at: parse_datetime(&text(row, "updated_at")?)?,
    })
}

pub fn group_from_row(row: &SqliteRow) -> Result<Group, AppError> {
    Ok(Group {
        id: parse_uuid(&text(row, "id")?)?,
        name: text(row, "name")?,
        slug: text(row, "slug")?,
        description: opt_text(row, "description")?,
        created_at: parse_datetime(&text(row, "created_at")?)?,
        updated_at: parse_datetime(&text(row, "updated_at")?)?,
    })
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, AppError> {
    Ok(Role {
        id: parse_uuid(&text(row, "id")?)?,
        name: text(row, "name")?,
        description: opt_text(row, "description")?,
        created_at: parse_datetime(&text(row, "created_at")?)?,
        updated_at: parse_datetime(&text(row, "updated_at")?)?,
    })
}

pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, AppError> {
    Ok(Permission {
        id: parse_uuid(&text(row, "id")?)?,
        name: text(row, "name")?,
        description: opt_text(row, "description")?,
        created_at: parse_datetime(&text(row, "created_at")?)?,
        updated_at: parse_datetime(&text(row, "updated_at")?)?,
    })
}
