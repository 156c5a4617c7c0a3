//! SQLite-backed membership graph and direct-role lookup.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::authz::{DirectRoles, GroupGrants, MembershipGraph, RoleGrants};
use crate::db::row_parsers::parse_uuid;
use crate::errors::AppResult;

/// One row per (group, role?, permission?) reachable from a user. The third
/// branch guarantees every group shows up even when it grants nothing.
const GRANTS_OF_USER_SQL: &str = r#"
    SELECT gu.group_id AS group_id, NULL AS role_id, p.name AS permission
    FROM group_user gu
    INNER JOIN group_permission gp ON gp.group_id = gu.group_id
    INNER JOIN permissions p ON p.id = gp.permission_id
    WHERE gu.user_id = ?
    UNION ALL
    SELECT gu.group_id AS group_id, gr.role_id AS role_id, p.name AS permission
    FROM group_user gu
    INNER JOIN group_role gr ON gr.group_id = gu.group_id
    LEFT JOIN role_permissions rp ON rp.role_id = gr.role_id
    LEFT JOIN permissions p ON p.id = rp.permission_id
    WHERE gu.user_id = ?
    UNION ALL
    SELECT gu.group_id AS group_id, NULL AS role_id, NULL AS permission
    FROM group_user gu
    WHERE gu.user_id = ?
"#;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn uuids(&self, sql: &str, id: Uuid, column: &str) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(sql)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| parse_uuid(&row.try_get::<String, _>(column)?))
            .collect()
    }

    async fn names(&self, sql: &str, id: Uuid) -> AppResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(sql)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }
}

#[async_trait]
impl MembershipGraph for SqliteStore {
    async fn groups_of_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        self.uuids(
            "SELECT group_id FROM group_user WHERE user_id = ?",
            user_id,
            "group_id",
        )
        .await
    }

    async fn permissions_of_group(&self, group_id: Uuid) -> AppResult<Vec<String>> {
        self.names(
            r#"
            SELECT p.name
            FROM permissions p
            INNER JOIN group_permission gp ON gp.permission_id = p.id
            WHERE gp.group_id = ?
            "#,
            group_id,
        )
        .await
    }

    async fn roles_of_group(&self, group_id: Uuid) -> AppResult<Vec<Uuid>> {
        self.uuids(
            "SELECT role_id FROM group_role WHERE group_id = ?",
            group_id,
            "role_id",
        )
        .await
    }

    async fn permissions_of_role(&self, role_id: Uuid) -> AppResult<Vec<String>> {
        self.names(
            r#"
            SELECT p.name
            FROM permissions p
            INNER JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = ?
            "#,
            role_id,
        )
        .await
    }

    async fn members_of_group(&self, group_id: Uuid) -> AppResult<Vec<Uuid>> {
        self.uuids(
            "SELECT user_id FROM group_user WHERE group_id = ?",
            group_id,
            "user_id",
        )
        .await
    }

    async fn grants_of_user(&self, user_id: Uuid) -> AppResult<Vec<GroupGrants>> {
        let id = user_id.to_string();
        let rows = sqlx::query(GRANTS_OF_USER_SQL)
            .bind(&id)
            .bind(&id)
            .bind(&id)
            .fetch_all(&self.pool)
            .await?;

        let mut groups: HashMap<Uuid, (Vec<String>, HashMap<Uuid, Vec<String>>)> = HashMap::new();
        for row in &rows {
            let group_id = parse_uuid(&row.try_get::<String, _>("group_id")?)?;
            let role_id: Option<String> = row.try_get("role_id")?;
            let permission: Option<String> = row.try_get("permission")?;

            let (direct, roles) = groups.entry(group_id).or_default();
            match role_id {
                Some(role_id) => {
                    let perms = roles.entry(parse_uuid(&role_id)?).or_default();
                    perms.extend(permission);
                }
                None => direct.extend(permission),
            }
        }

        Ok(groups
            .into_iter()
            .map(|(group_id, (permissions, roles))| GroupGrants {
                group_id,
                permissions,
                roles: roles
                    .into_iter()
                    .map(|(role_id, permissions)| RoleGrants { role_id, permissions })
                    .collect(),
            })
            .collect())
    }
}

#[async_trait]
impl DirectRoles for SqliteStore {
    async fn has_direct_role(&self, user_id: Uuid, role_name: &str) -> AppResult<bool> {
        let held: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM user_roles ur
                INNER JOIN roles r ON r.id = ur.role_id
                WHERE ur.user_id = ? AND r.name = ?
            )
            "#,
        )
        .bind(user_id.to_string())
        .bind(role_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(held != 0)
    }
}
