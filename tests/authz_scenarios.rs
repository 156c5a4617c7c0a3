use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use admin_authz::authz::{Authorizer, MembershipGraph};
use admin_authz::config::AuthzConfig;
use admin_authz::db::SqliteStore;

struct Fixture {
    pool: SqlitePool,
    store: Arc<SqliteStore>,
    authz: Authorizer,
    _dir: TempDir,
}

async fn fixture() -> Result<Fixture> {
    let dir = tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("authz.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let authz = Authorizer::from_config(Arc::clone(&store), &AuthzConfig::default());
    Ok(Fixture { pool, store, authz, _dir: dir })
}

impl Fixture {
    async fn user(&self, email: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query("INSERT INTO users (id, name, email, password_hash, created_at, updated_at) VALUES (?, ?, ?, 'x', ?, ?)")
            .bind(id.to_string())
            .bind(email)
            .bind(email)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn named(&self, table: &str, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let sql = if table == "groups" {
            "INSERT INTO groups (id, name, slug, description, created_at, updated_at) VALUES (?, ?, ?, NULL, ?, ?)".to_string()
        } else {
            format!("INSERT INTO {table} (id, name, description, created_at, updated_at) VALUES (?, ?, NULL, ?, ?)")
        };
        let mut query = sqlx::query(&sql).bind(id.to_string()).bind(name);
        if table == "groups" {
            query = query.bind(name);
        }
        query.bind(now).bind(now).execute(&self.pool).await?;
        Ok(id)
    }

    async fn link(&self, table: &str, left: &str, right: &str, a: Uuid, b: Uuid) -> Result<()> {
        sqlx::query(&format!("INSERT INTO {table} ({left}, {right}, created_at) VALUES (?, ?, ?)"))
            .bind(a.to_string())
            .bind(b.to_string())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn join(&self, group: Uuid, user: Uuid) -> Result<()> {
        self.link("group_user", "group_id", "user_id", group, user).await
    }
}

#[tokio::test]
async fn resolves_union_of_group_and_role_grants() -> Result<()> {
    let f = fixture().await?;
    let user = f.user("ada@example.com").await?;

    let editors = f.named("groups", "editors").await?;
    let reviewers = f.named("groups", "reviewers").await?;
    let elsewhere = f.named("groups", "elsewhere").await?;
    let empty = f.named("groups", "empty").await?;

    let edit = f.named("permissions", "articles.article.edit").await?;
    let review = f.named("permissions", "articles.article.review").await?;
    let archive = f.named("permissions", "articles.article.archive").await?;
    let shared = f.named("roles", "writer").await?;
    let hollow = f.named("roles", "hollow").await?;

    f.join(editors, user).await?;
    f.join(reviewers, user).await?;
    f.join(empty, user).await?;
    f.link("group_permission", "group_id", "permission_id", editors, edit).await?;
    f.link("role_permissions", "role_id", "permission_id", shared, review).await?;
    f.link("group_role", "group_id", "role_id", editors, shared).await?;
    f.link("group_role", "group_id", "role_id", reviewers, shared).await?;
    f.link("group_role", "group_id", "role_id", reviewers, hollow).await?;
    // not a member of this one
    f.link("group_permission", "group_id", "permission_id", elsewhere, archive).await?;

    let grants = f.store.grants_of_user(user).await?;
    assert_eq!(grants.len(), 3, "every joined group appears, even an empty one");

    let mut perms: Vec<String> = f.authz.permissions_of(user).await?.iter().cloned().collect();
    perms.sort();
    assert_eq!(perms, vec!["articles.article.edit", "articles.article.review"]);
    assert!(!f.authz.authorize(user, "articles.article.archive").await?);

    Ok(())
}

#[tokio::test]
async fn role_attach_reaches_fifty_members_only() -> Result<()> {
    let f = fixture().await?;
    let group = f.named("groups", "staff").await?;
    let role = f.named("roles", "publisher").await?;
    let publish = f.named("permissions", "articles.article.publish").await?;
    f.link("role_permissions", "role_id", "permission_id", role, publish).await?;

    let mut members = Vec::new();
    for i in 0..50 {
        let user = f.user(&format!("member{i}@example.com")).await?;
        f.join(group, user).await?;
        members.push(user);
    }
    let outsider = f.user("outsider@example.com").await?;
    let outsider_group = f.named("groups", "outsiders").await?;
    f.join(outsider_group, outsider).await?;

    // warm every cache entry with the pre-attach state
    for user in members.iter().chain([&outsider]) {
        assert!(!f.authz.authorize(*user, "articles.article.publish").await?);
    }

    f.link("group_role", "group_id", "role_id", group, role).await?;
    f.authz.hooks().on_group_roles_changed(group).await;

    for user in &members {
        assert!(f.authz.authorize(*user, "articles.article.publish").await?);
    }
    assert!(!f.authz.authorize(outsider, "articles.article.publish").await?);

    Ok(())
}

#[tokio::test]
async fn deleted_group_stops_granting_to_captured_members() -> Result<()> {
    let f = fixture().await?;
    let group = f.named("groups", "ops").await?;
    let deploy = f.named("permissions", "ops.deploy.run").await?;
    f.link("group_permission", "group_id", "permission_id", group, deploy).await?;

    let a = f.user("a@example.com").await?;
    let b = f.user("b@example.com").await?;
    f.join(group, a).await?;
    f.join(group, b).await?;

    assert!(f.authz.authorize(a, "ops.deploy.run").await?);
    assert!(f.authz.authorize(b, "ops.deploy.run").await?);

    let members = f.store.members_of_group(group).await?;
    sqlx::query("DELETE FROM groups WHERE id = ?")
        .bind(group.to_string())
        .execute(&f.pool)
        .await?;
    f.authz.hooks().on_group_deleted(group, &members).await;

    assert!(!f.authz.authorize(a, "ops.deploy.run").await?);
    assert!(!f.authz.authorize(b, "ops.deploy.run").await?);
    assert!(f.authz.permissions_of(a).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn only_direct_super_admin_bypasses() -> Result<()> {
    let f = fixture().await?;
    let super_admin = f.named("roles", "super_admin").await?;

    let direct = f.user("root@example.com").await?;
    f.link("user_roles", "user_id", "role_id", direct, super_admin).await?;

    let via_group = f.user("grouped@example.com").await?;
    let admins = f.named("groups", "admins").await?;
    f.join(admins, via_group).await?;
    f.link("group_role", "group_id", "role_id", admins, super_admin).await?;

    assert!(f.authz.is_bypassed(direct).await?);
    assert!(f.authz.authorize(direct, "anything.at.all").await?);
    // bypass never touches the derived set
    assert!(f.authz.permissions_of(direct).await?.is_empty());

    assert!(!f.authz.is_bypassed(via_group).await?);
    assert!(!f.authz.authorize(via_group, "anything.at.all").await?);

    Ok(())
}
