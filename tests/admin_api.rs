use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use admin_authz::authz::permissions;
use admin_authz::config::AuthzConfig;
use admin_authz::create_app_with;
use admin_authz::db::seed;
use admin_authz::jwt::JwtConfig;

struct TestApp {
    app: Router,
    pool: SqlitePool,
    _dir: TempDir,
}

async fn setup(config: AuthzConfig) -> Result<TestApp> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;
    seed::seed_catalog(&pool, &config.super_admin_role).await?;

    let app = create_app_with(pool.clone(), JwtConfig::new("test-secret", 1), config);
    Ok(TestApp { app, pool, _dir: dir })
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

/// Register a user and return (token, user_id).
async fn register(app: &Router, name: &str, email: &str) -> Result<(String, String)> {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": name, "email": email, "password": "password123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);

    let token = body["token"].as_str().context("missing token")?.to_string();
    let user_id = body["user"]["id"].as_str().context("missing user id")?.to_string();
    Ok((token, user_id))
}

/// Register an admin holding the super-admin role directly.
async fn register_admin(t: &TestApp) -> Result<String> {
    let (token, _) = register(&t.app, "Admin", "admin@example.com").await?;
    seed::grant_role(&t.pool, "admin@example.com", "super_admin").await?;
    Ok(token)
}

async fn permission_id(app: &Router, admin: &str, name: &str) -> Result<String> {
    let (status, body) = send(app, "GET", "/rbac/permissions", Some(admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    let id = body
        .as_array()
        .context("permissions must be an array")?
        .iter()
        .find(|p| p["name"] == name)
        .and_then(|p| p["id"].as_str())
        .with_context(|| format!("permission {} not seeded", name))?;
    Ok(id.to_string())
}

#[tokio::test]
async fn group_grants_follow_every_admin_edit() -> Result<()> {
    let t = setup(AuthzConfig::default()).await?;
    let admin = register_admin(&t).await?;
    let (bob, bob_id) = register(&t.app, "Bob", "bob@example.com").await?;

    // no groups: fail closed
    let (status, _) = send(&t.app, "GET", "/rbac/roles", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let role_view = permission_id(&t.app, &admin, permissions::ROLE_VIEW).await?;
    let (status, group) = send(
        &t.app,
        "POST",
        "/groups",
        Some(&admin),
        Some(json!({ "name": "Role Viewers", "user_ids": [bob_id], "permission_ids": [role_view] })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "group create failed: {}", group);
    assert_eq!(group["slug"], "role-viewers");
    let group_id = group["id"].as_str().context("missing group id")?.to_string();

    // populates bob's cache entry
    let (status, _) = send(&t.app, "GET", "/rbac/roles", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("/groups/{}/permissions/{}", group_id, role_view),
        Some(&admin),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&t.app, "GET", "/rbac/roles", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "detached permission still honoured");

    // the same permission through a role
    let (status, role) = send(
        &t.app,
        "POST",
        "/rbac/roles",
        Some(&admin),
        Some(json!({ "name": "role_auditor" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role["id"].as_str().context("missing role id")?.to_string();

    let (status, _) = send(
        &t.app,
        "POST",
        &format!("/rbac/roles/{}/permissions", role_id),
        Some(&admin),
        Some(json!({ "permission_id": role_view })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    // cache bob's current (empty) set before the group gains the role
    let (status, _) = send(&t.app, "GET", "/rbac/roles", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &t.app,
        "POST",
        &format!("/groups/{}/roles", group_id),
        Some(&admin),
        Some(json!({ "role_id": role_id })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&t.app, "GET", "/rbac/roles", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::OK, "role attach not visible to member");

    let (status, _) = send(&t.app, "GET", "/rbac/permissions", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&t.app, "DELETE", &format!("/rbac/roles/{}", role_id), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&t.app, "GET", "/rbac/roles", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "deleted role still honoured");

    // back on the group directly, then removed from the catalog
    let (status, _) = send(
        &t.app,
        "POST",
        &format!("/groups/{}/permissions", group_id),
        Some(&admin),
        Some(json!({ "permission_id": role_view })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&t.app, "GET", "/rbac/roles", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("/rbac/permissions/{}", role_view),
        Some(&admin),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&t.app, "GET", "/rbac/roles", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "deleted permission still honoured");

    Ok(())
}

#[tokio::test]
async fn removing_member_and_deleting_group_revoke_access() -> Result<()> {
    let t = setup(AuthzConfig::default()).await?;
    let admin = register_admin(&t).await?;
    let (bob, bob_id) = register(&t.app, "Bob", "bob@example.com").await?;
    let (carol, carol_id) = register(&t.app, "Carol", "carol@example.com").await?;

    let group_view = permission_id(&t.app, &admin, permissions::GROUP_VIEW).await?;
    let (status, group) = send(
        &t.app,
        "POST",
        "/groups",
        Some(&admin),
        Some(json!({ "name": "Group Readers", "permission_ids": [group_view] })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let group_id = group["id"].as_str().context("missing group id")?.to_string();

    for user_id in [&bob_id, &carol_id] {
        let (status, _) = send(
            &t.app,
            "POST",
            &format!("/groups/{}/members", group_id),
            Some(&admin),
            Some(json!({ "user_id": user_id })),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
    }

    for token in [&bob, &carol] {
        let (status, _) = send(&t.app, "GET", "/groups", Some(token), None).await?;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, detail) = send(&t.app, "GET", &format!("/groups/{}", group_id), Some(&bob), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["member_ids"].as_array().map(Vec::len), Some(2));
    assert_eq!(detail["permissions"], json!([permissions::GROUP_VIEW]));

    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("/groups/{}/members/{}", group_id, bob_id),
        Some(&admin),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&t.app, "GET", "/groups", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&t.app, "GET", "/groups", Some(&carol), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&t.app, "DELETE", &format!("/groups/{}", group_id), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&t.app, "GET", "/groups", Some(&carol), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "deleted group still grants access");

    Ok(())
}

#[tokio::test]
async fn effective_permissions_report_bypass_and_groups() -> Result<()> {
    let t = setup(AuthzConfig::default()).await?;
    let admin = register_admin(&t).await?;
    let (bob, bob_id) = register(&t.app, "Bob", "bob@example.com").await?;

    let (status, me) = send(&t.app, "GET", "/auth/me/permissions", Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["super_admin"], true);
    assert_eq!(me["roles"], json!(["super_admin"]));
    assert_eq!(me["permissions"], json!([]));

    let (status, _) = send(
        &t.app,
        "GET",
        &format!("/rbac/users/{}/effective-permissions", bob_id),
        Some(&bob),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, report) = send(
        &t.app,
        "GET",
        &format!("/rbac/users/{}/effective-permissions", bob_id),
        Some(&admin),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["super_admin"], false);
    assert_eq!(report["permissions"], json!([]));

    let (status, _) = send(
        &t.app,
        "GET",
        &format!("/rbac/users/{}/effective-permissions", uuid::Uuid::new_v4()),
        Some(&admin),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn group_validation_and_conflicts() -> Result<()> {
    let t = setup(AuthzConfig::default()).await?;
    let admin = register_admin(&t).await?;

    let (status, _) = send(&t.app, "GET", "/groups", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&t.app, "POST", "/groups", Some(&admin), Some(json!({ "name": "   " }))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&t.app, "POST", "/groups", Some(&admin), Some(json!({ "name": "!!!" }))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, group) = send(&t.app, "POST", "/groups", Some(&admin), Some(json!({ "name": "Content Editors" }))).await?;
    assert_eq!(status, StatusCode::CREATED);
    let group_id = group["id"].as_str().context("missing group id")?.to_string();

    let (status, _) = send(&t.app, "POST", "/groups", Some(&admin), Some(json!({ "name": "content editors" }))).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // rename keeps the slug
    let (status, renamed) = send(
        &t.app,
        "PUT",
        &format!("/groups/{}", group_id),
        Some(&admin),
        Some(json!({ "name": "Editors" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["name"], "Editors");
    assert_eq!(renamed["slug"], "content-editors");

    let (status, _) = send(
        &t.app,
        "POST",
        &format!("/groups/{}/members", group_id),
        Some(&admin),
        Some(json!({ "user_id": uuid::Uuid::new_v4() })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, "GET", &format!("/groups/{}", uuid::Uuid::new_v4()), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn null_description_clears_and_missing_keeps() -> Result<()> {
    let t = setup(AuthzConfig::default()).await?;
    let admin = register_admin(&t).await?;

    let (status, group) = send(
        &t.app,
        "POST",
        "/groups",
        Some(&admin),
        Some(json!({ "name": "Support", "description": "First line" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let group_uri = format!("/groups/{}", group["id"].as_str().context("missing group id")?);

    let (status, renamed) = send(&t.app, "PUT", &group_uri, Some(&admin), Some(json!({ "name": "Helpdesk" }))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["description"], "First line");

    let (status, cleared) = send(&t.app, "PUT", &group_uri, Some(&admin), Some(json!({ "description": null }))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["name"], "Helpdesk");
    assert!(cleared.get("description").is_none(), "got: {}", cleared);

    let (_, detail) = send(&t.app, "GET", &group_uri, Some(&admin), None).await?;
    assert!(detail.get("description").is_none(), "cleared description persisted: {}", detail);

    let (status, role) = send(
        &t.app,
        "POST",
        "/rbac/roles",
        Some(&admin),
        Some(json!({ "name": "auditor", "description": "Reads logs" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let role_uri = format!("/rbac/roles/{}", role["id"].as_str().context("missing role id")?);

    let (status, role) = send(&t.app, "PUT", &role_uri, Some(&admin), Some(json!({ "description": null }))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(role["name"], "auditor");
    assert!(role.get("description").is_none(), "got: {}", role);

    Ok(())
}

#[tokio::test]
async fn advisory_mode_allows_but_strict_denies() -> Result<()> {
    let config = AuthzConfig::default().with_mode(admin_authz::authz::AuthzMode::Advisory);
    let t = setup(config).await?;
    let (bob, _) = register(&t.app, "Bob", "bob@example.com").await?;

    let (status, _) = send(&t.app, "GET", "/rbac/roles", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}
