use serde_json::Value;

#[test]
fn openapi_lists_admin_paths() -> anyhow::Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = admin_authz::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let paths = v
        .get("paths")
        .and_then(Value::as_object)
        .expect("paths must exist");

    for p in [
        "/api/health",
        "/auth/me/permissions",
        "/groups",
        "/groups/{group_id}",
        "/groups/{group_id}/members/{user_id}",
        "/groups/{group_id}/permissions/{permission_id}",
        "/groups/{group_id}/roles/{role_id}",
        "/rbac/roles/{role_id}/permissions",
        "/rbac/permissions/{permission_id}",
        "/rbac/users/{user_id}/effective-permissions",
    ] {
        assert!(paths.contains_key(p), "OpenAPI missing path '{}'", p);
    }

    Ok(())
}

#[test]
fn openapi_group_detail_schema_has_relations() -> anyhow::Result<()> {
    let doc = admin_authz::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let schemas = v
        .pointer("/components/schemas")
        .and_then(Value::as_object)
        .expect("components.schemas must exist");

    let group_create = schemas
        .get("GroupCreateRequest")
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
        .expect("GroupCreateRequest.properties must exist");
    for k in ["name", "slug", "user_ids", "permission_ids", "role_ids"] {
        assert!(group_create.contains_key(k), "GroupCreateRequest missing '{}'", k);
    }

    let effective = schemas
        .get("EffectivePermissions")
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
        .expect("EffectivePermissions.properties must exist");
    for k in ["user_id", "super_admin", "roles", "permissions"] {
        assert!(effective.contains_key(k), "EffectivePermissions missing '{}'", k);
    }

    assert!(
        v.pointer("/components/securitySchemes/bearerAuth").is_some(),
        "bearerAuth scheme missing"
    );

    Ok(())
}
