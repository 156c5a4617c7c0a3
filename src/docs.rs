use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::register,
		routes::auth::login,
		routes::auth::me,
		routes::auth::my_permissions,
		routes::groups::list_groups,
		routes::groups::create_group,
		routes::groups::get_group,
		routes::groups::update_group,
		routes::groups::delete_group,
		routes::groups::add_member,
		routes::groups::remove_member,
		routes::groups::attach_permission,
		routes::groups::detach_permission,
		routes::groups::attach_role,
		routes::groups::detach_role,
		routes::rbac::list_roles,
		routes::rbac::create_role,
		routes::rbac::get_role,
		routes::rbac::update_role,
		routes::rbac::delete_role,
		routes::rbac::get_role_permissions,
		routes::rbac::assign_permission_to_role,
		routes::rbac::remove_permission_from_role,
		routes::rbac::list_permissions,
		routes::rbac::create_permission,
		routes::rbac::update_permission,
		routes::rbac::delete_permission,
		routes::rbac::get_user_roles,
		routes::rbac::assign_role_to_user,
		routes::rbac::revoke_role_from_user,
		routes::rbac::get_effective_permissions
	),
	components(
		schemas(
			routes::health::HealthResponse,
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::group::Group,
			models::group::GroupCreateRequest,
			models::group::GroupUpdateRequest,
			models::group::GroupDetail,
			models::group::AddMemberRequest,
			models::group::AttachGroupPermissionRequest,
			models::group::AttachGroupRoleRequest,
			models::rbac::Role,
			models::rbac::RoleCreateRequest,
			models::rbac::RoleUpdateRequest,
			models::rbac::Permission,
			models::rbac::PermissionCreateRequest,
			models::rbac::PermissionUpdateRequest,
			models::rbac::UserRole,
			models::rbac::AssignRoleRequest,
			models::rbac::RolePermission,
			models::rbac::AssignPermissionToRoleRequest,
			models::rbac::EffectivePermissions
		)
	),
	tags(
		(name = "Health", description = "Liveness and database check"),
		(name = "Auth", description = "Authentication endpoints"),
		(name = "Groups", description = "Groups, members and group grants"),
		(name = "RBAC", description = "Roles, permissions and user role assignments")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	add_request_examples(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else { return; };
	let components = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()));
	let Some(components) = components.as_object_mut() else { return; };
	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()));

	if let Some(schemes) = schemes.as_object_mut() {
		schemes.insert(
			"bearerAuth".to_string(),
			json!({
				"type": "http",
				"scheme": "bearer",
				"bearerFormat": "JWT"
			}),
		);
	}
}

fn add_request_examples(doc: &mut Value) {
	let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) else { return; };

	for item in paths.values_mut() {
		let Some(operations) = item.as_object_mut() else { continue; };
		for operation in operations.values_mut() {
			apply_request_example(operation);
		}
	}
}

fn apply_request_example(operation: &mut Value) {
	let Some(app_json) = operation
		.pointer_mut("/requestBody/content/application~1json")
		.and_then(Value::as_object_mut)
	else {
		return;
	};
	let Some(reference) = app_json
		.get("schema")
		.and_then(|schema| schema.get("$ref"))
		.and_then(Value::as_str)
	else {
		return;
	};

	let example = match reference {
		"#/components/schemas/LoginRequest" => json!({
			"email": "ada@example.com",
			"password": "S3cureP@ssw0rd"
		}),
		"#/components/schemas/RegisterRequest" => json!({
			"name": "Ada Lovelace",
			"email": "ada@example.com",
			"password": "S3cureP@ssw0rd"
		}),
		"#/components/schemas/GroupCreateRequest" => json!({
			"name": "Content Editors",
			"description": "Editors of the public site",
			"user_ids": [],
			"permission_ids": [],
			"role_ids": []
		}),
		"#/components/schemas/RoleCreateRequest" => json!({
			"name": "content_manager",
			"description": "Can manage categories and articles"
		}),
		"#/components/schemas/PermissionCreateRequest" => json!({
			"name": "articles.article.publish",
			"description": "Publish articles"
		}),
		_ => return,
	};

	app_json.insert("example".to_string(), example);
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{port}");

	match doc.get_mut("servers") {
		Some(Value::Array(servers)) => {
			let has = servers
				.iter()
				.any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				servers.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}
