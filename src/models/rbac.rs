use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "content_manager")]
    pub name: String,
    #[schema(example = "Can manage categories and articles")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleUpdateRequest {
    pub name: Option<String>,
    /// Omit to keep the current description; send `null` to clear it.
    #[serde(default, deserialize_with = "crate::utils::double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    #[schema(example = "categories.category.edit")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Permission {
    fn entity_type() -> &'static str { "permission" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    #[schema(example = "categories.category.archive")]
    pub name: String,
    #[schema(example = "Archive categories")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionUpdateRequest {
    pub name: Option<String>,
    /// Omit to keep the current description; send `null` to clear it.
    #[serde(default, deserialize_with = "crate::utils::double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Loggable for UserRole {
    fn entity_type() -> &'static str { "user_role" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
}

// =============================================================================
// ROLE-PERMISSION ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Loggable for RolePermission {
    fn entity_type() -> &'static str { "role_permission" }
    fn subject_id(&self) -> Uuid { self.role_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionToRoleRequest {
    pub permission_id: Uuid,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    /// Direct holder of the super-admin role: every check passes.
    pub super_admin: bool,
    /// Names of roles assigned directly to the user.
    pub roles: Vec<String>,
    /// Permissions derived from the user's groups and their roles, sorted.
    pub permissions: Vec<String>,
}
