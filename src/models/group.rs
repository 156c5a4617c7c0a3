use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};

// =============================================================================
// GROUP
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    /// Derived from the name at creation; not regenerated on rename.
    #[schema(example = "content-editors")]
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Group {
    fn entity_type() -> &'static str { "group" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GroupCreateRequest {
    #[schema(example = "Content Editors")]
    pub name: String,
    /// Optional explicit slug; generated from `name` when absent.
    pub slug: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub user_ids: Vec<Uuid>,
    #[serde(default)]
    pub permission_ids: Vec<Uuid>,
    #[serde(default)]
    pub role_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GroupUpdateRequest {
    pub name: Option<String>,
    /// Omit to keep the current description; send `null` to clear it.
    #[serde(default, deserialize_with = "crate::utils::double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

/// A group with its relations, as shown on the admin detail page.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupDetail {
    #[serde(flatten)]
    pub group: Group,
    pub member_ids: Vec<Uuid>,
    pub permissions: Vec<String>,
    pub role_ids: Vec<Uuid>,
}

// =============================================================================
// GROUP RELATIONS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupMember {
    pub group_id: Uuid,
    pub user_id: Uuid,
}

impl Loggable for GroupMember {
    fn entity_type() -> &'static str { "group_member" }
    fn subject_id(&self) -> Uuid { self.group_id }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupPermission {
    pub group_id: Uuid,
    pub permission_id: Uuid,
}

impl Loggable for GroupPermission {
    fn entity_type() -> &'static str { "group_permission" }
    fn subject_id(&self) -> Uuid { self.group_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupRole {
    pub group_id: Uuid,
    pub role_id: Uuid,
}

impl Loggable for GroupRole {
    fn entity_type() -> &'static str { "group_role" }
    fn subject_id(&self) -> Uuid { self.group_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachGroupPermissionRequest {
    pub permission_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachGroupRoleRequest {
    pub role_id: Uuid,
}
