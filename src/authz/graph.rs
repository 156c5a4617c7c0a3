//! Read interfaces onto the membership graph and the identity layer.
//!
//! The authorization core never writes through these traits. Mutations happen
//! in the admin handlers, which call the invalidation hooks after commit.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppResult;

/// Everything one group contributes to a member's permission set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupGrants {
    pub group_id: Uuid,
    /// Permissions assigned directly to the group.
    pub permissions: Vec<String>,
    /// Roles attached to the group, each with its own permissions.
    pub roles: Vec<RoleGrants>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleGrants {
    pub role_id: Uuid,
    pub permissions: Vec<String>,
}

/// Relations user↔group, group↔role, group↔permission and role↔permission.
#[async_trait]
pub trait MembershipGraph: Send + Sync {
    async fn groups_of_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>>;

    async fn permissions_of_group(&self, group_id: Uuid) -> AppResult<Vec<String>>;

    async fn roles_of_group(&self, group_id: Uuid) -> AppResult<Vec<Uuid>>;

    async fn permissions_of_role(&self, role_id: Uuid) -> AppResult<Vec<String>>;

    async fn members_of_group(&self, group_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// Load every group of the user together with its direct permissions and
    /// its roles' permissions.
    ///
    /// Stores should override this with a single round trip; the default walks
    /// the fine-grained accessors and is only suitable for in-process graphs.
    async fn grants_of_user(&self, user_id: Uuid) -> AppResult<Vec<GroupGrants>> {
        let mut grants = Vec::new();
        for group_id in self.groups_of_user(user_id).await? {
            let permissions = self.permissions_of_group(group_id).await?;
            let mut roles = Vec::new();
            for role_id in self.roles_of_group(group_id).await? {
                roles.push(RoleGrants {
                    role_id,
                    permissions: self.permissions_of_role(role_id).await?,
                });
            }
            grants.push(GroupGrants {
                group_id,
                permissions,
                roles,
            });
        }
        Ok(grants)
    }
}

/// Roles assigned to a user directly, outside of any group.
#[async_trait]
pub trait DirectRoles: Send + Sync {
    async fn has_direct_role(&self, user_id: Uuid, role_name: &str) -> AppResult<bool>;
}
