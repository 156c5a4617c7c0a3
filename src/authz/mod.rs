//! Authorization core - group permission resolution and cache invalidation
//!
//! A check runs through:
//! - Super admin bypass (direct role assignment only)
//! - Per-user cache of the derived permission set
//! - Resolver over the membership graph on a cache miss
//! - Wildcard / exact matching
//!
//! Admin write paths keep the cache honest through [`CacheInvalidator`].

pub mod cache;
mod evaluator;
pub mod graph;
mod invalidation;
pub mod matcher;
pub mod memory;
mod principal;
mod resolver;

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

pub use cache::{CacheError, CacheLayer, MokaPermissionCache, PermissionCache};
pub use evaluator::{GroupPolicyEvaluator, PolicyEvaluator, SuperAdminBypass};
pub use graph::{DirectRoles, GroupGrants, MembershipGraph, RoleGrants};
pub use invalidation::CacheInvalidator;
pub use matcher::matches;
pub use principal::Principal;
pub use resolver::{flatten, PermissionResolver};

use crate::config::AuthzConfig;
use crate::errors::{AppError, AppResult};

/// Flattened, deduplicated permission names reachable by one user.
pub type PermissionSet = HashSet<String>;

/// Authorization enforcement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzMode {
    /// No permission checks (development mode)
    Off,
    /// Log denials but allow requests (testing mode)
    Advisory,
    /// Enforce 403 on denied requests (production mode)
    Strict,
}

impl AuthzMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "off" => Some(AuthzMode::Off),
            "advisory" => Some(AuthzMode::Advisory),
            "strict" => Some(AuthzMode::Strict),
            _ => None,
        }
    }
}

/// Well-known role names
pub mod roles {
    pub const SUPER_ADMIN: &str = "super_admin";
}

/// Well-known permission names
pub mod permissions {
    // Groups
    pub const GROUP_VIEW: &str = "groups.group.view";
    pub const GROUP_CREATE: &str = "groups.group.create";
    pub const GROUP_EDIT: &str = "groups.group.edit";
    pub const GROUP_DELETE: &str = "groups.group.delete";

    // Roles
    pub const ROLE_VIEW: &str = "roles.role.view";
    pub const ROLE_CREATE: &str = "roles.role.create";
    pub const ROLE_EDIT: &str = "roles.role.edit";
    pub const ROLE_DELETE: &str = "roles.role.delete";

    // Permission catalog
    pub const PERMISSION_VIEW: &str = "permissions.permission.view";
    pub const PERMISSION_CREATE: &str = "permissions.permission.create";
    pub const PERMISSION_EDIT: &str = "permissions.permission.edit";
    pub const PERMISSION_DELETE: &str = "permissions.permission.delete";

    // Users
    pub const USER_ROLE_VIEW: &str = "users.role.view";
    pub const USER_ROLE_MANAGE: &str = "users.role.manage";
    pub const USER_PERMISSION_VIEW: &str = "users.permission.view";

    pub const ALL: &[&str] = &[
        GROUP_VIEW,
        GROUP_CREATE,
        GROUP_EDIT,
        GROUP_DELETE,
        ROLE_VIEW,
        ROLE_CREATE,
        ROLE_EDIT,
        ROLE_DELETE,
        PERMISSION_VIEW,
        PERMISSION_CREATE,
        PERMISSION_EDIT,
        PERMISSION_DELETE,
        USER_ROLE_VIEW,
        USER_ROLE_MANAGE,
        USER_PERMISSION_VIEW,
    ];
}

/// Entry point for every authorization decision and every cache invalidation.
pub struct Authorizer {
    policy: SuperAdminBypass<GroupPolicyEvaluator>,
    hooks: CacheInvalidator,
}

impl Authorizer {
    pub fn new(
        graph: Arc<dyn MembershipGraph>,
        roles: Arc<dyn DirectRoles>,
        cache: Arc<dyn PermissionCache>,
        super_admin_role: impl Into<String>,
    ) -> Self {
        let cache = Arc::new(CacheLayer::new(cache));
        let inner = GroupPolicyEvaluator::new(Arc::clone(&graph), Arc::clone(&cache));
        Self {
            policy: SuperAdminBypass::new(roles, super_admin_role, inner),
            hooks: CacheInvalidator::new(graph, cache),
        }
    }

    /// Build over a store that serves both the graph and direct roles, with a
    /// moka cache sized from `config`.
    pub fn from_config<S>(store: Arc<S>, config: &AuthzConfig) -> Self
    where
        S: MembershipGraph + DirectRoles + 'static,
    {
        let graph: Arc<dyn MembershipGraph> = store.clone();
        let roles: Arc<dyn DirectRoles> = store;
        let cache = Arc::new(MokaPermissionCache::new(config.cache_ttl, config.cache_max_entries));
        Self::new(graph, roles, cache, config.super_admin_role.clone())
    }

    pub async fn authorize(&self, user_id: Uuid, permission: &str) -> AppResult<bool> {
        self.policy.can(user_id, permission).await
    }

    pub async fn is_bypassed(&self, user_id: Uuid) -> AppResult<bool> {
        self.policy.is_bypassed(user_id).await
    }

    /// Group-derived permissions only, ignoring the bypass.
    pub async fn has_group_permission(&self, user_id: Uuid, permission: &str) -> AppResult<bool> {
        self.policy.inner().has_group_permission(user_id, permission).await
    }

    /// The user's derived set; empty when the user belongs to no group.
    pub async fn permissions_of(&self, user_id: Uuid) -> AppResult<Arc<PermissionSet>> {
        Ok(self
            .policy
            .inner()
            .derived_permissions(user_id)
            .await?
            .unwrap_or_default())
    }

    pub async fn principal(&self, user_id: Uuid) -> AppResult<Principal> {
        let super_admin = self.is_bypassed(user_id).await?;
        let permissions = self.permissions_of(user_id).await?;
        Ok(Principal::new(user_id)
            .with_super_admin(super_admin)
            .with_permissions(permissions))
    }

    /// Apply `mode` to a check: deny with 403 only in strict mode.
    pub async fn enforce(&self, mode: AuthzMode, user_id: Uuid, permission: &str) -> AppResult<()> {
        if mode == AuthzMode::Off {
            return Ok(());
        }

        if self.authorize(user_id, permission).await? {
            return Ok(());
        }

        match mode {
            AuthzMode::Advisory => {
                tracing::warn!(
                    user_id = %user_id,
                    permission = %permission,
                    "permission denied (advisory mode, allowing)"
                );
                Ok(())
            }
            _ => Err(AppError::forbidden(format!("missing permission {permission}"))),
        }
    }

    pub fn hooks(&self) -> &CacheInvalidator {
        &self.hooks
    }
}
