use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::cache::CacheLayer;
use super::graph::{DirectRoles, MembershipGraph};
use super::matcher::matches;
use super::resolver::PermissionResolver;
use super::PermissionSet;
use crate::errors::AppResult;

/// Policy evaluator trait for pluggable authorization logic
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Check if the user may use `permission`. Store failures are errors, never
    /// a silent grant or deny.
    async fn can(&self, user_id: Uuid, permission: &str) -> AppResult<bool>;
}

/// Grants what the user's groups grant, through the per-user cache.
///
/// Evaluation order:
/// 1. no groups -> deny (cache untouched)
/// 2. cached set, or resolve and cache on a miss
/// 3. wildcard / exact match
pub struct GroupPolicyEvaluator {
    graph: Arc<dyn MembershipGraph>,
    resolver: PermissionResolver,
    cache: Arc<CacheLayer>,
}

impl GroupPolicyEvaluator {
    pub fn new(graph: Arc<dyn MembershipGraph>, cache: Arc<CacheLayer>) -> Self {
        Self {
            resolver: PermissionResolver::new(Arc::clone(&graph)),
            graph,
            cache,
        }
    }

    pub async fn has_group_permission(&self, user_id: Uuid, permission: &str) -> AppResult<bool> {
        let Some(set) = self.derived_permissions(user_id).await? else {
            tracing::debug!(user_id = %user_id, permission = %permission, "no groups, denied");
            return Ok(false);
        };

        let granted = matches(permission, &set);
        tracing::debug!(
            user_id = %user_id,
            permission = %permission,
            granted,
            "group permission check"
        );
        Ok(granted)
    }

    /// The user's derived set, or `None` when the user belongs to no group.
    pub async fn derived_permissions(&self, user_id: Uuid) -> AppResult<Option<Arc<PermissionSet>>> {
        if self.graph.groups_of_user(user_id).await?.is_empty() {
            return Ok(None);
        }

        if let Some(set) = self.cache.lookup(user_id).await {
            tracing::debug!(user_id = %user_id, "permission cache hit");
            return Ok(Some(set));
        }

        tracing::debug!(user_id = %user_id, "permission cache miss");
        let observed = self.cache.generation();
        let set = Arc::new(self.resolver.resolve(user_id).await?);
        self.cache.store(user_id, Arc::clone(&set), observed).await;
        Ok(Some(set))
    }
}

#[async_trait]
impl PolicyEvaluator for GroupPolicyEvaluator {
    async fn can(&self, user_id: Uuid, permission: &str) -> AppResult<bool> {
        self.has_group_permission(user_id, permission).await
    }
}

/// Pre-check wrapping any evaluator: direct holders of the super-admin role
/// pass every check before `inner` is consulted.
///
/// Only direct role assignments count; a super-admin role attached to a group
/// grants that role's permissions like any other role, nothing more.
pub struct SuperAdminBypass<E> {
    roles: Arc<dyn DirectRoles>,
    role_name: String,
    inner: E,
}

impl<E> SuperAdminBypass<E> {
    pub fn new(roles: Arc<dyn DirectRoles>, role_name: impl Into<String>, inner: E) -> Self {
        Self {
            roles,
            role_name: role_name.into(),
            inner,
        }
    }

    pub async fn is_bypassed(&self, user_id: Uuid) -> AppResult<bool> {
        self.roles.has_direct_role(user_id, &self.role_name).await
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: PolicyEvaluator> PolicyEvaluator for SuperAdminBypass<E> {
    async fn can(&self, user_id: Uuid, permission: &str) -> AppResult<bool> {
        if self.is_bypassed(user_id).await? {
            tracing::debug!(
                user_id = %user_id,
                permission = %permission,
                "super_admin bypass"
            );
            return Ok(true);
        }

        self.inner.can(user_id, permission).await
    }
}
