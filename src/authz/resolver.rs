use std::sync::Arc;

use uuid::Uuid;

use super::graph::{GroupGrants, MembershipGraph};
use super::PermissionSet;
use crate::errors::AppResult;

/// Computes a user's derived permission set from the membership graph.
///
/// Holds no state of its own; every call reads the graph afresh.
#[derive(Clone)]
pub struct PermissionResolver {
    graph: Arc<dyn MembershipGraph>,
}

impl PermissionResolver {
    pub fn new(graph: Arc<dyn MembershipGraph>) -> Self {
        Self { graph }
    }

    /// Union of the permissions on every group of the user and on every role
    /// attached to those groups. A user without groups resolves to the empty set.
    pub async fn resolve(&self, user_id: Uuid) -> AppResult<PermissionSet> {
        let grants = self.graph.grants_of_user(user_id).await?;
        let set = flatten(&grants);
        tracing::debug!(
            user_id = %user_id,
            groups = grants.len(),
            permissions = set.len(),
            "resolved group permissions"
        );
        Ok(set)
    }
}

pub fn flatten(grants: &[GroupGrants]) -> PermissionSet {
    grants
        .iter()
        .flat_map(|group| {
            group
                .permissions
                .iter()
                .chain(group.roles.iter().flat_map(|role| role.permissions.iter()))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::graph::RoleGrants;
    use crate::authz::memory::InMemoryGraph;

    fn names(set: &PermissionSet) -> Vec<&str> {
        let mut v: Vec<&str> = set.iter().map(String::as_str).collect();
        v.sort();
        v
    }

    #[test]
    fn flatten_unions_direct_and_role_permissions() {
        let grants = vec![GroupGrants {
            group_id: Uuid::new_v4(),
            permissions: vec!["a.view".into()],
            roles: vec![RoleGrants {
                role_id: Uuid::new_v4(),
                permissions: vec!["b.view".into(), "a.view".into()],
            }],
        }];

        assert_eq!(names(&flatten(&grants)), vec!["a.view", "b.view"]);
    }

    #[test]
    fn flatten_of_nothing_is_empty() {
        assert!(flatten(&[]).is_empty());
    }

    #[tokio::test]
    async fn user_without_groups_resolves_to_empty_set() {
        let graph = Arc::new(InMemoryGraph::new());
        let resolver = PermissionResolver::new(graph);

        let set = resolver.resolve(Uuid::new_v4()).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn shared_role_counts_once() {
        let graph = Arc::new(InMemoryGraph::new());
        let user = Uuid::new_v4();
        let (g1, g2, role) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        graph.add_member(g1, user).await;
        graph.add_member(g2, user).await;
        graph.attach_role(g1, role).await;
        graph.attach_role(g2, role).await;
        graph.grant_role_permission(role, "reports.view").await;
        graph.attach_permission(g2, "reports.view").await;

        let resolver = PermissionResolver::new(graph);
        let set = resolver.resolve(user).await.unwrap();
        assert_eq!(names(&set), vec!["reports.view"]);
    }

    #[tokio::test]
    async fn empty_role_contributes_nothing() {
        let graph = Arc::new(InMemoryGraph::new());
        let user = Uuid::new_v4();
        let (group, role) = (Uuid::new_v4(), Uuid::new_v4());

        graph.add_member(group, user).await;
        graph.attach_role(group, role).await;
        graph.attach_permission(group, "groups.group.view").await;

        let resolver = PermissionResolver::new(graph);
        let set = resolver.resolve(user).await.unwrap();
        assert_eq!(names(&set), vec!["groups.group.view"]);
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let graph = Arc::new(InMemoryGraph::new());
        let user = Uuid::new_v4();
        let (group, role) = (Uuid::new_v4(), Uuid::new_v4());
        graph.add_member(group, user).await;
        graph.attach_permission(group, "a.b").await;
        graph.attach_role(group, role).await;
        graph.grant_role_permission(role, "c.d").await;

        let resolver = PermissionResolver::new(graph);
        let first = resolver.resolve(user).await.unwrap();
        let second = resolver.resolve(user).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn only_member_groups_contribute() {
        let graph = Arc::new(InMemoryGraph::new());
        let user = Uuid::new_v4();
        let (mine, other) = (Uuid::new_v4(), Uuid::new_v4());
        graph.add_member(mine, user).await;
        graph.add_member(other, Uuid::new_v4()).await;
        graph.attach_permission(mine, "mine.view").await;
        graph.attach_permission(other, "other.view").await;

        let resolver = PermissionResolver::new(graph);
        let set = resolver.resolve(user).await.unwrap();
        assert_eq!(names(&set), vec!["mine.view"]);
    }
}
