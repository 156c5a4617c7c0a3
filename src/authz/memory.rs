//! In-process membership graph, used by unit tests and embedders that keep
//! the graph in memory.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::graph::{DirectRoles, MembershipGraph};
use crate::errors::AppResult;

#[derive(Debug, Default)]
struct GraphState {
    group_members: HashMap<Uuid, HashSet<Uuid>>,
    group_permissions: HashMap<Uuid, HashSet<String>>,
    group_roles: HashMap<Uuid, HashSet<Uuid>>,
    role_permissions: HashMap<Uuid, HashSet<String>>,
    user_roles: HashMap<Uuid, HashSet<String>>,
}

#[derive(Debug, Default)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, group_id: Uuid, user_id: Uuid) {
        let mut state = self.state.write().await;
        state.group_members.entry(group_id).or_default().insert(user_id);
    }

    pub async fn attach_permission(&self, group_id: Uuid, permission: &str) {
        let mut state = self.state.write().await;
        state
            .group_permissions
            .entry(group_id)
            .or_default()
            .insert(permission.to_string());
    }

    pub async fn detach_permission(&self, group_id: Uuid, permission: &str) {
        let mut state = self.state.write().await;
        if let Some(permissions) = state.group_permissions.get_mut(&group_id) {
            permissions.remove(permission);
        }
    }

    pub async fn attach_role(&self, group_id: Uuid, role_id: Uuid) {
        let mut state = self.state.write().await;
        state.group_roles.entry(group_id).or_default().insert(role_id);
        state.role_permissions.entry(role_id).or_default();
    }

    pub async fn detach_role(&self, group_id: Uuid, role_id: Uuid) {
        let mut state = self.state.write().await;
        if let Some(roles) = state.group_roles.get_mut(&group_id) {
            roles.remove(&role_id);
        }
    }

    pub async fn grant_role_permission(&self, role_id: Uuid, permission: &str) {
        let mut state = self.state.write().await;
        state
            .role_permissions
            .entry(role_id)
            .or_default()
            .insert(permission.to_string());
    }

    /// Drop a permission from every group and role that references it.
    pub async fn delete_permission(&self, permission: &str) {
        let mut state = self.state.write().await;
        for permissions in state.group_permissions.values_mut() {
            permissions.remove(permission);
        }
        for permissions in state.role_permissions.values_mut() {
            permissions.remove(permission);
        }
    }

    /// Remove a group and all of its pivot rows, returning the members it had.
    pub async fn delete_group(&self, group_id: Uuid) -> Vec<Uuid> {
        let mut state = self.state.write().await;
        state.group_permissions.remove(&group_id);
        state.group_roles.remove(&group_id);
        state
            .group_members
            .remove(&group_id)
            .map(|members| members.into_iter().collect())
            .unwrap_or_default()
    }

    pub async fn assign_direct_role(&self, user_id: Uuid, role_name: &str) {
        let mut state = self.state.write().await;
        state
            .user_roles
            .entry(user_id)
            .or_default()
            .insert(role_name.to_string());
    }

    pub async fn revoke_direct_role(&self, user_id: Uuid, role_name: &str) {
        let mut state = self.state.write().await;
        if let Some(roles) = state.user_roles.get_mut(&user_id) {
            roles.remove(role_name);
        }
    }
}

#[async_trait]
impl MembershipGraph for InMemoryGraph {
    async fn groups_of_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .group_members
            .iter()
            .filter(|(_, members)| members.contains(&user_id))
            .map(|(group_id, _)| *group_id)
            .collect())
    }

    async fn permissions_of_group(&self, group_id: Uuid) -> AppResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .group_permissions
            .get(&group_id)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn roles_of_group(&self, group_id: Uuid) -> AppResult<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .group_roles
            .get(&group_id)
            .map(|r| r.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn permissions_of_role(&self, role_id: Uuid) -> AppResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .role_permissions
            .get(&role_id)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn members_of_group(&self, group_id: Uuid) -> AppResult<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .group_members
            .get(&group_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DirectRoles for InMemoryGraph {
    async fn has_direct_role(&self, user_id: Uuid, role_name: &str) -> AppResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .user_roles
            .get(&user_id)
            .is_some_and(|roles| roles.contains(role_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_group_returns_members_and_drops_pivots() {
        let graph = InMemoryGraph::new();
        let group = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        graph.add_member(group, a).await;
        graph.add_member(group, b).await;
        graph.attach_permission(group, "x.y").await;

        let mut members = graph.delete_group(group).await;
        members.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(members, expected);

        assert!(graph.groups_of_user(a).await.unwrap().is_empty());
        assert!(graph.permissions_of_group(group).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_roles_are_per_user() {
        let graph = InMemoryGraph::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        graph.assign_direct_role(a, "super_admin").await;

        assert!(graph.has_direct_role(a, "super_admin").await.unwrap());
        assert!(!graph.has_direct_role(b, "super_admin").await.unwrap());

        graph.revoke_direct_role(a, "super_admin").await;
        assert!(!graph.has_direct_role(a, "super_admin").await.unwrap());
    }
}
