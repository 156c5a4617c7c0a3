//! Hooks the admin write paths call once their graph mutation has committed.
//!
//! | event                               | action                      |
//! |-------------------------------------|-----------------------------|
//! | group created with members          | invalidate those members    |
//! | group renamed / described           | none                        |
//! | group permissions or roles changed  | invalidate current members  |
//! | user joins or leaves a group        | invalidate that user        |
//! | group deleted                       | invalidate captured members |
//! | role permissions changed / deleted  | clear everything            |
//! | permission renamed / deleted        | clear everything            |
//!
//! Roles and permissions have no reverse index to the users holding them, so
//! edits to them clear the whole cache.

use std::sync::Arc;

use uuid::Uuid;

use super::cache::CacheLayer;
use super::graph::MembershipGraph;

#[derive(Clone)]
pub struct CacheInvalidator {
    graph: Arc<dyn MembershipGraph>,
    cache: Arc<CacheLayer>,
}

impl CacheInvalidator {
    pub fn new(graph: Arc<dyn MembershipGraph>, cache: Arc<CacheLayer>) -> Self {
        Self { graph, cache }
    }

    pub async fn on_group_created(&self, initial_members: &[Uuid]) {
        self.cache.invalidate_many(initial_members).await;
    }

    pub async fn on_group_membership_changed(&self, user_id: Uuid) {
        tracing::debug!(user_id = %user_id, "invalidating after membership change");
        self.cache.invalidate(user_id).await;
    }

    pub async fn on_group_permissions_changed(&self, group_id: Uuid) {
        self.invalidate_members(group_id, "group permissions changed").await;
    }

    pub async fn on_group_roles_changed(&self, group_id: Uuid) {
        self.invalidate_members(group_id, "group roles changed").await;
    }

    /// `members` must be read before the group's pivot rows are removed.
    pub async fn on_group_deleted(&self, group_id: Uuid, members: &[Uuid]) {
        tracing::info!(group_id = %group_id, members = members.len(), "invalidating members of deleted group");
        self.cache.invalidate_many(members).await;
    }

    pub async fn on_role_permissions_changed(&self, role_id: Uuid) {
        tracing::info!(role_id = %role_id, "role permissions changed, clearing permission cache");
        self.cache.invalidate_all().await;
    }

    pub async fn on_role_deleted(&self, role_id: Uuid) {
        tracing::info!(role_id = %role_id, "role deleted, clearing permission cache");
        self.cache.invalidate_all().await;
    }

    pub async fn on_permission_changed(&self, permission_id: Uuid) {
        tracing::info!(permission_id = %permission_id, "permission changed, clearing permission cache");
        self.cache.invalidate_all().await;
    }

    async fn invalidate_members(&self, group_id: Uuid, reason: &'static str) {
        match self.graph.members_of_group(group_id).await {
            Ok(members) => {
                tracing::info!(group_id = %group_id, members = members.len(), reason, "invalidating group members");
                self.cache.invalidate_many(&members).await;
            }
            Err(err) => {
                // Members unknown: only a full clear is sound.
                tracing::warn!(group_id = %group_id, error = %err, reason, "could not load members, clearing permission cache");
                self.cache.invalidate_all().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::authz::cache::MokaPermissionCache;
    use crate::authz::memory::InMemoryGraph;
    use crate::authz::PermissionSet;

    fn fixture() -> (Arc<InMemoryGraph>, Arc<CacheLayer>, CacheInvalidator) {
        let graph = Arc::new(InMemoryGraph::new());
        let cache = Arc::new(CacheLayer::new(Arc::new(MokaPermissionCache::new(
            Duration::from_secs(60),
            1_000,
        ))));
        let hooks = CacheInvalidator::new(graph.clone(), Arc::clone(&cache));
        (graph, cache, hooks)
    }

    async fn seed(cache: &CacheLayer, user: Uuid) {
        let set: PermissionSet = ["x.y".to_string()].into_iter().collect();
        cache.store(user, Arc::new(set), cache.generation()).await;
    }

    #[tokio::test]
    async fn group_permission_change_hits_only_members() {
        let (graph, cache, hooks) = fixture();
        let group = Uuid::new_v4();
        let (member, outsider) = (Uuid::new_v4(), Uuid::new_v4());
        graph.add_member(group, member).await;
        seed(&cache, member).await;
        seed(&cache, outsider).await;

        hooks.on_group_permissions_changed(group).await;

        assert!(cache.lookup(member).await.is_none());
        assert!(cache.lookup(outsider).await.is_some());
    }

    #[tokio::test]
    async fn membership_change_hits_one_user() {
        let (_, cache, hooks) = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        seed(&cache, a).await;
        seed(&cache, b).await;

        hooks.on_group_membership_changed(a).await;

        assert!(cache.lookup(a).await.is_none());
        assert!(cache.lookup(b).await.is_some());
    }

    #[tokio::test]
    async fn deleted_group_uses_captured_members() {
        let (graph, cache, hooks) = fixture();
        let group = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        graph.add_member(group, a).await;
        graph.add_member(group, b).await;
        seed(&cache, a).await;
        seed(&cache, b).await;

        let captured = graph.members_of_group(group).await.unwrap();
        graph.delete_group(group).await;
        hooks.on_group_deleted(group, &captured).await;

        assert!(cache.lookup(a).await.is_none());
        assert!(cache.lookup(b).await.is_none());
    }

    #[tokio::test]
    async fn role_and_permission_edits_clear_everything() {
        let (_, cache, hooks) = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        seed(&cache, a).await;
        seed(&cache, b).await;
        hooks.on_role_permissions_changed(Uuid::new_v4()).await;
        assert!(cache.lookup(a).await.is_none());
        assert!(cache.lookup(b).await.is_none());

        seed(&cache, a).await;
        hooks.on_permission_changed(Uuid::new_v4()).await;
        assert!(cache.lookup(a).await.is_none());

        seed(&cache, b).await;
        hooks.on_role_deleted(Uuid::new_v4()).await;
        assert!(cache.lookup(b).await.is_none());
    }

    #[tokio::test]
    async fn group_created_without_members_touches_nothing() {
        let (_, cache, hooks) = fixture();
        let user = Uuid::new_v4();
        seed(&cache, user).await;
        let before = cache.generation();

        hooks.on_group_created(&[]).await;

        assert_eq!(cache.generation(), before);
        assert!(cache.lookup(user).await.is_some());
    }
}
