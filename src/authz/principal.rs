use std::sync::Arc;

use uuid::Uuid;

use super::PermissionSet;

/// Snapshot of what a user can do, taken at one point in time.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub super_admin: bool,
    pub permissions: Arc<PermissionSet>,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            super_admin: false,
            permissions: Arc::new(PermissionSet::new()),
        }
    }

    pub fn with_super_admin(mut self, super_admin: bool) -> Self {
        self.super_admin = super_admin;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<PermissionSet>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Permission names in stable order, for display.
    pub fn sorted_permissions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.permissions.iter().cloned().collect();
        names.sort();
        names
    }
}
