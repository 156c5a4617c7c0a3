pub mod auth;
pub mod groups;
pub mod health;
pub mod rbac;
