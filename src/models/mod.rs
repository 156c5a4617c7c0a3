pub mod group;
pub mod rbac;
pub mod user;
