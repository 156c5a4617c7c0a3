use std::time::Duration;

use crate::authz::{roles, AuthzMode};
use crate::errors::AppError;

const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 10_000;

/// Authorization settings read from the environment.
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    pub mode: AuthzMode,
    /// Name of the role whose direct holders bypass every check.
    pub super_admin_role: String,
    /// Upper bound on how long a cached permission set may live. Correctness
    /// comes from invalidation; this only limits the blast radius of a missed one.
    pub cache_ttl: Duration,
    pub cache_max_entries: u64,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            mode: AuthzMode::Strict,
            super_admin_role: roles::SUPER_ADMIN.to_string(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl AuthzConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let mode = match std::env::var("AUTHZ_MODE") {
            Ok(value) => AuthzMode::parse(&value).ok_or_else(|| {
                AppError::configuration("AUTHZ_MODE must be one of off, advisory, strict")
            })?,
            Err(_) => defaults.mode,
        };

        let super_admin_role = std::env::var("SUPER_ADMIN_ROLE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(defaults.super_admin_role);

        let cache_ttl = env_u64("PERMISSION_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache_ttl);

        let cache_max_entries =
            env_u64("PERMISSION_CACHE_MAX_ENTRIES")?.unwrap_or(defaults.cache_max_entries);

        Ok(Self {
            mode,
            super_admin_role,
            cache_ttl,
            cache_max_entries,
        })
    }

    pub fn with_mode(mut self, mode: AuthzMode) -> Self {
        self.mode = mode;
        self
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, AppError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| AppError::configuration(format!("{key} must be a valid integer"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_strict_with_safety_net_ttl() {
        let config = AuthzConfig::default();
        assert_eq!(config.mode, AuthzMode::Strict);
        assert_eq!(config.super_admin_role, "super_admin");
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache_max_entries, 10_000);
    }

    #[test]
    fn with_mode_overrides() {
        let config = AuthzConfig::default().with_mode(AuthzMode::Advisory);
        assert_eq!(config.mode, AuthzMode::Advisory);
    }
}
