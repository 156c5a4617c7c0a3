//! Per-user cache of derived permission sets.
//!
//! [`PermissionCache`] is the storage contract; [`MokaPermissionCache`] is the
//! in-process backend. [`CacheLayer`] sits in front of any backend and is the
//! only thing the evaluator and the invalidation hooks talk to: it turns
//! backend failures into cache misses and guards `put` against racing with an
//! invalidation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use uuid::Uuid;

use super::PermissionSet;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PermissionCache: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<Arc<PermissionSet>>, CacheError>;

    /// Store or overwrite. Last writer wins.
    async fn put(&self, user_id: Uuid, set: Arc<PermissionSet>) -> Result<(), CacheError>;

    async fn invalidate(&self, user_id: Uuid) -> Result<(), CacheError>;

    async fn invalidate_many(&self, user_ids: &[Uuid]) -> Result<(), CacheError> {
        for user_id in user_ids {
            self.invalidate(*user_id).await?;
        }
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), CacheError>;
}

/// Moka-backed cache. Entries expire after `ttl` as a safety net only.
pub struct MokaPermissionCache {
    cache: Cache<Uuid, Arc<PermissionSet>>,
}

impl MokaPermissionCache {
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl PermissionCache for MokaPermissionCache {
    async fn get(&self, user_id: Uuid) -> Result<Option<Arc<PermissionSet>>, CacheError> {
        Ok(self.cache.get(&user_id).await)
    }

    async fn put(&self, user_id: Uuid, set: Arc<PermissionSet>) -> Result<(), CacheError> {
        self.cache.insert(user_id, set).await;
        Ok(())
    }

    async fn invalidate(&self, user_id: Uuid) -> Result<(), CacheError> {
        self.cache.invalidate(&user_id).await;
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), CacheError> {
        // Moka guarantees `get` never returns an entry inserted before this call.
        self.cache.invalidate_all();
        Ok(())
    }
}

/// Failure-tolerant front for a [`PermissionCache`] backend.
///
/// Every invalidation bumps `generation` before touching the backend. A reader
/// records the generation before resolving and re-checks it after `put`; if an
/// invalidation ran in between, the reader removes its own entry, so a set
/// computed from pre-mutation state never outlives the invalidation.
pub struct CacheLayer {
    backend: Arc<dyn PermissionCache>,
    generation: AtomicU64,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn PermissionCache>) -> Self {
        Self {
            backend,
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Backend errors are reported as a miss.
    pub async fn lookup(&self, user_id: Uuid) -> Option<Arc<PermissionSet>> {
        match self.backend.get(user_id).await {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "permission cache read failed, resolving uncached");
                None
            }
        }
    }

    /// Store a freshly resolved set computed while `observed` was current.
    pub async fn store(&self, user_id: Uuid, set: Arc<PermissionSet>, observed: u64) {
        if self.generation() != observed {
            tracing::debug!(user_id = %user_id, "skipping cache put, invalidated during resolve");
            return;
        }

        if let Err(err) = self.backend.put(user_id, set).await {
            tracing::warn!(user_id = %user_id, error = %err, "permission cache write failed");
            return;
        }

        if self.generation() != observed {
            self.evict(user_id).await;
        }
    }

    pub async fn invalidate(&self, user_id: Uuid) {
        self.bump();
        self.evict(user_id).await;
    }

    pub async fn invalidate_many(&self, user_ids: &[Uuid]) {
        if user_ids.is_empty() {
            return;
        }
        self.bump();
        if let Err(err) = self.backend.invalidate_many(user_ids).await {
            tracing::warn!(users = user_ids.len(), error = %err, "bulk invalidation failed, clearing cache");
            self.clear().await;
        }
    }

    pub async fn invalidate_all(&self) {
        self.bump();
        self.clear().await;
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    async fn evict(&self, user_id: Uuid) {
        if let Err(err) = self.backend.invalidate(user_id).await {
            tracing::warn!(user_id = %user_id, error = %err, "invalidation failed, clearing cache");
            self.clear().await;
        }
    }

    async fn clear(&self) {
        if let Err(err) = self.backend.invalidate_all().await {
            tracing::error!(error = %err, "permission cache clear failed, entries may be stale until ttl");
        }
    }
}
