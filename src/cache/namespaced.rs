use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::context::ContextPropagator;
use crate::error::TenancyError;
use crate::tenant::TenantId;

/// Physical key for a tenant's logical key. Built from the immutable tenant
/// id so a recycled slug can never land on an old tenant's entries.
pub fn compose(tenant_id: TenantId, logical_key: &str) -> String {
    format!("tenant:{}:{}", tenant_id, logical_key)
}

fn lock_key(physical_key: &str) -> String {
    format!("lock:{}", physical_key)
}

/// Tenant-partitioned view over a shared cache backend. Every operation
/// takes the tenant from the current unit of work.
///
/// Backend failures never surface as data: a failed `get` is a miss, failed
/// writes are logged and dropped.
#[derive(Clone)]
pub struct NamespacedCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
}

impl NamespacedCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    fn physical_key(&self, logical_key: &str, op: &str) -> Result<String, TenancyError> {
        ContextPropagator::current()
            .and_then(|ctx| ctx.tenant_id())
            .map(|tenant_id| compose(tenant_id, logical_key))
            .ok_or_else(|| TenancyError::NoContext(format!("cache {} without tenant context", op)))
    }

    pub async fn get<T: DeserializeOwned>(&self, logical_key: &str) -> Result<Option<T>, TenancyError> {
        let key = self.physical_key(logical_key, "get")?;
        Ok(self.fetch(&key).await)
    }

    pub async fn set<T: Serialize>(
        &self,
        logical_key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), TenancyError> {
        let key = self.physical_key(logical_key, "set")?;
        self.store(&key, value, ttl.unwrap_or_else(|| self.config.default_ttl()))
            .await;
        Ok(())
    }

    /// Reclaim expired entries across every tenant. Maintenance only; it
    /// needs no unit of work.
    pub async fn evict_expired(&self) -> usize {
        self.backend.evict_expired().await
    }

    pub async fn delete(&self, logical_key: &str) -> Result<(), TenancyError> {
        let key = self.physical_key(logical_key, "delete")?;
        if let Err(e) = self.backend.delete(&key).await {
            warn!(key = %key, error = %e, "Cache delete failed");
        }
        Ok(())
    }

    /// Return the cached value, or compute and cache it. Concurrent callers
    /// on the same key share one computation: the lock holder computes while
    /// the others poll for its result, up to `lock_wait`. A waiter that times
    /// out computes for itself, so a crashed holder only costs latency.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        logical_key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<TenancyError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.physical_key(logical_key, "get_or_compute")?;
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());

        if let Some(hit) = self.fetch(&key).await {
            return Ok(hit);
        }

        let lock = lock_key(&key);
        let token = Uuid::new_v4().to_string();
        let acquired = match self.backend.try_lock(&lock, &token, self.config.lock_ttl()).await {
            Ok(acquired) => acquired,
            Err(e) => {
                // No lock service means nobody to wait for
                warn!(key = %key, error = %e, "Cache lock unavailable; computing directly");
                return self.compute_and_store(&key, ttl, compute).await;
            }
        };

        if acquired {
            // Someone may have finished between our miss and the lock
            let result = match self.fetch(&key).await {
                Some(hit) => Ok(hit),
                None => self.compute_and_store(&key, ttl, compute).await,
            };
            if let Err(e) = self.backend.unlock(&lock, &token).await {
                warn!(key = %key, error = %e, "Cache unlock failed; lock will expire");
            }
            return result;
        }

        let deadline = Instant::now() + self.config.lock_wait();
        while Instant::now() < deadline {
            tokio::time::sleep(self.config.lock_poll()).await;
            if let Some(hit) = self.fetch(&key).await {
                return Ok(hit);
            }
        }

        debug!(key = %key, "Timed out waiting for cache lock holder; computing directly");
        self.compute_and_store(&key, ttl, compute).await
    }

    async fn compute_and_store<T, E, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = compute().await?;
        self.store(key, &value, ttl).await;
        Ok(value)
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache get failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value did not decode; treating as miss");
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "Value not cacheable");
                return;
            }
        };
        if let Err(e) = self.backend.set(key, &json, ttl).await {
            warn!(key = %key, error = %e, "Cache set failed");
        }
    }
}
