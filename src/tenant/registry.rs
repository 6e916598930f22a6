use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::identifier::{normalize_hostname, subdomain_label};
use super::{Slug, Tenant, TenantId, TenantIdentifier, TenantStatus, TenantStore};
use crate::config::RegistryConfig;
use crate::error::TenancyError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum AliasKey {
    Slug(Slug),
    Host(String),
}

struct CachedTenant {
    tenant: Arc<Tenant>,
    loaded_at: Instant,
}

#[derive(Default)]
struct RegistryCache {
    by_id: HashMap<TenantId, CachedTenant>,
    aliases: HashMap<AliasKey, TenantId>,
    /// Bumped by every invalidation. A store read that started under an
    /// older epoch must not be cached.
    epoch: u64,
}

impl RegistryCache {
    fn fresh(&self, id: &TenantId, ttl: Duration) -> Option<Arc<Tenant>> {
        self.by_id
            .get(id)
            .filter(|entry| entry.loaded_at.elapsed() < ttl)
            .map(|entry| entry.tenant.clone())
    }
}

/// Authoritative tenant lookup with a bounded-TTL in-memory cache.
///
/// The cache is the only state this crate shares between concurrent units of
/// work. Every mutation happens under one write lock, so a reader sees either
/// the previous `Arc<Tenant>` or the replacement.
pub struct TenantRegistry {
    store: Arc<dyn TenantStore>,
    config: RegistryConfig,
    cache: RwLock<RegistryCache>,
}

impl TenantRegistry {
    pub fn new(store: Arc<dyn TenantStore>, config: RegistryConfig) -> Self {
        Self {
            store,
            config,
            cache: RwLock::new(RegistryCache::default()),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.cache_ttl_secs)
    }

    /// Resolve any identifier shape to an active tenant.
    pub async fn resolve(&self, identifier: &TenantIdentifier) -> Result<Arc<Tenant>, TenancyError> {
        let tenant = match identifier {
            TenantIdentifier::Id(id) => self.lookup_id(*id).await?,
            TenantIdentifier::Slug(slug) => self.lookup_slug(slug).await?,
            TenantIdentifier::StorageKey(key) => {
                // Reverse of the canonical mapping, then the forward check
                let tenant = self.lookup_slug(&key.to_slug()).await?;
                tenant.filter(|t| &t.storage_key == key)
            }
            TenantIdentifier::Hostname(raw) => self.lookup_hostname(raw).await?,
        };

        let tenant =
            tenant.ok_or_else(|| TenancyError::TenantNotFound(identifier.to_string()))?;

        match tenant.status {
            TenantStatus::Active => Ok(tenant),
            TenantStatus::Suspended => Err(TenancyError::TenantSuspended(tenant.slug.to_string())),
            TenantStatus::Deleted => Err(TenancyError::TenantNotFound(identifier.to_string())),
        }
    }

    /// Evict one tenant and every alias that points at it.
    pub async fn invalidate(&self, id: TenantId) {
        let mut cache = self.cache.write().await;
        cache.epoch = cache.epoch.wrapping_add(1);
        let evicted = cache.by_id.remove(&id).is_some();
        cache.aliases.retain(|_, target| *target != id);
        debug!(tenant_id = %id, evicted, "Tenant cache entry invalidated");
    }

    /// The single status-change path: persist, then invalidate.
    pub async fn update_status(&self, id: TenantId, status: TenantStatus) -> Result<(), TenancyError> {
        self.store.update_status(id, status).await?;
        self.invalidate(id).await;
        info!(tenant_id = %id, status = status.as_str(), "Tenant status changed");
        Ok(())
    }

    /// Drop entries older than the TTL. Lookups already ignore them; this only
    /// reclaims memory.
    pub async fn purge_expired(&self) -> usize {
        let ttl = self.ttl();
        let mut cache = self.cache.write().await;
        let before = cache.by_id.len();
        cache.by_id.retain(|_, entry| entry.loaded_at.elapsed() < ttl);
        let RegistryCache { by_id, aliases, .. } = &mut *cache;
        aliases.retain(|_, id| by_id.contains_key(id));
        before - by_id.len()
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.by_id.len()
    }

    async fn lookup_id(&self, id: TenantId) -> Result<Option<Arc<Tenant>>, TenancyError> {
        let epoch = {
            let cache = self.cache.read().await;
            if let Some(hit) = cache.fresh(&id, self.ttl()) {
                return Ok(Some(hit));
            }
            cache.epoch
        };
        let found = self.store.find_by_id(id).await?;
        Ok(match found {
            Some(tenant) => Some(self.remember(tenant, None, epoch).await),
            None => None,
        })
    }

    async fn lookup_slug(&self, slug: &Slug) -> Result<Option<Arc<Tenant>>, TenancyError> {
        let alias = AliasKey::Slug(slug.clone());
        let epoch = match self.cached_alias(&alias).await {
            Ok(hit) => return Ok(Some(hit)),
            Err(epoch) => epoch,
        };
        let found = self.store.find_by_slug(slug).await?;
        Ok(match found {
            Some(tenant) => Some(self.remember(tenant, Some(alias), epoch).await),
            None => None,
        })
    }

    async fn lookup_hostname(&self, raw: &str) -> Result<Option<Arc<Tenant>>, TenancyError> {
        let host = normalize_hostname(raw);
        if let Some(label) = subdomain_label(&host, &self.config.base_domain) {
            return match Slug::parse(label) {
                Ok(slug) => self.lookup_slug(&slug).await,
                Err(_) => Ok(None),
            };
        }

        let alias = AliasKey::Host(host.clone());
        let epoch = match self.cached_alias(&alias).await {
            Ok(hit) => return Ok(Some(hit)),
            Err(epoch) => epoch,
        };
        let found = self.store.find_by_host(&host).await?;
        Ok(match found {
            Some(tenant) => Some(self.remember(tenant, Some(alias), epoch).await),
            None => None,
        })
    }

    /// A fresh hit, or the epoch to hand to `remember` on a miss.
    async fn cached_alias(&self, alias: &AliasKey) -> Result<Arc<Tenant>, u64> {
        let cache = self.cache.read().await;
        let hit = cache
            .aliases
            .get(alias)
            .and_then(|id| cache.fresh(id, self.ttl()));
        hit.ok_or(cache.epoch)
    }

    async fn remember(&self, tenant: Tenant, alias: Option<AliasKey>, epoch: u64) -> Arc<Tenant> {
        // Deleted tenants are never cached; their slug may already belong to someone else
        if tenant.status == TenantStatus::Deleted {
            return Arc::new(tenant);
        }

        let mut cache = self.cache.write().await;
        let id = tenant.id;
        if cache.epoch != epoch {
            // An invalidation landed while the store read was in flight
            debug!(tenant_id = %id, "Tenant read raced an invalidation, not caching");
            return Arc::new(tenant);
        }
        let ttl = self.ttl();

        // Keep the existing Arc when it is still fresh and identical so that
        // weak references held by running units stay upgradeable
        let reusable = cache
            .by_id
            .get(&id)
            .filter(|existing| existing.loaded_at.elapsed() < ttl && *existing.tenant == tenant)
            .map(|existing| existing.tenant.clone());
        let tenant = match reusable {
            Some(existing) => existing,
            None => {
                let fresh = Arc::new(tenant);
                cache.by_id.insert(
                    id,
                    CachedTenant {
                        tenant: fresh.clone(),
                        loaded_at: Instant::now(),
                    },
                );
                fresh
            }
        };

        if let Some(alias) = alias {
            cache.aliases.insert(alias, id);
        }
        debug!(tenant_id = %id, slug = %tenant.slug, "Tenant cached");
        tenant
    }
}
