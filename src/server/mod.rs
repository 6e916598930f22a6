//! HTTP surface: shared state, routes and the bootstrap used by the server binary.

pub mod handlers;
pub mod response;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

use crate::audit::{AuditTrail, PgAuditSink};
use crate::cache::{CacheBackend, MemoryBackend, NamespacedCache, RedisBackend};
use crate::config::AppConfig;
use crate::context::{tenant_context_middleware, ContextPropagator};
use crate::error::TenancyError;
use crate::scope::{EntityCatalog, EntityStore, PgEntityStore, ScopedQueryEngine};
use crate::storage::{PartitionName, PoolRegistry, StorageRouter};
use crate::tenant::{PgTenantStore, TenantRegistry, TenantStore};

/// Everything a request handler can reach
pub struct AppState {
    pub registry: Arc<TenantRegistry>,
    pub propagator: Arc<ContextPropagator>,
    pub storage: Arc<StorageRouter>,
    pub engine: Arc<ScopedQueryEngine>,
    pub cache: NamespacedCache,
    pub pools: Option<Arc<PoolRegistry>>,
}

/// The external seams the core is wired to
pub struct Backends {
    pub tenants: Arc<dyn TenantStore>,
    pub entities: Arc<dyn EntityStore>,
    pub cache: Arc<dyn CacheBackend>,
    pub pools: Option<Arc<PoolRegistry>>,
}

impl AppState {
    pub fn assemble(config: &AppConfig, backends: Backends, audit: AuditTrail) -> Result<Self, TenancyError> {
        let registry = Arc::new(TenantRegistry::new(backends.tenants, config.registry.clone()));
        let propagator = Arc::new(ContextPropagator::new(registry.clone(), audit.clone()));
        let storage = Arc::new(StorageRouter::new(&config.storage, audit.clone())?);

        let catalog = config
            .scope
            .tenant_owned
            .iter()
            .fold(EntityCatalog::new(), |catalog, name| catalog.tenant_owned(name.clone()));
        let engine = Arc::new(ScopedQueryEngine::new(
            catalog,
            storage.clone(),
            backends.entities,
            audit,
            &config.scope,
        ));
        let cache = NamespacedCache::new(backends.cache, config.cache.clone());

        Ok(Self {
            registry,
            propagator,
            storage,
            engine,
            cache,
            pools: backends.pools,
        })
    }

    /// Production wiring: Postgres from `DATABASE_URL`, Redis from
    /// `REDIS_URL` when set, otherwise an in-process cache.
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let pools = Arc::new(PoolRegistry::from_env()?);
        let system = PartitionName::parse(&config.storage.system_partition)?;
        let system_pool = pools.partition_pool(&system).await?;

        let mut audit = AuditTrail::new(&config.audit);
        if config.audit.persist {
            audit = audit.with_sink(Arc::new(PgAuditSink::new(system_pool.clone())));
        }

        let cache: Arc<dyn CacheBackend> = match std::env::var("REDIS_URL") {
            Ok(url) => Arc::new(RedisBackend::connect(&url).await?),
            Err(_) => {
                info!("REDIS_URL not set; using in-process cache");
                Arc::new(MemoryBackend::new())
            }
        };

        let backends = Backends {
            tenants: Arc::new(PgTenantStore::new(system_pool)),
            entities: Arc::new(PgEntityStore::new(pools.clone())),
            cache,
            pools: Some(pools),
        };
        Ok(Self::assemble(config, backends, audit)?)
    }

    /// Reclaim expired registry and cache entries every `every` until the
    /// returned handle is aborted. Lookups already ignore expired entries;
    /// this only bounds memory.
    pub fn spawn_maintenance(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let tenants = registry.purge_expired().await;
                let entries = cache.evict_expired().await;
                if tenants + entries > 0 {
                    let cached_tenants = registry.cached_len().await;
                    debug!(
                        tenants,
                        entries,
                        cached_tenants,
                        "Expired entries reclaimed"
                    );
                }
            }
        })
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    let tenant_routes = Router::new()
        .route("/api/context", get(handlers::context))
        .route("/t/:tenant/api/context", get(handlers::context))
        .route("/api/data/:entity", get(handlers::data_get).post(handlers::data_post))
        .route(
            "/t/:tenant/api/data/:entity",
            get(handlers::data_get).post(handlers::data_post),
        )
        .layer(middleware::from_fn_with_state(
            state.propagator.clone(),
            tenant_context_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(tenant_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
