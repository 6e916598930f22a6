#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use tenancy_core::audit::{AuditTrail, MemorySink};
use tenancy_core::cache::MemoryBackend;
use tenancy_core::config::{AppConfig, NoContextPolicy};
use tenancy_core::context::{ContextPropagator, CorrelationId, ExecutionContext};
use tenancy_core::scope::MemoryEntityStore;
use tenancy_core::server::{AppState, Backends};
use tenancy_core::tenant::{MemoryTenantStore, Slug, Tenant, TenantStatus};

pub const BASE_DOMAIN: &str = "example.com";

/// In-process wiring of the whole core with inspectable backends
pub struct Harness {
    pub state: Arc<AppState>,
    pub tenants: Arc<MemoryTenantStore>,
    pub entities: Arc<MemoryEntityStore>,
    pub cache_backend: Arc<MemoryBackend>,
    pub audit: Arc<MemorySink>,
    pub acme: Arc<Tenant>,
    pub globex: Arc<Tenant>,
    pub initech: Arc<Tenant>,
}

pub fn test_config(policy: NoContextPolicy) -> AppConfig {
    let mut config = AppConfig::development();
    config.registry.base_domain = BASE_DOMAIN.to_string();
    config.scope.no_context_policy = policy;
    config.scope.tenant_owned = vec!["tickets".to_string(), "notes".to_string()];
    config
}

pub async fn harness() -> Result<Harness> {
    harness_with(NoContextPolicy::FailLoud).await
}

pub async fn harness_with(policy: NoContextPolicy) -> Result<Harness> {
    let tenants = Arc::new(MemoryTenantStore::new());

    let acme = Tenant::new(Slug::parse("acme")?);
    let globex = Tenant::new(Slug::parse("globex")?).with_host("shop.globex.test");
    let mut initech = Tenant::new(Slug::parse("initech")?);
    initech.status = TenantStatus::Suspended;

    for tenant in [&acme, &globex, &initech] {
        tenants.insert(tenant.clone()).await?;
    }

    let entities = Arc::new(MemoryEntityStore::new());
    let cache_backend = Arc::new(MemoryBackend::new());
    let audit = Arc::new(MemorySink::new());

    let backends = Backends {
        tenants: tenants.clone(),
        entities: entities.clone(),
        cache: cache_backend.clone(),
        pools: None,
    };
    let trail = AuditTrail::tracing_only().with_sink(audit.clone());
    let state = AppState::assemble(&test_config(policy), backends, trail)?;

    Ok(Harness {
        state: Arc::new(state),
        tenants,
        entities,
        cache_backend,
        audit,
        acme: Arc::new(acme),
        globex: Arc::new(globex),
        initech: Arc::new(initech),
    })
}

impl Harness {
    pub fn propagator(&self) -> &ContextPropagator {
        &self.state.propagator
    }

    /// Context bound to `tenant` without going through resolution
    pub fn context_for(&self, tenant: &Arc<Tenant>) -> ExecutionContext {
        ExecutionContext::for_tenant(tenant, CorrelationId::new())
    }
}
