//! Per-unit-of-work tenant context.
//!
//! The context lives in a tokio task-local slot that exists only while the
//! unit's future is being polled. Leaving the scope for any reason (return,
//! error, panic, or the future being dropped on cancellation or timeout)
//! tears the slot down, so a reused worker never sees the previous unit's
//! tenant.

pub mod middleware;
pub mod signals;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::audit::{AuditEventType, AuditRecord, AuditTrail};
use crate::error::TenancyError;
use crate::tenant::{Slug, StorageKey, Tenant, TenantId, TenantRegistry};

pub use middleware::tenant_context_middleware;
pub use signals::{ResolutionSignals, SignalSource};

tokio::task_local! {
    static CURRENT: RefCell<Option<ExecutionContext>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(CorrelationId)
    }
}

/// The tenant a context is bound to. The registry owns the `Tenant`; the
/// binding keeps a weak back-reference plus the fields every unit needs.
#[derive(Debug, Clone, Serialize)]
pub struct TenantBinding {
    pub id: TenantId,
    pub slug: Slug,
    pub storage_key: StorageKey,
    #[serde(skip)]
    tenant: Weak<Tenant>,
}

impl TenantBinding {
    /// The registry's current record, if it is still cached
    pub fn tenant(&self) -> Option<Arc<Tenant>> {
        self.tenant.upgrade()
    }
}

/// Immutable per-unit context. `tenant == None` is the explicit no-tenant
/// state; there is no default tenant.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    tenant: Option<TenantBinding>,
    correlation_id: CorrelationId,
    started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn for_tenant(tenant: &Arc<Tenant>, correlation_id: CorrelationId) -> Self {
        Self {
            tenant: Some(TenantBinding {
                id: tenant.id,
                slug: tenant.slug.clone(),
                storage_key: tenant.storage_key.clone(),
                tenant: Arc::downgrade(tenant),
            }),
            correlation_id,
            started_at: Utc::now(),
        }
    }

    pub fn no_tenant(correlation_id: CorrelationId) -> Self {
        Self {
            tenant: None,
            correlation_id,
            started_at: Utc::now(),
        }
    }

    pub fn tenant(&self) -> Option<&TenantBinding> {
        self.tenant.as_ref()
    }

    pub fn has_tenant(&self) -> bool {
        self.tenant.is_some()
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant.as_ref().map(|t| t.id)
    }

    pub fn storage_key(&self) -> Option<&StorageKey> {
        self.tenant.as_ref().map(|t| &t.storage_key)
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Resolves the tenant for a unit of work and holds it in task-local storage.
pub struct ContextPropagator {
    registry: Arc<TenantRegistry>,
    audit: AuditTrail,
}

impl ContextPropagator {
    pub fn new(registry: Arc<TenantRegistry>, audit: AuditTrail) -> Self {
        Self { registry, audit }
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    pub async fn begin(&self, signals: &ResolutionSignals) -> Result<ExecutionContext, TenancyError> {
        self.begin_with(signals, CorrelationId::new()).await
    }

    /// Resolve signals in precedence order. The first candidate that resolves
    /// wins; candidates that don't exist are audited and skipped. A suspended
    /// tenant stops resolution outright. Nothing resolving yields the
    /// no-tenant context.
    pub async fn begin_with(
        &self,
        signals: &ResolutionSignals,
        correlation_id: CorrelationId,
    ) -> Result<ExecutionContext, TenancyError> {
        for (source, raw) in signals.ordered() {
            let Some(identifier) = source.parse(raw) else {
                self.resolution_failure(correlation_id, format!(
                    "{} signal '{}' is not a valid identifier",
                    source.as_str(),
                    raw
                ));
                continue;
            };

            match self.registry.resolve(&identifier).await {
                Ok(tenant) => {
                    debug!(
                        correlation_id = %correlation_id,
                        tenant_id = %tenant.id,
                        source = source.as_str(),
                        "Tenant resolved"
                    );
                    return Ok(ExecutionContext::for_tenant(&tenant, correlation_id));
                }
                Err(TenancyError::TenantNotFound(_)) => {
                    self.resolution_failure(correlation_id, format!(
                        "{} signal {} matched no tenant",
                        source.as_str(),
                        identifier
                    ));
                }
                Err(err @ TenancyError::TenantSuspended(_)) => {
                    self.resolution_failure(correlation_id, format!(
                        "{} signal {} names a suspended tenant",
                        source.as_str(),
                        identifier
                    ));
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }

        trace!(correlation_id = %correlation_id, "No tenant resolved for unit of work");
        Ok(ExecutionContext::no_tenant(correlation_id))
    }

    /// Resolve and run `fut` as one unit of work.
    pub async fn run<F>(&self, signals: &ResolutionSignals, fut: F) -> Result<F::Output, TenancyError>
    where
        F: Future,
    {
        let ctx = self.begin(signals).await?;
        Self::scope(ctx, fut).await
    }

    /// Install `ctx` for the lifetime of `fut`. Nested scopes are rejected:
    /// a unit of work resolves its tenant exactly once.
    pub async fn scope<F>(ctx: ExecutionContext, fut: F) -> Result<F::Output, TenancyError>
    where
        F: Future,
    {
        if Self::in_unit_of_work() {
            return Err(TenancyError::ContextAlreadyActive);
        }
        Ok(CURRENT.scope(RefCell::new(Some(ctx)), fut).await)
    }

    /// Blocking counterpart of [`ContextPropagator::scope`] for plain worker threads.
    pub fn scope_sync<R>(ctx: ExecutionContext, f: impl FnOnce() -> R) -> Result<R, TenancyError> {
        if Self::in_unit_of_work() {
            return Err(TenancyError::ContextAlreadyActive);
        }
        Ok(CURRENT.sync_scope(RefCell::new(Some(ctx)), f))
    }

    /// Spawn a child task that carries the current context. Tasks spawned
    /// with plain `tokio::spawn` start with no context at all.
    pub fn spawn_scoped<F>(fut: F) -> tokio::task::JoinHandle<Result<F::Output, TenancyError>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let ctx = Self::current();
        tokio::spawn(async move {
            match ctx {
                Some(ctx) => Self::scope(ctx, fut).await,
                None => Err(TenancyError::NoContext(
                    "spawn_scoped called outside a unit of work".to_string(),
                )),
            }
        })
    }

    /// The context of the unit of work running on this task, if any
    pub fn current() -> Option<ExecutionContext> {
        CURRENT
            .try_with(|slot| slot.borrow().clone())
            .ok()
            .flatten()
    }

    /// Clear the current context. Idempotent, and a no-op outside a scope.
    pub fn end() {
        let cleared = CURRENT
            .try_with(|slot| slot.borrow_mut().take().is_some())
            .unwrap_or(false);
        if cleared {
            trace!("Execution context cleared");
        }
    }

    fn in_unit_of_work() -> bool {
        CURRENT.try_with(|_| ()).is_ok()
    }

    fn resolution_failure(&self, correlation_id: CorrelationId, detail: String) {
        let mut record = AuditRecord::new(AuditEventType::ResolutionFailure, detail);
        record.correlation_id = Some(correlation_id);
        self.audit.record(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::config::RegistryConfig;
    use crate::tenant::{MemoryTenantStore, TenantStatus};

    async fn propagator() -> (ContextPropagator, Arc<MemorySink>, TenantId) {
        let store = Arc::new(MemoryTenantStore::new());
        let acme = Tenant::new(Slug::parse("acme").unwrap());
        let acme_id = acme.id;
        store.insert(acme).await.unwrap();
        let mut paused = Tenant::new(Slug::parse("paused").unwrap());
        paused.status = TenantStatus::Suspended;
        store.insert(paused).await.unwrap();

        let registry = Arc::new(TenantRegistry::new(
            store,
            RegistryConfig {
                cache_ttl_secs: 3600,
                base_domain: "example.com".into(),
            },
        ));
        let sink = Arc::new(MemorySink::new());
        let audit = AuditTrail::tracing_only().with_sink(sink.clone());
        (ContextPropagator::new(registry, audit), sink, acme_id)
    }

    #[tokio::test]
    async fn hostname_resolves_and_empty_signals_yield_no_tenant() {
        let (propagator, _, acme_id) = propagator().await;

        let ctx = propagator
            .begin(&ResolutionSignals::new().with_hostname("acme.example.com"))
            .await
            .unwrap();
        assert_eq!(ctx.tenant_id(), Some(acme_id));
        assert_eq!(ctx.tenant().unwrap().slug.as_str(), "acme");

        let empty = propagator.begin(&ResolutionSignals::new()).await.unwrap();
        assert!(!empty.has_tenant());
    }

    #[tokio::test]
    async fn binding_follows_the_registry_record() {
        let (propagator, _, acme_id) = propagator().await;
        let ctx = propagator
            .begin(&ResolutionSignals::new().with_header("acme"))
            .await
            .unwrap();
        let binding = ctx.tenant().unwrap();
        assert_eq!(binding.tenant().map(|t| t.status), Some(TenantStatus::Active));

        propagator.registry().invalidate(acme_id).await;
        assert!(binding.tenant().is_none());
        assert_eq!(ctx.storage_key().map(|k| k.as_str()), Some("tenant_acme"));
    }

    #[tokio::test]
    async fn unresolvable_signals_fall_through_and_are_audited() {
        let (propagator, sink, acme_id) = propagator().await;
        let signals = ResolutionSignals::new()
            .with_header("ghost")
            .with_path_segment("acme");

        let ctx = propagator.begin(&signals).await.unwrap();
        assert_eq!(ctx.tenant_id(), Some(acme_id));
        assert_eq!(sink.count(AuditEventType::ResolutionFailure), 1);
    }

    #[tokio::test]
    async fn suspended_tenant_stops_resolution() {
        let (propagator, _, _) = propagator().await;
        let signals = ResolutionSignals::new()
            .with_header("paused")
            .with_hostname("acme.example.com");

        let result = propagator.begin(&signals).await;
        assert!(matches!(result, Err(TenancyError::TenantSuspended(_))));
    }

    #[tokio::test]
    async fn context_is_visible_only_inside_scope() {
        let (propagator, _, acme_id) = propagator().await;
        let signals = ResolutionSignals::new().with_path_segment("acme");

        let seen = propagator
            .run(&signals, async { ContextPropagator::current().and_then(|c| c.tenant_id()) })
            .await
            .unwrap();
        assert_eq!(seen, Some(acme_id));
        assert!(ContextPropagator::current().is_none());
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        ContextPropagator::end();
        ContextPropagator::end();

        let ctx = ExecutionContext::no_tenant(CorrelationId::new());
        let after = ContextPropagator::scope(ctx, async {
            ContextPropagator::end();
            ContextPropagator::end();
            ContextPropagator::current()
        })
        .await
        .unwrap();
        assert!(after.is_none());
    }

    #[tokio::test]
    async fn nested_scope_is_rejected() {
        let outer = ExecutionContext::no_tenant(CorrelationId::new());
        let inner = ExecutionContext::no_tenant(CorrelationId::new());
        let nested = ContextPropagator::scope(outer, async move {
            ContextPropagator::scope(inner, async {}).await
        })
        .await
        .unwrap();
        assert!(matches!(nested, Err(TenancyError::ContextAlreadyActive)));
    }

    #[tokio::test]
    async fn spawned_tasks_inherit_only_when_asked() {
        let ctx = ExecutionContext::no_tenant(CorrelationId::new());
        let correlation = ctx.correlation_id();
        let (plain, scoped) = ContextPropagator::scope(ctx, async {
            let plain = tokio::spawn(async { ContextPropagator::current().is_some() });
            let scoped = ContextPropagator::spawn_scoped(async {
                ContextPropagator::current().map(|c| c.correlation_id())
            });
            (plain.await.unwrap(), scoped.await.unwrap().unwrap())
        })
        .await
        .unwrap();

        assert!(!plain);
        assert_eq!(scoped, Some(correlation));
    }

    #[test]
    fn sync_scope_clears_after_panic() {
        let ctx = ExecutionContext::no_tenant(CorrelationId::new());
        let result = std::panic::catch_unwind(|| {
            ContextPropagator::scope_sync(ctx, || panic!("unit failed"))
        });
        assert!(result.is_err());
        assert!(ContextPropagator::current().is_none());
    }
}
