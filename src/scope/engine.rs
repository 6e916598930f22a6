//! Tenant boundary enforcement for entity reads and writes.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use super::entity::{EntityCatalog, EntityId, Record, Tenancy};
use super::predicate::Predicate;
use super::store::EntityStore;
use crate::audit::{AuditEventType, AuditRecord, AuditTrail};
use crate::config::{NoContextPolicy, ScopeConfig};
use crate::context::{ContextPropagator, ExecutionContext};
use crate::error::TenancyError;
use crate::storage::{StorageHandle, StorageRouter};
use crate::tenant::TenantId;

/// The one canonical lock ordering: deduplicated, ascending
pub fn lock_order(ids: impl IntoIterator<Item = EntityId>) -> Vec<EntityId> {
    let mut ids: Vec<EntityId> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkWriteReport {
    /// Order in which entity locks were acquired
    pub lock_order: Vec<EntityId>,
    pub written: usize,
}

/// Per-entity exclusive locks. Entries are created on demand and dropped once
/// nobody holds or waits on them.
#[derive(Default)]
struct LockTable {
    locks: DashMap<EntityId, Arc<Mutex<()>>>,
}

struct HeldLocks<'a> {
    table: &'a LockTable,
    ids: Vec<EntityId>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl LockTable {
    /// `ids` must already be in [`lock_order`]
    async fn acquire(&self, ids: Vec<EntityId>) -> HeldLocks<'_> {
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            let lock = self.locks.entry(*id).or_default().clone();
            guards.push(lock.lock_owned().await);
        }
        HeldLocks {
            table: self,
            ids,
            guards,
        }
    }
}

impl Drop for HeldLocks<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        for id in &self.ids {
            self.table
                .locks
                .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

/// Intercepts every entity operation and applies the tenant boundary using
/// the context of the unit of work it runs in.
pub struct ScopedQueryEngine {
    catalog: EntityCatalog,
    router: Arc<StorageRouter>,
    store: Arc<dyn EntityStore>,
    audit: AuditTrail,
    no_context_policy: NoContextPolicy,
    locks: LockTable,
}

impl ScopedQueryEngine {
    pub fn new(
        catalog: EntityCatalog,
        router: Arc<StorageRouter>,
        store: Arc<dyn EntityStore>,
        audit: AuditTrail,
        config: &ScopeConfig,
    ) -> Self {
        Self {
            catalog,
            router,
            store,
            audit,
            no_context_policy: config.no_context_policy,
            locks: LockTable::default(),
        }
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    pub async fn read(&self, entity_type: &str, predicate: Predicate) -> Result<Vec<Record>, TenancyError> {
        let ctx = ContextPropagator::current();

        match self.catalog.tenancy(entity_type) {
            Tenancy::Unscoped => {
                let handle = self.route(ctx.as_ref())?;
                self.store.select(&handle, entity_type, &predicate).await
            }
            Tenancy::TenantOwned => {
                let Some(tenant_id) = ctx.as_ref().and_then(|c| c.tenant_id()) else {
                    return self.read_without_tenant(entity_type, ctx.as_ref());
                };
                let handle = self.route(ctx.as_ref())?;
                let scoped = predicate.and(Predicate::tenant_is(tenant_id));

                let mut rows = self.store.select(&handle, entity_type, &scoped).await?;
                let before = rows.len();
                rows.retain(|r| r.tenant_id == Some(tenant_id));
                if rows.len() != before {
                    // The store ignored the ownership clause
                    error!(
                        entity_type,
                        tenant_id = %tenant_id,
                        dropped = before - rows.len(),
                        "Store returned rows owned by another tenant"
                    );
                }
                Ok(rows)
            }
        }
    }

    fn read_without_tenant(
        &self,
        entity_type: &str,
        ctx: Option<&ExecutionContext>,
    ) -> Result<Vec<Record>, TenancyError> {
        let detail = format!("read of tenant-owned '{}' without tenant context", entity_type);
        self.audit
            .record(AuditRecord::new(AuditEventType::ScopeViolation, detail.clone()).in_context(ctx));

        match self.no_context_policy {
            NoContextPolicy::FailClosed => Ok(Vec::new()),
            NoContextPolicy::FailLoud => Err(TenancyError::NoContext(detail)),
        }
    }

    /// Write one record. Tenant-owned records must carry the context tenant's
    /// id; anything else is rejected before the store is touched.
    pub async fn write(&self, record: Record) -> Result<(), TenancyError> {
        let ctx = ContextPropagator::current();
        self.check_ownership(&record, ctx.as_ref())?;
        let handle = self.route(ctx.as_ref())?;

        let _held = self.locks.acquire(vec![record.id]).await;
        self.store.upsert(&handle, std::slice::from_ref(&record)).await?;
        debug!(entity_type = %record.entity_type, id = %record.id, "Record written");
        Ok(())
    }

    /// Escape hatch for genuinely tenant-less records. Always lands in the
    /// system partition and always leaves exactly one SYSTEM_SCOPE_USE record.
    pub async fn write_system(&self, record: Record, reason: &str) -> Result<(), TenancyError> {
        let ctx = ContextPropagator::current();

        if let Some(owner) = record.tenant_id {
            let detail = format!(
                "system-scope write of {} '{}' carries tenant_id {}",
                record.entity_type, record.id, owner
            );
            self.audit.record(
                AuditRecord::new(AuditEventType::ScopeViolation, detail.clone()).in_context(ctx.as_ref()),
            );
            return Err(TenancyError::ScopeViolation(detail));
        }

        self.audit.record(
            AuditRecord::new(
                AuditEventType::SystemScopeUse,
                format!("{} '{}': {}", record.entity_type, record.id, reason),
            )
            .in_context(ctx.as_ref()),
        );

        let handle = self.router.system_handle();
        let _held = self.locks.acquire(vec![record.id]).await;
        self.store.upsert(&handle, std::slice::from_ref(&record)).await
    }

    /// Validate every record, lock the whole id set in canonical order, then
    /// write the batch atomically. One bad record rejects the batch.
    pub async fn bulk_write(&self, records: Vec<Record>) -> Result<BulkWriteReport, TenancyError> {
        let ctx = ContextPropagator::current();
        for record in &records {
            self.check_ownership(record, ctx.as_ref())?;
        }
        if records.is_empty() {
            return Ok(BulkWriteReport {
                lock_order: Vec::new(),
                written: 0,
            });
        }
        let handle = self.route(ctx.as_ref())?;

        let order = lock_order(records.iter().map(|r| r.id));
        let held = self.locks.acquire(order).await;
        self.store.upsert(&handle, &records).await?;

        let report = BulkWriteReport {
            lock_order: held.ids.clone(),
            written: records.len(),
        };
        drop(held);
        info!(written = report.written, locks = report.lock_order.len(), "Bulk write committed");
        Ok(report)
    }

    fn check_ownership(&self, record: &Record, ctx: Option<&ExecutionContext>) -> Result<(), TenancyError> {
        if !self.catalog.is_tenant_owned(&record.entity_type) {
            return Ok(());
        }

        let Some(active) = ctx.and_then(|c| c.tenant_id()) else {
            let detail = format!(
                "write of tenant-owned {} '{}' without tenant context",
                record.entity_type, record.id
            );
            self.audit
                .record(AuditRecord::new(AuditEventType::ScopeViolation, detail.clone()).in_context(ctx));
            return Err(TenancyError::NoContext(detail));
        };

        match record.tenant_id {
            Some(owner) if owner == active => Ok(()),
            owner => Err(self.ownership_violation(record, owner, active, ctx)),
        }
    }

    fn ownership_violation(
        &self,
        record: &Record,
        owner: Option<TenantId>,
        active: TenantId,
        ctx: Option<&ExecutionContext>,
    ) -> TenancyError {
        let detail = match owner {
            None => format!("{} '{}' has no tenant_id", record.entity_type, record.id),
            Some(owner) => format!(
                "{} '{}' owned by {} written under tenant {}",
                record.entity_type, record.id, owner, active
            ),
        };
        self.audit
            .record(AuditRecord::new(AuditEventType::ScopeViolation, detail.clone()).in_context(ctx));
        TenancyError::ScopeViolation(detail)
    }

    fn route(&self, ctx: Option<&ExecutionContext>) -> Result<StorageHandle, TenancyError> {
        let result = match ctx {
            Some(ctx) => self.router.route(ctx),
            None => Err(TenancyError::RoutingError(
                "no execution context for this unit of work".to_string(),
            )),
        };
        if let Err(e) = &result {
            self.audit
                .record(AuditRecord::new(AuditEventType::RoutingError, e.to_string()).in_context(ctx));
        }
        result
    }
}
