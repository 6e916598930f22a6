use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::audit::{AuditEventType, AuditRecord, AuditTrail};
use crate::config::StorageConfig;
use crate::context::ExecutionContext;
use crate::error::TenancyError;
use crate::tenant::{StorageKey, TenantId};

/// A physical partition name, safe to splice into a connection URL or a
/// quoted identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PartitionName(String);

impl PartitionName {
    /// Accepts `[a-z0-9_]`, starting with a letter, at most 63 bytes.
    pub fn parse(value: &str) -> Result<Self, TenancyError> {
        let valid = !value.is_empty()
            && value.len() <= 63
            && value.starts_with(|c: char| c.is_ascii_lowercase())
            && value
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
        if !valid {
            return Err(TenancyError::InvalidIdentifier(format!(
                "invalid partition name '{}'",
                value
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&StorageKey> for PartitionName {
    fn from(key: &StorageKey) -> Self {
        // Storage keys are already restricted to the partition alphabet
        Self(key.as_str().to_string())
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "tenant_id", rename_all = "lowercase")]
pub enum HandleScope {
    Tenant(TenantId),
    System,
}

/// Opaque descriptor consumed by the persistence layer to pick a partition.
/// Building one never touches the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageHandle {
    partition: PartitionName,
    scope: HandleScope,
}

impl StorageHandle {
    pub fn partition(&self) -> &PartitionName {
        &self.partition
    }

    pub fn scope(&self) -> HandleScope {
        self.scope
    }

    pub fn is_system(&self) -> bool {
        self.scope == HandleScope::System
    }
}

/// Maps contexts to partitions and gates schema changes
pub struct StorageRouter {
    system_partition: PartitionName,
    schema_allowlist: Vec<PartitionName>,
    audit: AuditTrail,
}

impl StorageRouter {
    pub fn new(config: &StorageConfig, audit: AuditTrail) -> Result<Self, TenancyError> {
        let system_partition = PartitionName::parse(&config.system_partition)?;
        let schema_allowlist = config
            .schema_allowlist
            .iter()
            .map(|name| PartitionName::parse(name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            system_partition,
            schema_allowlist,
            audit,
        })
    }

    /// Handle for the context's own partition. A context without a tenant
    /// has nowhere to go; there is no fallback partition.
    pub fn route(&self, ctx: &ExecutionContext) -> Result<StorageHandle, TenancyError> {
        let binding = ctx.tenant().ok_or_else(|| {
            TenancyError::RoutingError("execution context has no tenant".to_string())
        })?;

        Ok(StorageHandle {
            partition: PartitionName::from(&binding.storage_key),
            scope: HandleScope::Tenant(binding.id),
        })
    }

    /// The partition holding tenant records. Independent of any context.
    pub fn system_handle(&self) -> StorageHandle {
        StorageHandle {
            partition: self.system_partition.clone(),
            scope: HandleScope::System,
        }
    }

    pub fn system_partition(&self) -> &PartitionName {
        &self.system_partition
    }

    /// True when `target` is explicitly allowlisted, or is exactly the
    /// context tenant's own partition. Being the system partition is not
    /// enough on its own.
    pub fn allow_schema_change(&self, ctx: &ExecutionContext, target: &PartitionName) -> bool {
        if self.schema_allowlist.contains(target) {
            return true;
        }
        ctx.storage_key()
            .map(|key| key.as_str() == target.as_str())
            .unwrap_or(false)
    }

    /// Hard stop for migration tooling
    pub fn ensure_schema_change(
        &self,
        ctx: &ExecutionContext,
        target: &PartitionName,
    ) -> Result<(), TenancyError> {
        if self.allow_schema_change(ctx, target) {
            debug!(partition = %target, "Schema change permitted");
            return Ok(());
        }

        let detail = match ctx.storage_key() {
            Some(own) => format!(
                "schema change on '{}' denied for tenant partition '{}'",
                target, own
            ),
            None => format!("schema change on '{}' denied without tenant context", target),
        };
        self.audit
            .record(AuditRecord::new(AuditEventType::ScopeViolation, detail).in_context(Some(ctx)));
        Err(TenancyError::SchemaChangeDenied(target.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::context::CorrelationId;
    use crate::tenant::{Slug, Tenant};
    use std::sync::Arc;

    fn router() -> (StorageRouter, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let config = StorageConfig {
            system_partition: "tenancy_system".into(),
            schema_allowlist: vec!["tenancy_system".into(), "tenancy_shared".into()],
        };
        let router =
            StorageRouter::new(&config, AuditTrail::tracing_only().with_sink(sink.clone())).unwrap();
        (router, sink)
    }

    fn acme() -> Arc<Tenant> {
        Arc::new(Tenant::new(Slug::parse("acme-corp").unwrap()))
    }

    #[test]
    fn routes_to_the_tenant_partition() {
        let (router, _) = router();
        let tenant = acme();
        let ctx = ExecutionContext::for_tenant(&tenant, CorrelationId::new());

        let handle = router.route(&ctx).unwrap();
        assert_eq!(handle.partition().as_str(), "tenant_acme_corp");
        assert_eq!(handle.scope(), HandleScope::Tenant(tenant.id));
        assert!(!handle.is_system());
    }

    #[test]
    fn no_tenant_is_a_routing_error() {
        let (router, _) = router();
        let ctx = ExecutionContext::no_tenant(CorrelationId::new());
        assert!(matches!(router.route(&ctx), Err(TenancyError::RoutingError(_))));
    }

    #[test]
    fn system_handle_needs_no_context() {
        let (router, _) = router();
        let handle = router.system_handle();
        assert!(handle.is_system());
        assert_eq!(handle.partition().as_str(), "tenancy_system");
    }

    #[test]
    fn schema_changes_limited_to_allowlist_and_own_partition() {
        let (router, sink) = router();
        let tenant = acme();
        let ctx = ExecutionContext::for_tenant(&tenant, CorrelationId::new());
        let own = PartitionName::parse("tenant_acme_corp").unwrap();
        let other = PartitionName::parse("tenant_globex").unwrap();
        let shared = PartitionName::parse("tenancy_shared").unwrap();

        assert!(router.allow_schema_change(&ctx, &own));
        assert!(router.allow_schema_change(&ctx, &shared));
        assert!(!router.allow_schema_change(&ctx, &other));

        let denied = router.ensure_schema_change(&ctx, &other);
        assert!(matches!(denied, Err(TenancyError::SchemaChangeDenied(_))));
        assert_eq!(sink.count(AuditEventType::ScopeViolation), 1);
    }

    #[test]
    fn no_tenant_context_only_reaches_allowlist() {
        let (router, _) = router();
        let ctx = ExecutionContext::no_tenant(CorrelationId::new());
        let tenant_partition = PartitionName::parse("tenant_acme_corp").unwrap();
        let system = PartitionName::parse("tenancy_system").unwrap();

        assert!(!router.allow_schema_change(&ctx, &tenant_partition));
        assert!(router.allow_schema_change(&ctx, &system));
    }

    #[test]
    fn system_partition_is_not_implicitly_allowed() {
        let config = StorageConfig {
            system_partition: "tenancy_system".into(),
            schema_allowlist: vec![],
        };
        let router = StorageRouter::new(&config, AuditTrail::tracing_only()).unwrap();
        let ctx = ExecutionContext::no_tenant(CorrelationId::new());
        assert!(!router.allow_schema_change(&ctx, router.system_partition()));
    }

    #[test]
    fn partition_names_are_validated() {
        assert!(PartitionName::parse("tenant_acme").is_ok());
        assert!(PartitionName::parse("Tenant").is_err());
        assert!(PartitionName::parse("tenant-acme").is_err());
        assert!(PartitionName::parse("1tenant").is_err());
        assert!(PartitionName::parse("x; DROP DATABASE y").is_err());
    }
}
