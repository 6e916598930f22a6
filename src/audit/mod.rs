pub mod sink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::AuditConfig;
use crate::context::{CorrelationId, ExecutionContext};
use crate::tenant::TenantId;

pub use sink::{AuditError, AuditSink, MemorySink, PgAuditSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    ResolutionFailure,
    ScopeViolation,
    RoutingError,
    SystemScopeUse,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::ResolutionFailure => "RESOLUTION_FAILURE",
            AuditEventType::ScopeViolation => "SCOPE_VIOLATION",
            AuditEventType::RoutingError => "ROUTING_ERROR",
            AuditEventType::SystemScopeUse => "SYSTEM_SCOPE_USE",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AuditEventType::ResolutionFailure => Severity::Operational,
            AuditEventType::ScopeViolation => Severity::Security,
            AuditEventType::RoutingError => Severity::Error,
            AuditEventType::SystemScopeUse => Severity::Informational,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Tracked but expected, e.g. escape hatch use
    Informational,
    /// Likely a misconfigured client
    Operational,
    /// The unit of work could not proceed
    Error,
    /// A tenant boundary was crossed or nearly crossed
    Security,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Informational => "informational",
            Severity::Operational => "operational",
            Severity::Error => "error",
            Severity::Security => "security",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub tenant_id: Option<TenantId>,
    pub detail: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<CorrelationId>,
}

impl AuditRecord {
    pub fn new(event_type: AuditEventType, detail: impl Into<String>) -> Self {
        Self {
            event_type,
            tenant_id: None,
            detail: detail.into(),
            severity: event_type.severity(),
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// Stamp tenant and correlation id from the context in effect
    pub fn in_context(mut self, ctx: Option<&ExecutionContext>) -> Self {
        if let Some(ctx) = ctx {
            self.tenant_id = ctx.tenant_id();
            self.correlation_id = Some(ctx.correlation_id());
        }
        self
    }
}

/// Best-effort audit recorder. `record` never returns an error: a failing
/// sink is logged and skipped so it can't replace the error being audited.
#[derive(Clone)]
pub struct AuditTrail {
    enabled: bool,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditTrail {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            enabled: config.enabled,
            sinks: Vec::new(),
        }
    }

    /// Trail that only emits tracing events
    pub fn tracing_only() -> Self {
        Self {
            enabled: true,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn record(&self, record: AuditRecord) {
        if !self.enabled {
            return;
        }

        let tenant = record.tenant_id.map(|id| id.to_string()).unwrap_or_default();
        let correlation = record
            .correlation_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        match record.severity {
            Severity::Informational => info!(
                target: "audit",
                event = record.event_type.as_str(),
                tenant_id = %tenant,
                correlation_id = %correlation,
                "{}", record.detail
            ),
            Severity::Operational => warn!(
                target: "audit",
                event = record.event_type.as_str(),
                tenant_id = %tenant,
                correlation_id = %correlation,
                "{}", record.detail
            ),
            Severity::Error | Severity::Security => error!(
                target: "audit",
                event = record.event_type.as_str(),
                severity = record.severity.as_str(),
                tenant_id = %tenant,
                correlation_id = %correlation,
                "{}", record.detail
            ),
        }

        for sink in &self.sinks {
            if let Err(e) = sink.write(&record) {
                warn!(sink = sink.name(), error = %e, "Audit sink failed; record dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSink;

    impl AuditSink for BrokenSink {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn write(&self, _record: &AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Unavailable("disk full".into()))
        }
    }

    #[test]
    fn severities_follow_event_type() {
        assert_eq!(AuditEventType::ResolutionFailure.severity(), Severity::Operational);
        assert_eq!(AuditEventType::ScopeViolation.severity(), Severity::Security);
        assert_eq!(AuditEventType::SystemScopeUse.severity(), Severity::Informational);
        assert_eq!(AuditEventType::RoutingError.severity(), Severity::Error);
    }

    #[test]
    fn failing_sink_does_not_stop_the_others() {
        let memory = Arc::new(MemorySink::new());
        let trail = AuditTrail::tracing_only()
            .with_sink(Arc::new(BrokenSink))
            .with_sink(memory.clone());

        trail.record(AuditRecord::new(AuditEventType::ScopeViolation, "mismatch"));

        assert_eq!(memory.count(AuditEventType::ScopeViolation), 1);
    }

    #[test]
    fn disabled_trail_records_nothing() {
        let memory = Arc::new(MemorySink::new());
        let trail = AuditTrail::new(&AuditConfig {
            enabled: false,
            persist: false,
        })
        .with_sink(memory.clone());

        trail.record(AuditRecord::new(AuditEventType::SystemScopeUse, "nightly job"));
        assert!(memory.records().is_empty());
    }
}
