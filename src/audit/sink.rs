use sqlx::PgPool;
use std::sync::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;

use super::{AuditEventType, AuditRecord};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for audit records. Writes must not block on I/O; sinks that
/// persist remotely hand the work off and return.
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn write(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Keeps every record in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.records()
            .iter()
            .filter(|r| r.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        match self.records.lock() {
            Ok(mut records) => records.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl AuditSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AuditError::Unavailable("memory sink poisoned".to_string()))?;
        records.push(record.clone());
        Ok(())
    }
}

/// Persists records to `audit_log` in the system partition. Each insert runs
/// on a spawned task; failures are logged there and never reach the caller.
pub struct PgAuditSink {
    system_pool: PgPool,
}

impl PgAuditSink {
    pub fn new(system_pool: PgPool) -> Self {
        Self { system_pool }
    }
}

impl AuditSink for PgAuditSink {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let handle = Handle::try_current()
            .map_err(|_| AuditError::Unavailable("no tokio runtime".to_string()))?;
        let pool = self.system_pool.clone();
        let record = record.clone();

        handle.spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_log
                    (event_type, tenant_id, detail, severity, occurred_at, correlation_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(record.event_type.as_str())
            .bind(record.tenant_id.map(|id| id.0))
            .bind(&record.detail)
            .bind(record.severity.as_str())
            .bind(record.timestamp)
            .bind(record.correlation_id.map(|id| id.0))
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::warn!(error = %e, event = record.event_type.as_str(), "Failed to persist audit record");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_counts_by_type() {
        let sink = MemorySink::new();
        sink.write(&AuditRecord::new(AuditEventType::SystemScopeUse, "a")).unwrap();
        sink.write(&AuditRecord::new(AuditEventType::SystemScopeUse, "b")).unwrap();
        sink.write(&AuditRecord::new(AuditEventType::ScopeViolation, "c")).unwrap();

        assert_eq!(sink.count(AuditEventType::SystemScopeUse), 2);
        assert_eq!(sink.count(AuditEventType::ScopeViolation), 1);

        sink.clear();
        assert!(sink.records().is_empty());
    }
}
