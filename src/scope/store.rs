use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::entity::{EntityId, Record};
use super::predicate::Predicate;
use crate::error::TenancyError;
use crate::storage::{PartitionName, PoolRegistry, StorageHandle};
use crate::tenant::TenantId;

/// Persistence layer seam. The engine has already scoped the predicate and
/// checked ownership; stores only execute against the handle they are given.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn select(
        &self,
        handle: &StorageHandle,
        entity_type: &str,
        predicate: &Predicate,
    ) -> Result<Vec<Record>, TenancyError>;

    /// Insert or replace all records in one atomic batch
    async fn upsert(&self, handle: &StorageHandle, records: &[Record]) -> Result<(), TenancyError>;
}

type Table = BTreeMap<EntityId, Record>;

/// In-process entity store keyed by partition and entity type
#[derive(Default)]
pub struct MemoryEntityStore {
    tables: RwLock<HashMap<(PartitionName, String), Table>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record held in one partition, across entity types
    pub async fn partition_records(&self, partition: &PartitionName) -> Vec<Record> {
        self.tables
            .read()
            .await
            .iter()
            .filter(|((p, _), _)| p == partition)
            .flat_map(|(_, table)| table.values().cloned())
            .collect()
    }

    pub async fn total_records(&self) -> usize {
        self.tables.read().await.values().map(|t| t.len()).sum()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn select(
        &self,
        handle: &StorageHandle,
        entity_type: &str,
        predicate: &Predicate,
    ) -> Result<Vec<Record>, TenancyError> {
        let tables = self.tables.read().await;
        let key = (handle.partition().clone(), entity_type.to_string());
        Ok(tables
            .get(&key)
            .map(|table| {
                table
                    .values()
                    .filter(|record| predicate.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert(&self, handle: &StorageHandle, records: &[Record]) -> Result<(), TenancyError> {
        let mut tables = self.tables.write().await;
        for record in records {
            tables
                .entry((handle.partition().clone(), record.entity_type.clone()))
                .or_default()
                .insert(record.id, record.clone());
        }
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct EntityRow {
    id: Uuid,
    tenant_id: Option<Uuid>,
    data: Json<Value>,
}

impl EntityRow {
    fn into_record(self, entity_type: &str) -> Record {
        let fields = match self.data.0 {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Record {
            entity_type: entity_type.to_string(),
            id: EntityId(self.id),
            tenant_id: self.tenant_id.map(TenantId),
            fields,
        }
    }
}

/// Entity store over per-partition Postgres databases. Each entity type is a
/// table `(id uuid primary key, tenant_id uuid, data jsonb)`.
pub struct PgEntityStore {
    pools: Arc<PoolRegistry>,
}

impl PgEntityStore {
    pub fn new(pools: Arc<PoolRegistry>) -> Self {
        Self { pools }
    }

    /// Entity types double as table names, so they share the partition alphabet
    fn table_name(entity_type: &str) -> Result<String, TenancyError> {
        let name = PartitionName::parse(entity_type)?;
        Ok(format!("\"{}\"", name.as_str()))
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn select(
        &self,
        handle: &StorageHandle,
        entity_type: &str,
        predicate: &Predicate,
    ) -> Result<Vec<Record>, TenancyError> {
        let table = Self::table_name(entity_type)?;
        let (where_sql, params) = predicate.to_sql(0)?;
        let query = format!("SELECT id, tenant_id, data FROM {} WHERE {}", table, where_sql);

        let pool = self.pools.pool(handle).await?;
        let mut q = sqlx::query_as::<_, EntityRow>(&query);
        for param in params {
            q = q.bind(param);
        }
        let rows = q.fetch_all(&pool).await?;

        Ok(rows.into_iter().map(|row| row.into_record(entity_type)).collect())
    }

    async fn upsert(&self, handle: &StorageHandle, records: &[Record]) -> Result<(), TenancyError> {
        if records.is_empty() {
            return Ok(());
        }

        let pool = self.pools.pool(handle).await?;
        let mut tx = pool.begin().await?;
        for record in records {
            let query = format!(
                r#"
                INSERT INTO {} (id, tenant_id, data)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE
                    SET tenant_id = EXCLUDED.tenant_id, data = EXCLUDED.data
                "#,
                Self::table_name(&record.entity_type)?
            );
            sqlx::query(&query)
                .bind(record.id.0)
                .bind(record.tenant_id.map(|id| id.0))
                .bind(Json(Value::Object(record.fields.clone())))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
