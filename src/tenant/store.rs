use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Slug, StorageKey, Tenant, TenantId, TenantStatus};
use crate::error::TenancyError;

/// Backing store for tenant records, living in the system partition.
///
/// Slug and host lookups only ever return non-deleted tenants; id lookups
/// return any status so the registry can tell "deleted" from "never existed".
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_by_id(&self, id: TenantId) -> Result<Option<Tenant>, TenancyError>;

    async fn find_by_slug(&self, slug: &Slug) -> Result<Option<Tenant>, TenancyError>;

    async fn find_by_host(&self, host: &str) -> Result<Option<Tenant>, TenancyError>;

    async fn update_status(&self, id: TenantId, status: TenantStatus) -> Result<(), TenancyError>;
}

/// In-process tenant store for tests and local development
#[derive(Default)]
pub struct MemoryTenantStore {
    tenants: RwLock<Vec<Tenant>>,
    lookups: AtomicUsize,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tenant: Tenant) -> Result<(), TenancyError> {
        let mut tenants = self.tenants.write().await;
        let taken = tenants.iter().any(|t| {
            t.status != TenantStatus::Deleted && tenant.status != TenantStatus::Deleted && t.slug == tenant.slug
        });
        if taken {
            return Err(TenancyError::Store(format!("slug already in use: {}", tenant.slug)));
        }
        if tenants.iter().any(|t| t.id == tenant.id) {
            return Err(TenancyError::Store(format!("duplicate tenant id: {}", tenant.id)));
        }
        tenants.push(tenant);
        Ok(())
    }

    /// Number of lookups that reached the store (cache misses)
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    async fn find<F>(&self, predicate: F) -> Option<Tenant>
    where
        F: Fn(&Tenant) -> bool,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.tenants.read().await.iter().find(|t| predicate(t)).cloned()
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn find_by_id(&self, id: TenantId) -> Result<Option<Tenant>, TenancyError> {
        Ok(self.find(|t| t.id == id).await)
    }

    async fn find_by_slug(&self, slug: &Slug) -> Result<Option<Tenant>, TenancyError> {
        Ok(self
            .find(|t| t.status != TenantStatus::Deleted && &t.slug == slug)
            .await)
    }

    async fn find_by_host(&self, host: &str) -> Result<Option<Tenant>, TenancyError> {
        Ok(self
            .find(|t| t.status != TenantStatus::Deleted && t.host.as_deref() == Some(host))
            .await)
    }

    async fn update_status(&self, id: TenantId, status: TenantStatus) -> Result<(), TenancyError> {
        let mut tenants = self.tenants.write().await;
        let tenant = tenants
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TenancyError::TenantNotFound(id.to_string()))?;
        tenant.status = status;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    slug: String,
    storage_key: String,
    host: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = TenancyError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let slug = Slug::parse(&row.slug)?;
        let storage_key = StorageKey::parse(&row.storage_key)?;
        // Rows written by hand must still agree with the canonical mapping
        if storage_key != StorageKey::from_slug(&slug) {
            return Err(TenancyError::Store(format!(
                "tenant {} has storage key {} which does not match slug {}",
                row.id, storage_key, slug
            )));
        }
        Ok(Tenant {
            id: TenantId(row.id),
            slug,
            storage_key,
            host: row.host,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

/// Tenant store backed by the `tenants` table in the system partition
pub struct PgTenantStore {
    system_pool: PgPool,
}

const TENANT_COLUMNS: &str = "id, slug, storage_key, host, status, created_at";

impl PgTenantStore {
    pub fn new(system_pool: PgPool) -> Self {
        Self { system_pool }
    }

    async fn fetch_one(&self, where_sql: &str, bind: &str) -> Result<Option<Tenant>, TenancyError> {
        let query = format!("SELECT {} FROM tenants WHERE {}", TENANT_COLUMNS, where_sql);
        let row = sqlx::query_as::<_, TenantRow>(&query)
            .bind(bind)
            .fetch_optional(&self.system_pool)
            .await?;
        row.map(Tenant::try_from).transpose()
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn find_by_id(&self, id: TenantId) -> Result<Option<Tenant>, TenancyError> {
        let query = format!("SELECT {} FROM tenants WHERE id = $1", TENANT_COLUMNS);
        let row = sqlx::query_as::<_, TenantRow>(&query)
            .bind(id.0)
            .fetch_optional(&self.system_pool)
            .await?;
        row.map(Tenant::try_from).transpose()
    }

    async fn find_by_slug(&self, slug: &Slug) -> Result<Option<Tenant>, TenancyError> {
        self.fetch_one("slug = $1 AND status <> 'deleted'", slug.as_str()).await
    }

    async fn find_by_host(&self, host: &str) -> Result<Option<Tenant>, TenancyError> {
        self.fetch_one("host = $1 AND status <> 'deleted'", host).await
    }

    async fn update_status(&self, id: TenantId, status: TenantStatus) -> Result<(), TenancyError> {
        let result = sqlx::query("UPDATE tenants SET status = $2 WHERE id = $1")
            .bind(id.0)
            .bind(status.as_str())
            .execute(&self.system_pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TenancyError::TenantNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deleted_slug_can_be_reused() {
        let store = MemoryTenantStore::new();
        let mut old = Tenant::new(Slug::parse("acme").unwrap());
        let old_id = old.id;
        old.status = TenantStatus::Deleted;
        store.insert(old).await.unwrap();

        let new = Tenant::new(Slug::parse("acme").unwrap());
        let new_id = new.id;
        store.insert(new).await.unwrap();

        let found = store.find_by_slug(&Slug::parse("acme").unwrap()).await.unwrap().unwrap();
        assert_eq!(found.id, new_id);
        assert_ne!(found.id, old_id);
    }

    #[tokio::test]
    async fn live_slug_is_unique() {
        let store = MemoryTenantStore::new();
        store.insert(Tenant::new(Slug::parse("acme").unwrap())).await.unwrap();
        let err = store.insert(Tenant::new(Slug::parse("acme").unwrap())).await;
        assert!(matches!(err, Err(TenancyError::Store(_))));
    }

    #[test]
    fn rejects_rows_that_break_the_mapping() {
        let row = TenantRow {
            id: Uuid::new_v4(),
            slug: "acme".into(),
            storage_key: "tenant_other".into(),
            host: None,
            status: "active".into(),
            created_at: Utc::now(),
        };
        assert!(matches!(Tenant::try_from(row), Err(TenancyError::Store(_))));
    }
}
