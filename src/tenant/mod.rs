pub mod identifier;
pub mod registry;
pub mod storage_key;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TenancyError;

pub use identifier::TenantIdentifier;
pub use registry::TenantRegistry;
pub use storage_key::{Slug, StorageKey, MAX_SLUG_LEN, MIN_SLUG_LEN};
pub use store::{MemoryTenantStore, PgTenantStore, TenantStore};

/// Stable, immutable tenant identifier. This, not the slug, keys every namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(TenantId)
            .map_err(|_| TenancyError::InvalidIdentifier(format!("not a tenant id: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for TenantStatus {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "deleted" => Ok(TenantStatus::Deleted),
            other => Err(TenancyError::Store(format!("unknown tenant status: {}", other))),
        }
    }
}

/// Tenant record as held in the system partition. Owned by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub slug: Slug,
    pub storage_key: StorageKey,
    /// Custom domain, if the tenant is not served from `<slug>.<base_domain>`
    pub host: Option<String>,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Build an active tenant; the storage key is always derived from the slug.
    pub fn new(slug: Slug) -> Self {
        let storage_key = StorageKey::from_slug(&slug);
        Self {
            id: TenantId::new(),
            slug,
            storage_key,
            host: None,
            status: TenantStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into().to_ascii_lowercase());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}
