use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub registry: RegistryConfig,
    pub scope: ScopeConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Upper bound on how long a resolved tenant is served from memory
    pub cache_ttl_secs: u64,
    /// Hostnames of the form `<slug>.<base_domain>` resolve by slug
    pub base_domain: String,
}

/// What a scoped read does when no tenant is bound to the unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoContextPolicy {
    /// Empty result plus an audit record
    FailClosed,
    /// `TenancyError::NoContext`
    FailLoud,
}

impl NoContextPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail_closed" | "fail-closed" | "closed" => Some(NoContextPolicy::FailClosed),
            "fail_loud" | "fail-loud" | "loud" => Some(NoContextPolicy::FailLoud),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub no_context_policy: NoContextPolicy,
    /// Entity types that carry a tenant_id; everything else is unscoped
    pub tenant_owned: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub lock_ttl_ms: u64,
    pub lock_wait_ms: u64,
    pub lock_poll_ms: u64,
    /// How often expired cache and registry entries are reclaimed
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// The one partition holding tenant records
    pub system_partition: String,
    /// Partitions that accept schema changes regardless of tenant context
    pub schema_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Also write audit records to the system partition
    pub persist: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Registry overrides
        if let Ok(v) = env::var("REGISTRY_CACHE_TTL_SECS") {
            self.registry.cache_ttl_secs = v.parse().unwrap_or(self.registry.cache_ttl_secs);
        }
        if let Ok(v) = env::var("REGISTRY_BASE_DOMAIN") {
            self.registry.base_domain = v.trim().trim_start_matches('.').to_ascii_lowercase();
        }

        // Scope overrides
        if let Ok(v) = env::var("SCOPE_NO_CONTEXT_POLICY") {
            self.scope.no_context_policy =
                NoContextPolicy::parse(&v).unwrap_or(self.scope.no_context_policy);
        }
        if let Ok(v) = env::var("SCOPE_TENANT_OWNED") {
            self.scope.tenant_owned = split_list(&v);
        }

        // Cache overrides
        if let Ok(v) = env::var("CACHE_DEFAULT_TTL_SECS") {
            self.cache.default_ttl_secs = v.parse().unwrap_or(self.cache.default_ttl_secs);
        }
        if let Ok(v) = env::var("CACHE_LOCK_TTL_MS") {
            self.cache.lock_ttl_ms = v.parse().unwrap_or(self.cache.lock_ttl_ms);
        }
        if let Ok(v) = env::var("CACHE_LOCK_WAIT_MS") {
            self.cache.lock_wait_ms = v.parse().unwrap_or(self.cache.lock_wait_ms);
        }
        if let Ok(v) = env::var("CACHE_LOCK_POLL_MS") {
            self.cache.lock_poll_ms = v.parse().unwrap_or(self.cache.lock_poll_ms);
        }
        if let Ok(v) = env::var("CACHE_SWEEP_INTERVAL_SECS") {
            self.cache.sweep_interval_secs = v.parse().unwrap_or(self.cache.sweep_interval_secs);
        }

        // Storage overrides
        if let Ok(v) = env::var("STORAGE_SYSTEM_PARTITION") {
            self.storage.system_partition = v.trim().to_string();
        }
        if let Ok(v) = env::var("STORAGE_SCHEMA_ALLOWLIST") {
            self.storage.schema_allowlist = split_list(&v);
        }

        // Audit overrides
        if let Ok(v) = env::var("AUDIT_ENABLED") {
            self.audit.enabled = v.parse().unwrap_or(self.audit.enabled);
        }
        if let Ok(v) = env::var("AUDIT_PERSIST") {
            self.audit.persist = v.parse().unwrap_or(self.audit.persist);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            registry: RegistryConfig {
                cache_ttl_secs: 60,
                base_domain: "localhost".to_string(),
            },
            scope: ScopeConfig {
                no_context_policy: NoContextPolicy::FailLoud,
                tenant_owned: Vec::new(),
            },
            cache: CacheConfig {
                default_ttl_secs: 300,
                lock_ttl_ms: 5_000,
                lock_wait_ms: 2_000,
                lock_poll_ms: 10,
                sweep_interval_secs: 30,
            },
            storage: StorageConfig {
                system_partition: "tenancy_system".to_string(),
                schema_allowlist: vec!["tenancy_system".to_string()],
            },
            audit: AuditConfig {
                enabled: true,
                persist: false,
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            registry: RegistryConfig {
                cache_ttl_secs: 3600,
                base_domain: "staging.example.com".to_string(),
            },
            scope: ScopeConfig {
                no_context_policy: NoContextPolicy::FailClosed,
                tenant_owned: Vec::new(),
            },
            cache: CacheConfig {
                default_ttl_secs: 600,
                lock_ttl_ms: 3_000,
                lock_wait_ms: 1_000,
                lock_poll_ms: 20,
                sweep_interval_secs: 60,
            },
            storage: StorageConfig {
                system_partition: "tenancy_system".to_string(),
                schema_allowlist: vec!["tenancy_system".to_string()],
            },
            audit: AuditConfig {
                enabled: true,
                persist: true,
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            registry: RegistryConfig {
                cache_ttl_secs: 3600,
                base_domain: "example.com".to_string(),
            },
            scope: ScopeConfig {
                no_context_policy: NoContextPolicy::FailClosed,
                tenant_owned: Vec::new(),
            },
            cache: CacheConfig {
                default_ttl_secs: 900,
                lock_ttl_ms: 3_000,
                lock_wait_ms: 500,
                lock_poll_ms: 20,
                sweep_interval_secs: 60,
            },
            storage: StorageConfig {
                system_partition: "tenancy_system".to_string(),
                schema_allowlist: vec!["tenancy_system".to_string()],
            },
            audit: AuditConfig {
                enabled: true,
                persist: true,
            },
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}
