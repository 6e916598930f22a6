pub mod key;
pub mod resolve;
pub mod schema;

use anyhow::Context;
use std::sync::Arc;

use crate::config::config;
use crate::storage::{PartitionName, PoolRegistry};
use crate::tenant::{PgTenantStore, TenantRegistry};

/// Registry backed by the system partition named in config
pub(crate) async fn connect_registry() -> anyhow::Result<(Arc<PoolRegistry>, TenantRegistry)> {
    let config = config();
    let pools = Arc::new(PoolRegistry::from_env().context("DATABASE_URL must be set")?);
    let system = PartitionName::parse(&config.storage.system_partition)?;
    let system_pool = pools.partition_pool(&system).await?;

    let registry = TenantRegistry::new(Arc::new(PgTenantStore::new(system_pool)), config.registry.clone());
    Ok((pools, registry))
}
