use serde_json::json;
use uuid::Uuid;

use crate::cli::OutputFormat;
use crate::tenant::{Slug, StorageKey, TenantId, TenantIdentifier};

/// Pick the identifier shape from the raw argument
pub fn parse_identifier(raw: &str) -> anyhow::Result<TenantIdentifier> {
    let raw = raw.trim();
    if let Ok(uuid) = Uuid::parse_str(raw) {
        return Ok(TenantIdentifier::Id(TenantId(uuid)));
    }
    if raw.starts_with("tenant_") {
        return Ok(TenantIdentifier::StorageKey(StorageKey::parse(raw)?));
    }
    if raw.contains('.') {
        return Ok(TenantIdentifier::Hostname(raw.to_string()));
    }
    Ok(TenantIdentifier::Slug(Slug::parse(raw)?))
}

pub async fn handle(identifier: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let identifier = parse_identifier(identifier)?;
    let (pools, registry) = super::connect_registry().await?;

    let result = registry.resolve(&identifier).await;
    pools.close_all().await;
    let tenant = result?;

    let text = format!(
        "{}\n  id:          {}\n  storage_key: {}\n  status:      {}\n  host:        {}",
        tenant.slug,
        tenant.id,
        tenant.storage_key,
        tenant.status.as_str(),
        tenant.host.as_deref().unwrap_or("-"),
    );
    output_format.emit(
        &json!({ "resolved_by": identifier.kind(), "tenant": &*tenant }),
        &text,
    )
}
