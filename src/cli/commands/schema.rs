use clap::Subcommand;
use serde_json::json;

use crate::audit::AuditTrail;
use crate::cli::OutputFormat;
use crate::config::config;
use crate::context::{CorrelationId, ExecutionContext};
use crate::storage::{PartitionName, StorageRouter};
use crate::tenant::{Slug, TenantIdentifier};

#[derive(Subcommand)]
pub enum SchemaCommands {
    #[command(about = "Exit non-zero unless a schema change on the partition is allowed")]
    Check {
        #[arg(long, help = "Tenant slug the migration runs as")]
        tenant: Option<String>,

        #[arg(help = "Target partition")]
        partition: String,
    },
}

pub async fn handle(cmd: SchemaCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        SchemaCommands::Check { tenant, partition } => {
            let target = PartitionName::parse(&partition)?;
            let ctx = match tenant {
                Some(slug) => {
                    let identifier = TenantIdentifier::Slug(Slug::parse(&slug)?);
                    let (pools, registry) = super::connect_registry().await?;
                    let result = registry.resolve(&identifier).await;
                    pools.close_all().await;
                    ExecutionContext::for_tenant(&result?, CorrelationId::new())
                }
                None => ExecutionContext::no_tenant(CorrelationId::new()),
            };

            let router = StorageRouter::new(&config().storage, AuditTrail::new(&config().audit))?;
            check(&router, &ctx, &target)?;
            output_format.emit(
                &json!({ "partition": target, "allowed": true }),
                &format!("schema change on '{}' allowed", target),
            )
        }
    }
}

fn check(router: &StorageRouter, ctx: &ExecutionContext, target: &PartitionName) -> anyhow::Result<()> {
    router.ensure_schema_change(ctx, target)?;
    Ok(())
}
