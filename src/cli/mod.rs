pub mod commands;

use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "tenancy")]
#[command(about = "Tenancy CLI - identifier mapping, tenant lookup and schema-change checks")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Convert between slugs and storage keys")]
    Key {
        #[command(subcommand)]
        cmd: commands::key::KeyCommands,
    },

    #[command(about = "Resolve an identifier (id, slug, storage key or hostname) to a tenant")]
    Resolve {
        #[arg(help = "Tenant identifier")]
        identifier: String,
    },

    #[command(about = "Schema-change gate for migration tooling")]
    Schema {
        #[command(subcommand)]
        cmd: commands::schema::SchemaCommands,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }

    /// Print `value` as JSON, or `text` for humans
    pub fn emit<T: Serialize>(&self, value: &T, text: &str) -> anyhow::Result<()> {
        match self {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => println!("{}", text),
        }
        Ok(())
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Key { cmd } => commands::key::handle(cmd, output_format),
        Commands::Resolve { identifier } => commands::resolve::handle(&identifier, output_format).await,
        Commands::Schema { cmd } => commands::schema::handle(cmd, output_format).await,
    }
}
