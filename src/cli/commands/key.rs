use clap::Subcommand;
use serde_json::json;

use crate::cli::OutputFormat;
use crate::tenant::{Slug, StorageKey};

#[derive(Subcommand)]
pub enum KeyCommands {
    #[command(about = "Storage key for a slug")]
    StorageKey {
        #[arg(help = "Tenant slug")]
        slug: String,
    },

    #[command(about = "Slug for a storage key")]
    Slug {
        #[arg(help = "Storage key, e.g. tenant_acme_corp")]
        storage_key: String,
    },
}

pub fn handle(cmd: KeyCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let (slug, key) = convert(&cmd)?;
    output_format.emit(
        &json!({ "slug": slug, "storage_key": key }),
        match cmd {
            KeyCommands::StorageKey { .. } => key.as_str(),
            KeyCommands::Slug { .. } => slug.as_str(),
        },
    )
}

fn convert(cmd: &KeyCommands) -> anyhow::Result<(Slug, StorageKey)> {
    Ok(match cmd {
        KeyCommands::StorageKey { slug } => {
            let slug = Slug::parse(slug)?;
            let key = StorageKey::from_slug(&slug);
            (slug, key)
        }
        KeyCommands::Slug { storage_key } => {
            let key = StorageKey::parse(storage_key)?;
            (key.to_slug(), key)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_both_ways() {
        let (_, key) = convert(&KeyCommands::StorageKey {
            slug: "acme-corp".into(),
        })
        .unwrap();
        assert_eq!(key.as_str(), "tenant_acme_corp");

        let (slug, _) = convert(&KeyCommands::Slug {
            storage_key: "tenant_acme_corp".into(),
        })
        .unwrap();
        assert_eq!(slug.as_str(), "acme-corp");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(convert(&KeyCommands::StorageKey { slug: "Acme".into() }).is_err());
        assert!(convert(&KeyCommands::Slug {
            storage_key: "acme".into()
        })
        .is_err());
    }
}
