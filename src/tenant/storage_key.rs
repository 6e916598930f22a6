//! The one canonical slug <-> storage key mapping.
//!
//! Slugs use `[a-z0-9-]`, storage keys use `tenant_` plus `[a-z0-9_]`. Slugs
//! never contain `_`, so swapping `-` and `_` is invertible. Nothing else in
//! the crate rebuilds a storage key from a slug; everything goes through
//! [`StorageKey::from_slug`] and [`StorageKey::to_slug`].

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TenancyError;

const STORAGE_KEY_PREFIX: &str = "tenant_";

/// Longest slug whose storage key still fits a 63 byte Postgres identifier
pub const MAX_SLUG_LEN: usize = 63 - STORAGE_KEY_PREFIX.len();
pub const MIN_SLUG_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    pub fn parse(value: &str) -> Result<Self, TenancyError> {
        Self::validate(value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(value: &str) -> Result<(), TenancyError> {
        let invalid = |reason: &str| {
            TenancyError::InvalidIdentifier(format!("invalid slug '{}': {}", value, reason))
        };

        if value.len() < MIN_SLUG_LEN || value.len() > MAX_SLUG_LEN {
            return Err(invalid("length out of range"));
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(invalid("only a-z, 0-9 and '-' are allowed"));
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(invalid("must start and end with a letter or digit"));
        }
        if value.contains("--") {
            return Err(invalid("consecutive '-' are not allowed"));
        }
        Ok(())
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Slug {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Slug {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Slug::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Physical partition selector for one tenant
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn from_slug(slug: &Slug) -> Self {
        Self(format!("{}{}", STORAGE_KEY_PREFIX, slug.as_str().replace('-', "_")))
    }

    /// Reverse of [`StorageKey::from_slug`]. Always yields a valid slug because
    /// parsing a storage key validates its slug form.
    pub fn to_slug(&self) -> Slug {
        Slug(self.body().replace('_', "-"))
    }

    pub fn parse(value: &str) -> Result<Self, TenancyError> {
        let body = value.strip_prefix(STORAGE_KEY_PREFIX).ok_or_else(|| {
            TenancyError::InvalidIdentifier(format!(
                "storage key '{}' must start with '{}'",
                value, STORAGE_KEY_PREFIX
            ))
        })?;
        if body.contains('-') {
            return Err(TenancyError::InvalidIdentifier(format!(
                "storage key '{}' may not contain '-'",
                value
            )));
        }
        Slug::validate(&body.replace('_', "-")).map_err(|_| {
            TenancyError::InvalidIdentifier(format!("storage key '{}' has no valid slug form", value))
        })?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn body(&self) -> &str {
        &self.0[STORAGE_KEY_PREFIX.len()..]
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StorageKey {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for StorageKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        StorageKey::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_hyphens_to_underscores() {
        let slug = Slug::parse("acme-corp-2").unwrap();
        let key = StorageKey::from_slug(&slug);
        assert_eq!(key.as_str(), "tenant_acme_corp_2");
        assert_eq!(key.to_slug(), slug);
    }

    #[test]
    fn rejects_invalid_slugs() {
        assert!(Slug::parse("a").is_err());
        assert!(Slug::parse("Acme").is_err());
        assert!(Slug::parse("acme_corp").is_err());
        assert!(Slug::parse("-acme").is_err());
        assert!(Slug::parse("acme-").is_err());
        assert!(Slug::parse("acme--corp").is_err());
        assert!(Slug::parse(&"a".repeat(MAX_SLUG_LEN + 1)).is_err());
        assert!(Slug::parse(&"a".repeat(MAX_SLUG_LEN)).is_ok());
    }

    #[test]
    fn rejects_invalid_storage_keys() {
        assert!(StorageKey::parse("acme").is_err());
        assert!(StorageKey::parse("tenant_").is_err());
        assert!(StorageKey::parse("tenant_acme-corp").is_err());
        assert!(StorageKey::parse("tenant__acme").is_err());
        assert!(StorageKey::parse("tenant_acme; DROP DATABASE").is_err());
        assert!(StorageKey::parse("tenant_acme_corp").is_ok());
    }

    #[test]
    fn longest_storage_key_fits_identifier_limit() {
        let slug = Slug::parse(&"z".repeat(MAX_SLUG_LEN)).unwrap();
        assert_eq!(StorageKey::from_slug(&slug).as_str().len(), 63);
    }

    #[test]
    fn deserialize_validates() {
        let ok: Result<Slug, _> = serde_json::from_str("\"acme\"");
        let bad: Result<Slug, _> = serde_json::from_str("\"ACME\"");
        assert!(ok.is_ok());
        assert!(bad.is_err());
    }
}
