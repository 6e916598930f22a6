use std::fmt;

use super::{Slug, StorageKey, TenantId};

/// One identifier shape the registry knows how to resolve.
///
/// Each variant is resolved by exactly one mapping inside the registry; callers
/// pick the variant, they never re-implement the mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TenantIdentifier {
    Id(TenantId),
    Slug(Slug),
    StorageKey(StorageKey),
    /// Raw `Host` value; port and case are normalized during resolution
    Hostname(String),
}

impl TenantIdentifier {
    pub fn kind(&self) -> &'static str {
        match self {
            TenantIdentifier::Id(_) => "id",
            TenantIdentifier::Slug(_) => "slug",
            TenantIdentifier::StorageKey(_) => "storage_key",
            TenantIdentifier::Hostname(_) => "hostname",
        }
    }

    /// Trusted header values carry either a tenant id or a slug
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(id) = value.parse::<TenantId>() {
            return Some(TenantIdentifier::Id(id));
        }
        Slug::parse(value).ok().map(TenantIdentifier::Slug)
    }

    /// Path segments carry a slug only
    pub fn from_path_segment(value: &str) -> Option<Self> {
        Slug::parse(value.trim()).ok().map(TenantIdentifier::Slug)
    }

    pub fn from_hostname(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        Some(TenantIdentifier::Hostname(value.to_string()))
    }
}

impl fmt::Display for TenantIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantIdentifier::Id(id) => write!(f, "id:{}", id),
            TenantIdentifier::Slug(slug) => write!(f, "slug:{}", slug),
            TenantIdentifier::StorageKey(key) => write!(f, "storage_key:{}", key),
            TenantIdentifier::Hostname(host) => write!(f, "hostname:{}", host),
        }
    }
}

/// Strip an optional port and lowercase
pub fn normalize_hostname(raw: &str) -> String {
    let host = raw.trim().trim_end_matches('.');
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    host.to_ascii_lowercase()
}

/// `acme.example.com` with base `example.com` yields `acme`. Only direct
/// subdomains qualify.
pub fn subdomain_label<'a>(host: &'a str, base_domain: &str) -> Option<&'a str> {
    if base_domain.is_empty() {
        return None;
    }
    let label = host.strip_suffix(base_domain)?.strip_suffix('.')?;
    if label.is_empty() || label.contains('.') {
        return None;
    }
    Some(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_accepts_id_or_slug() {
        let id = TenantId::new();
        assert_eq!(
            TenantIdentifier::from_header(&id.to_string()),
            Some(TenantIdentifier::Id(id))
        );
        assert!(matches!(
            TenantIdentifier::from_header("acme"),
            Some(TenantIdentifier::Slug(_))
        ));
        assert_eq!(TenantIdentifier::from_header("not a slug!"), None);
    }

    #[test]
    fn normalizes_hostnames() {
        assert_eq!(normalize_hostname("ACME.Example.com:8080"), "acme.example.com");
        assert_eq!(normalize_hostname("acme.example.com."), "acme.example.com");
    }

    #[test]
    fn only_direct_subdomains_qualify() {
        assert_eq!(subdomain_label("acme.example.com", "example.com"), Some("acme"));
        assert_eq!(subdomain_label("a.b.example.com", "example.com"), None);
        assert_eq!(subdomain_label("example.com", "example.com"), None);
        assert_eq!(subdomain_label("acmeexample.com", "example.com"), None);
        assert_eq!(subdomain_label("acme.other.org", "example.com"), None);
    }
}
