use crate::tenant::TenantIdentifier;

/// Where a candidate identifier came from. Variant order is precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalSource {
    /// Trusted identifier header, set by our own edge proxy
    Header,
    /// `/t/{slug}/...` path prefix
    PathSegment,
    /// `Host` header
    Hostname,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Header => "header",
            SignalSource::PathSegment => "path",
            SignalSource::Hostname => "hostname",
        }
    }

    /// Header and path signals name a tenant on purpose; a hostname is
    /// present on every request whether or not it identifies anyone.
    pub fn is_explicit(&self) -> bool {
        !matches!(self, SignalSource::Hostname)
    }

    /// Each source accepts exactly one set of identifier shapes
    pub fn parse(&self, raw: &str) -> Option<TenantIdentifier> {
        match self {
            SignalSource::Header => TenantIdentifier::from_header(raw),
            SignalSource::PathSegment => TenantIdentifier::from_path_segment(raw),
            SignalSource::Hostname => TenantIdentifier::from_hostname(raw),
        }
    }
}

/// Inbound tenant signals for one unit of work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionSignals {
    pub header: Option<String>,
    pub path_segment: Option<String>,
    pub hostname: Option<String>,
}

impl ResolutionSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, value: impl Into<String>) -> Self {
        self.header = Some(value.into());
        self
    }

    pub fn with_path_segment(mut self, value: impl Into<String>) -> Self {
        self.path_segment = Some(value.into());
        self
    }

    pub fn with_hostname(mut self, value: impl Into<String>) -> Self {
        self.hostname = Some(value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ordered().is_empty()
    }

    pub fn has_explicit(&self) -> bool {
        self.ordered().iter().any(|(source, _)| source.is_explicit())
    }

    /// Present signals in fixed precedence order; blank values are dropped
    pub fn ordered(&self) -> Vec<(SignalSource, &str)> {
        [
            (SignalSource::Header, self.header.as_deref()),
            (SignalSource::PathSegment, self.path_segment.as_deref()),
            (SignalSource::Hostname, self.hostname.as_deref()),
        ]
        .into_iter()
        .filter_map(|(source, value)| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (source, v))
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_is_header_path_host() {
        let signals = ResolutionSignals::new()
            .with_hostname("acme.example.com")
            .with_path_segment("beta")
            .with_header("gamma");

        let sources: Vec<_> = signals.ordered().into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            sources,
            vec![SignalSource::Header, SignalSource::PathSegment, SignalSource::Hostname]
        );
    }

    #[test]
    fn blank_signals_are_ignored() {
        let signals = ResolutionSignals::new().with_header("  ").with_hostname("");
        assert!(signals.is_empty());
        assert!(!signals.has_explicit());
    }

    #[test]
    fn path_accepts_only_slugs() {
        assert!(SignalSource::PathSegment.parse("acme").is_some());
        // A uuid in the path is read as a slug, never as a tenant id
        assert!(matches!(
            SignalSource::PathSegment.parse("7d9c3f4e-0a55-4a43-a0f5-3c1e5e2b0b11"),
            Some(TenantIdentifier::Slug(_))
        ));
        assert!(SignalSource::PathSegment.parse("Not_A_Slug").is_none());
    }
}
