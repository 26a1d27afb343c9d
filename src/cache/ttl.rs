//! TTL classes for cached upstream data.

use std::time::Duration;

/// Data class of a cached result; each class has its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// Hierarchies and relationships; rarely change between releases.
    Structural,
    /// Single-record lookups by identifier.
    Lookup,
    /// Free-text search and structured-query results.
    Search,
    /// Short-lived bearer credentials.
    Credential,
}

/// Per-class TTLs.
///
/// ```rust
/// # use mimir::cache::{CacheTtls, TtlClass};
/// # use std::time::Duration;
/// let ttls = CacheTtls::default().search(Duration::from_secs(60));
/// assert_eq!(ttls.ttl(TtlClass::Search), Duration::from_secs(60));
/// assert_eq!(ttls.ttl(TtlClass::Lookup), Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTtls {
    /// Default: 24 hours.
    pub structural: Duration,
    /// Default: 1 hour.
    pub lookup: Duration,
    /// Default: 10 minutes.
    pub search: Duration,
    /// Default: 50 minutes (upstream tokens live for 60).
    pub credential: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            structural: Duration::from_secs(24 * 3600),
            lookup: Duration::from_secs(3600),
            search: Duration::from_secs(600),
            credential: Duration::from_secs(50 * 60),
        }
    }
}

impl CacheTtls {
    pub fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Structural => self.structural,
            TtlClass::Lookup => self.lookup,
            TtlClass::Search => self.search,
            TtlClass::Credential => self.credential,
        }
    }

    pub fn structural(mut self, ttl: Duration) -> Self {
        self.structural = ttl;
        self
    }

    pub fn lookup(mut self, ttl: Duration) -> Self {
        self.lookup = ttl;
        self
    }

    pub fn search(mut self, ttl: Duration) -> Self {
        self.search = ttl;
        self
    }

    pub fn credential(mut self, ttl: Duration) -> Self {
        self.credential = ttl;
        self
    }
}
