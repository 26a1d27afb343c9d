//! Upstream terminology services and the governance layer around them.
//!
//! Each client wraps a [`GovernedUpstream`], which owns the upstream's
//! [`RateLimiter`] and [`RetryPolicy`] and shares the process-wide
//! [`TtlCache`](crate::cache::TtlCache).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::{MimirError, Result};

pub mod auth;
pub mod governed;
pub mod icd;
pub mod loinc;
pub mod mesh;
pub mod rate_limit;
pub mod retry;
pub mod rxnorm;
pub mod snomed;
pub mod traits;
pub mod transport;

pub use auth::{ClientCredentials, CredentialExchange, CredentialManager, OAuthClientCredentials};
pub use governed::GovernedUpstream;
pub use icd::IcdClient;
pub use loinc::LoincClient;
pub use mesh::MeshClient;
pub use rate_limit::{RateLimit, RateLimiter};
pub use retry::{RetryHistory, RetryOutcome, RetryPolicy};
pub use rxnorm::RxNormClient;
pub use snomed::SnomedClient;
pub use traits::{HttpRequest, HttpResponse, HttpTransport, RequestAuthorizer};
pub use transport::ReqwestTransport;

/// The five upstream services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamId {
    Icd,
    Loinc,
    RxNorm,
    Mesh,
    Snomed,
}

impl UpstreamId {
    pub const ALL: [UpstreamId; 5] = [
        UpstreamId::Icd,
        UpstreamId::Loinc,
        UpstreamId::RxNorm,
        UpstreamId::Mesh,
        UpstreamId::Snomed,
    ];

    /// Stable identifier used in cache namespaces, metrics and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Icd => "icd",
            Self::Loinc => "loinc",
            Self::RxNorm => "rxnorm",
            Self::Mesh => "mesh",
            Self::Snomed => "snomed",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Icd => "WHO ICD-11",
            Self::Loinc => "LOINC",
            Self::RxNorm => "RxNorm",
            Self::Mesh => "MeSH",
            Self::Snomed => "SNOMED CT",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Icd => icd::DEFAULT_BASE_URL,
            Self::Loinc => loinc::DEFAULT_BASE_URL,
            Self::RxNorm => rxnorm::DEFAULT_BASE_URL,
            Self::Mesh => mesh::DEFAULT_BASE_URL,
            Self::Snomed => snomed::DEFAULT_BASE_URL,
        }
    }

    /// Per-request timeout; the SPARQL and Snowstorm backends are slower.
    pub fn default_timeout(&self) -> Duration {
        let secs = match self {
            Self::Icd | Self::Loinc | Self::RxNorm => 30,
            Self::Mesh => 45,
            Self::Snomed => 60,
        };
        Duration::from_secs(secs)
    }

    /// Published or observed per-second allowance of each service.
    pub fn default_rate_limit(&self) -> RateLimit {
        match self {
            Self::Icd => RateLimit::per_second(5),
            Self::Loinc | Self::Mesh | Self::Snomed => RateLimit::per_second(10),
            Self::RxNorm => RateLimit::per_second(20),
        }
    }
}

impl FromStr for UpstreamId {
    type Err = MimirError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MimirError::Configuration(format!("unknown upstream {s:?}")))
    }
}

impl fmt::Display for UpstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join a base URL and a path without doubling or dropping the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
