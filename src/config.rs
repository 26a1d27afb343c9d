//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.mimir/config.toml` (user)
//! 3. `/etc/mimir/config.toml` (system)
//!
//! If none exists the built-in defaults apply. Every field is optional.
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.mimir/secrets.toml` (user, must be 0600)
//! 2. `/etc/mimir/secrets.toml` (system, must be 0600)
//!
//! ```toml
//! [cache]
//! max_entries = 5000
//! sweep_interval_secs = 120
//!
//! [cache.ttl]
//! search_secs = 300
//!
//! [retry]
//! max_retries = 2
//!
//! [upstreams.icd]
//! release = "2024-01"
//! rate_limit = { capacity = 5, refill_per_sec = 5.0 }
//!
//! [upstreams.snomed]
//! base_url = "http://localhost:8080"
//! branch = "MAIN/SNOMEDCT-US"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::cache::{CacheConfig, CacheTtls};
use crate::upstream::icd::{self, IcdRelease};
use crate::upstream::retry::RetryPolicy;
use crate::upstream::snomed;
use crate::upstream::{ClientCredentials, RateLimit, UpstreamId};
use crate::{MimirError, Result};

/// Gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Retry policy for the credential exchange. When absent, the patient
    /// policy applies (5 retries, 2s initial, 30s max).
    #[serde(default)]
    pub credential_retry: Option<RetrySettings>,
    #[serde(default)]
    pub upstreams: UpstreamsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum cached entries (default: 10000).
    pub max_entries: u64,
    /// Seconds between expiry sweeps (default: 60).
    pub sweep_interval_secs: u64,
    pub ttl: TtlSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let cache = CacheConfig::default();
        Self {
            max_entries: cache.max_entries,
            sweep_interval_secs: cache.sweep_interval.as_secs(),
            ttl: TtlSettings::default(),
        }
    }
}

/// TTL per data class, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtlSettings {
    pub structural_secs: u64,
    pub lookup_secs: u64,
    pub search_secs: u64,
    pub credential_secs: u64,
}

impl Default for TtlSettings {
    fn default() -> Self {
        let ttls = CacheTtls::default();
        Self {
            structural_secs: ttls.structural.as_secs(),
            lookup_secs: ttls.lookup.as_secs(),
            search_secs: ttls.search.as_secs(),
            credential_secs: ttls.credential.as_secs(),
        }
    }
}

impl TtlSettings {
    pub fn to_ttls(&self) -> CacheTtls {
        CacheTtls {
            structural: Duration::from_secs(self.structural_secs),
            lookup: Duration::from_secs(self.lookup_secs),
            search: Duration::from_secs(self.search_secs),
            credential: Duration::from_secs(self.credential_secs),
        }
    }
}

/// Retry settings; delays in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::from(&RetryPolicy::default())
    }
}

impl From<&RetryPolicy> for RetrySettings {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter: policy.jitter,
            retryable_statuses: policy.retryable_statuses.clone(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_multiplier(self.backoff_multiplier)
            .jitter(self.jitter)
            .retryable_statuses(self.retryable_statuses.clone())
    }
}

/// Settings common to every upstream. Unset fields use the upstream's
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
}

/// [`UpstreamSettings`] with defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUpstream {
    pub base_url: String,
    pub timeout: Duration,
    pub rate_limit: RateLimit,
}

impl UpstreamSettings {
    pub fn resolve(&self, id: UpstreamId) -> ResolvedUpstream {
        ResolvedUpstream {
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| id.default_base_url().to_string()),
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| id.default_timeout()),
            rate_limit: self.rate_limit.unwrap_or_else(|| id.default_rate_limit()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IcdSettings {
    #[serde(flatten)]
    pub common: UpstreamSettings,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub linearization: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
}

impl IcdSettings {
    pub fn release(&self) -> IcdRelease {
        let defaults = IcdRelease::default();
        IcdRelease {
            base_url: self.common.resolve(UpstreamId::Icd).base_url,
            release: self.release.clone().unwrap_or(defaults.release),
            linearization: self.linearization.clone().unwrap_or(defaults.linearization),
            language: self.language.clone().unwrap_or(defaults.language),
        }
    }

    pub fn token_url(&self) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| icd::DEFAULT_TOKEN_URL.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnomedSettings {
    #[serde(flatten)]
    pub common: UpstreamSettings,
    /// Snowstorm branch path (default: `MAIN`).
    #[serde(default)]
    pub branch: Option<String>,
}

impl SnomedSettings {
    pub fn branch(&self) -> String {
        self.branch
            .clone()
            .unwrap_or_else(|| snomed::DEFAULT_BRANCH.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamsConfig {
    #[serde(default)]
    pub icd: IcdSettings,
    #[serde(default)]
    pub loinc: UpstreamSettings,
    #[serde(default)]
    pub rxnorm: UpstreamSettings,
    #[serde(default)]
    pub mesh: UpstreamSettings,
    #[serde(default)]
    pub snomed: SnomedSettings,
}

impl UpstreamsConfig {
    pub fn settings(&self, id: UpstreamId) -> &UpstreamSettings {
        match id {
            UpstreamId::Icd => &self.icd.common,
            UpstreamId::Loinc => &self.loinc,
            UpstreamId::RxNorm => &self.rxnorm,
            UpstreamId::Mesh => &self.mesh,
            UpstreamId::Snomed => &self.snomed.common,
        }
    }

    pub fn resolve(&self, id: UpstreamId) -> ResolvedUpstream {
        self.settings(id).resolve(id)
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided; must exist)
    /// 2. `~/.mimir/config.toml`
    /// 3. `/etc/mimir/config.toml`
    ///
    /// Falls back to defaults when no file is found.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_config_path(explicit_path)? else {
            debug!("no config file found, using defaults");
            return Ok(Self::default());
        };
        debug!(path = %path.display(), "loading config");
        let content = fs::read_to_string(&path).map_err(|e| {
            MimirError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config = Self::from_toml(&content).map_err(|e| {
            MimirError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MimirError::Configuration(e.to_string()))
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MimirError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".mimir").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/mimir/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_entries(self.cache.max_entries)
            .sweep_interval(Duration::from_secs(self.cache.sweep_interval_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }

    pub fn credential_retry_policy(&self) -> RetryPolicy {
        self.credential_retry
            .as_ref()
            .map(RetrySettings::to_policy)
            .unwrap_or_else(RetryPolicy::patient)
    }

    /// Reject values that would fail later during construction.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(MimirError::Configuration(
                "cache.max_entries must be positive".to_string(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(MimirError::Configuration(
                "cache.sweep_interval_secs must be positive".to_string(),
            ));
        }
        let ttl = &self.cache.ttl;
        if [ttl.structural_secs, ttl.lookup_secs, ttl.search_secs, ttl.credential_secs]
            .contains(&0)
        {
            return Err(MimirError::Configuration(
                "cache TTLs must be positive".to_string(),
            ));
        }
        self.retry_policy().validate()?;
        self.credential_retry_policy().validate()?;

        for id in UpstreamId::ALL {
            let settings = self.upstreams.settings(id);
            if settings.timeout_secs == Some(0) {
                return Err(MimirError::Configuration(format!(
                    "upstreams.{id}.timeout_secs must be positive"
                )));
            }
            if let Err(e) = self.upstreams.resolve(id).rate_limit.validate() {
                let reason = match e {
                    MimirError::Configuration(msg) => msg,
                    other => other.to_string(),
                };
                return Err(MimirError::Configuration(format!("upstreams.{id}: {reason}")));
            }
        }
        Ok(())
    }
}

/// Secrets configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub icd: Option<ClientSecret>,
}

/// An OAuth client id/secret pair.
#[derive(Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecret")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

const ICD_CLIENT_ID_ENV: &str = "ICD_CLIENT_ID";
const ICD_CLIENT_SECRET_ENV: &str = "ICD_CLIENT_SECRET";

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.mimir/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/mimir/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (credentials may come from
    /// env vars).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".mimir").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/mimir/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Read a secrets file after checking its permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MimirError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(MimirError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// ICD-11 client credentials, falling back to `ICD_CLIENT_ID` /
    /// `ICD_CLIENT_SECRET`.
    pub fn icd_credentials(&self) -> Option<ClientCredentials> {
        if let Some(secret) = &self.icd {
            return Some(ClientCredentials::new(
                secret.client_id.clone(),
                secret.client_secret.clone(),
            ));
        }
        let id = std::env::var(ICD_CLIENT_ID_ENV).ok()?;
        let secret = std::env::var(ICD_CLIENT_SECRET_ENV).ok()?;
        Some(ClientCredentials::new(id, secret))
    }
}
