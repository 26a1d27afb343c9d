//! Builder for configuring gateway instances

use std::sync::Arc;

use tracing::{info, warn};

use super::TerminologyGateway;
use crate::cache::{CacheTtls, TtlCache};
use crate::config::Config;
use crate::upstream::icd::{self, IcdClient};
use crate::upstream::{
    ClientCredentials, CredentialExchange, CredentialManager, GovernedUpstream, HttpTransport,
    LoincClient, MeshClient, OAuthClientCredentials, RateLimit, RateLimiter, ReqwestTransport,
    RetryPolicy, RxNormClient, SnomedClient, UpstreamId,
};
use crate::Result;

/// Main entry point for creating gateway instances.
pub struct Mimir;

impl Mimir {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> MimirBuilder {
        MimirBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// This is the composition root: it creates the shared cache, one rate
/// limiter per upstream and the credential manager, and hands them to the
/// clients. Nothing is held in globals.
pub struct MimirBuilder {
    config: Config,
    icd_credentials: Option<ClientCredentials>,
    transport: Option<Arc<dyn HttpTransport>>,
    credential_exchange: Option<Arc<dyn CredentialExchange>>,
    retry: Option<RetryPolicy>,
    credential_retry: Option<RetryPolicy>,
    ttls: Option<CacheTtls>,
}

impl Default for MimirBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MimirBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            icd_credentials: None,
            transport: None,
            credential_exchange: None,
            retry: None,
            credential_retry: None,
            ttls: None,
        }
    }

    /// Start from a loaded configuration file.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Client id/secret for the ICD-11 token endpoint. Without them the
    /// ICD-11 operations fail with `AUTH_CONFIG_ERROR`; the other upstreams
    /// are unaffected.
    pub fn icd_credentials(mut self, credentials: ClientCredentials) -> Self {
        self.icd_credentials = Some(credentials);
        self
    }

    /// Replace the HTTP transport (default: [`ReqwestTransport`]).
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the ICD-11 credential exchange (default: OAuth2 client
    /// credentials against the configured token URL).
    pub fn credential_exchange(mut self, exchange: Arc<dyn CredentialExchange>) -> Self {
        self.credential_exchange = Some(exchange);
        self
    }

    /// Override the per-upstream base URL.
    pub fn base_url(mut self, upstream: UpstreamId, url: impl Into<String>) -> Self {
        self.settings_mut(upstream).base_url = Some(url.into());
        self
    }

    /// Override an upstream's token bucket.
    pub fn rate_limit(mut self, upstream: UpstreamId, limit: RateLimit) -> Self {
        self.settings_mut(upstream).rate_limit = Some(limit);
        self
    }

    /// Override the retry policy for upstream requests.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Override the retry policy for the credential exchange.
    pub fn credential_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.credential_retry = Some(policy);
        self
    }

    pub fn cache_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = Some(ttls);
        self
    }

    fn settings_mut(&mut self, upstream: UpstreamId) -> &mut crate::config::UpstreamSettings {
        let upstreams = &mut self.config.upstreams;
        match upstream {
            UpstreamId::Icd => &mut upstreams.icd.common,
            UpstreamId::Loinc => &mut upstreams.loinc,
            UpstreamId::RxNorm => &mut upstreams.rxnorm,
            UpstreamId::Mesh => &mut upstreams.mesh,
            UpstreamId::Snomed => &mut upstreams.snomed.common,
        }
    }

    /// Build the gateway.
    pub fn build(self) -> Result<TerminologyGateway> {
        self.config.validate()?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let cache_config = self.config.cache_config();
        let cache = TtlCache::new(&cache_config);
        // Without a runtime there is no background sweep; lookups still
        // skip expired entries.
        let sweeper = tokio::runtime::Handle::try_current()
            .ok()
            .map(|_| cache.spawn_sweeper(cache_config.sweep_interval));
        let ttls = self
            .ttls
            .unwrap_or_else(|| self.config.cache.ttl.to_ttls());
        let retry = self.retry.unwrap_or_else(|| self.config.retry_policy());
        let credential_retry = self
            .credential_retry
            .unwrap_or_else(|| self.config.credential_retry_policy());
        retry.validate()?;
        credential_retry.validate()?;

        let governed = |id: UpstreamId| -> Result<GovernedUpstream> {
            let resolved = self.config.upstreams.resolve(id);
            let limiter = RateLimiter::new(id.as_str(), resolved.rate_limit)?;
            Ok(GovernedUpstream::new(
                id,
                transport.clone(),
                limiter,
                retry.clone(),
                cache.clone(),
                resolved.timeout,
            ))
        };

        let upstreams = &self.config.upstreams;

        // ICD-11 is the only credentialed upstream; a missing credential
        // disables it without failing the whole gateway.
        let icd_upstream = governed(UpstreamId::Icd)?;
        let icd_limiter = icd_upstream.limiter().clone();
        let exchange = self.credential_exchange.unwrap_or_else(|| {
            Arc::new(OAuthClientCredentials::new(
                transport.clone(),
                upstreams.icd.token_url(),
                icd::TOKEN_SCOPE,
                upstreams.resolve(UpstreamId::Icd).timeout,
            ))
        });
        let icd = CredentialManager::new(
            UpstreamId::Icd,
            self.icd_credentials,
            exchange,
            cache.clone(),
            credential_retry,
            ttls.credential,
        )
        .map(|credentials| {
            IcdClient::new(
                icd_upstream.with_authorizer(Arc::new(credentials)),
                upstreams.icd.release(),
                ttls.clone(),
            )
        });
        if let Err(e) = &icd {
            warn!(error = %e, "ICD-11 operations disabled");
        }

        let loinc = LoincClient::new(
            governed(UpstreamId::Loinc)?,
            upstreams.resolve(UpstreamId::Loinc).base_url,
            ttls.clone(),
        );
        let rxnorm = RxNormClient::new(
            governed(UpstreamId::RxNorm)?,
            upstreams.resolve(UpstreamId::RxNorm).base_url,
            ttls.clone(),
        );
        let mesh = MeshClient::new(
            governed(UpstreamId::Mesh)?,
            upstreams.resolve(UpstreamId::Mesh).base_url,
            ttls.clone(),
        );
        let snomed = SnomedClient::new(
            governed(UpstreamId::Snomed)?,
            upstreams.resolve(UpstreamId::Snomed).base_url,
            upstreams.snomed.branch(),
            ttls,
        );

        info!(
            version = %crate::version::version_string(),
            icd_enabled = icd.is_ok(),
            max_cache_entries = self.config.cache.max_entries,
            "terminology gateway ready"
        );

        Ok(TerminologyGateway::new(
            cache,
            sweeper,
            icd,
            icd_limiter,
            loinc,
            rxnorm,
            mesh,
            snomed,
        ))
    }
}
