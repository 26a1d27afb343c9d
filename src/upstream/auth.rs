//! Bearer credentials for the one authenticated upstream (ICD-11).
//!
//! The credential is itself a cached resource. [`CredentialManager`] stores
//! it in the shared [`TtlCache`] under the reserved [`AUTH_NAMESPACE`],
//! keyed by upstream id:
//!
//! ```text
//!   no credential ──exchange OK──► cached ──TTL elapses──► no credential
//!         ▲                          │
//!         └──── upstream 401 ────────┘  (evicted immediately)
//! ```
//!
//! The TTL is the configured credential TTL, shortened when the issued
//! lifetime minus [`REFRESH_MARGIN`] is smaller, so tokens are replaced
//! before the upstream stops accepting them. Exchanges run under their own
//! (patient) [`RetryPolicy`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::UpstreamId;
use super::governed::status_error;
use super::retry::RetryPolicy;
use super::traits::{HttpRequest, HttpTransport, RequestAuthorizer};
use crate::cache::TtlCache;
use crate::telemetry;
use crate::{MimirError, Result};

/// Cache namespace reserved for credentials.
pub const AUTH_NAMESPACE: &str = "auth";

/// How long before the issued expiry a credential is dropped from the cache.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_ISSUED_LIFETIME: Duration = Duration::from_secs(3600);

/// OAuth2 client id/secret pair. `Debug` redacts the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// A token as issued by the exchange endpoint. `Debug` redacts the token.
#[derive(Clone)]
pub struct IssuedCredential {
    pub token: String,
    pub lifetime: Duration,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("token", &"<redacted>")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// A cached bearer credential. `Debug` redacts the token.
#[derive(Clone)]
pub struct Credential {
    pub token: String,
    /// When the issuing endpoint says the token stops being valid.
    pub expires_at: Instant,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Client-credentials exchange endpoint.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self, credentials: &ClientCredentials) -> Result<IssuedCredential>;
}

/// OAuth2 `client_credentials` grant over an [`HttpTransport`].
pub struct OAuthClientCredentials {
    transport: Arc<dyn HttpTransport>,
    token_url: String,
    scope: String,
    timeout: Duration,
}

impl OAuthClientCredentials {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        token_url: impl Into<String>,
        scope: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            token_url: token_url.into(),
            scope: scope.into(),
            timeout,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[async_trait]
impl CredentialExchange for OAuthClientCredentials {
    async fn exchange(&self, credentials: &ClientCredentials) -> Result<IssuedCredential> {
        let request = HttpRequest::new(&self.token_url)
            .header("Accept", "application/json")
            .timeout(self.timeout);
        let form = [
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("scope".to_string(), self.scope.clone()),
            ("client_id".to_string(), credentials.client_id.clone()),
            ("client_secret".to_string(), credentials.client_secret.clone()),
        ];

        let response = self.transport.post_form(&request, &form).await?;
        match response.status {
            s if (200..300).contains(&s) => {}
            // invalid_client / unauthorized_client: retrying cannot help
            400 | 401 | 403 => {
                return Err(MimirError::AuthConfig(format!(
                    "token endpoint rejected client credentials (HTTP {})",
                    response.status
                )));
            }
            _ => return Err(status_error("auth", &self.token_url, &response, false)),
        }

        let token: TokenResponse = response.json()?;
        if token.access_token.is_empty() {
            return Err(MimirError::Decode(
                "token endpoint returned an empty access_token".to_string(),
            ));
        }
        Ok(IssuedCredential {
            token: token.access_token,
            lifetime: token
                .expires_in
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_ISSUED_LIFETIME),
        })
    }
}

/// Obtains, caches and evicts the bearer credential for one upstream.
#[derive(Clone)]
pub struct CredentialManager {
    upstream: UpstreamId,
    credentials: ClientCredentials,
    exchange: Arc<dyn CredentialExchange>,
    cache: TtlCache,
    retry: RetryPolicy,
    ttl: Duration,
}

impl CredentialManager {
    /// Fails with [`MimirError::AuthConfig`] when credentials are missing or
    /// blank.
    pub fn new(
        upstream: UpstreamId,
        credentials: Option<ClientCredentials>,
        exchange: Arc<dyn CredentialExchange>,
        cache: TtlCache,
        retry: RetryPolicy,
        ttl: Duration,
    ) -> Result<Self> {
        let credentials = credentials.ok_or_else(|| {
            MimirError::AuthConfig(format!("no client credentials configured for {upstream}"))
        })?;
        if credentials.client_id.trim().is_empty() || credentials.client_secret.trim().is_empty() {
            return Err(MimirError::AuthConfig(format!(
                "client id and secret for {upstream} must not be empty"
            )));
        }
        Ok(Self {
            upstream,
            credentials,
            exchange,
            cache,
            retry,
            ttl,
        })
    }

    fn cache_key(&self) -> &'static str {
        self.upstream.as_str()
    }

    /// TTL for a freshly issued credential.
    fn effective_ttl(&self, lifetime: Duration) -> Duration {
        self.ttl.min(lifetime.saturating_sub(REFRESH_MARGIN))
    }

    /// Current credential, exchanging for a new one if none is cached.
    pub async fn credential(&self) -> Result<Credential> {
        self.cache
            .get_or_compute_with_ttl(AUTH_NAMESPACE, self.cache_key(), || self.issue())
            .await
    }

    async fn issue(&self) -> Result<(Credential, Duration)> {
        let outcome = self
            .retry
            .run(self.upstream.as_str(), "credential_exchange", || {
                self.exchange.exchange(&self.credentials)
            })
            .await;

        let status = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.code().as_str(),
        };
        metrics::counter!(telemetry::CREDENTIAL_EXCHANGES_TOTAL,
            "upstream" => self.upstream.as_str(),
            "status" => status,
        )
        .increment(1);

        let issued = outcome?;
        let ttl = self.effective_ttl(issued.lifetime);
        info!(
            upstream = self.upstream.as_str(),
            lifetime_secs = issued.lifetime.as_secs(),
            cached_secs = ttl.as_secs(),
            "obtained bearer credential"
        );
        let credential = Credential {
            token: issued.token,
            expires_at: Instant::now() + issued.lifetime,
        };
        Ok((credential, ttl))
    }

    /// Drop the cached credential; the next request re-authenticates.
    pub async fn invalidate(&self) {
        debug!(upstream = self.upstream.as_str(), "evicting bearer credential");
        self.cache.delete(AUTH_NAMESPACE, self.cache_key()).await;
    }

    pub fn is_cached(&self) -> bool {
        self.cache.has(AUTH_NAMESPACE, self.cache_key())
    }
}

#[async_trait]
impl RequestAuthorizer for CredentialManager {
    async fn authorize(&self, request: HttpRequest) -> Result<HttpRequest> {
        let credential = self.credential().await?;
        Ok(request.bearer(&credential.token))
    }

    async fn credential_rejected(&self) {
        self.invalidate().await;
    }
}
