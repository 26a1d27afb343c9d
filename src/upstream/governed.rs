//! Composition of rate limiting, retry and caching around one upstream.
//!
//! Every client call goes through [`GovernedUpstream`]:
//!
//! ```text
//! fetch(op, key) ──► TtlCache::get_or_compute(namespace = "{upstream}:{op}")
//!                          │ miss
//!                          ▼
//!                    authorize (credentialed upstream only)
//!                          │
//!                          ▼
//!              ┌── RetryPolicy::run ─────────────────────────┐
//!              │  RateLimiter::acquire ──► HttpTransport::get │
//!              │          ▲                      │           │
//!              │          └──── transient ───────┘           │
//!              └──────────────────────────────────────────────┘
//!                          │ 2xx
//!                          ▼
//!                    parse ──► cache ──► caller
//! ```
//!
//! A limiter token is taken before every attempt, so retries are charged
//! against the upstream's budget like any other request. Tokens are never
//! refunded.
//!
//! The cache-aside computation runs on a detached task: a caller that stops
//! waiting does not abort the upstream request, and its result is still
//! cached for later callers.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::UpstreamId;
use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use super::traits::{HttpRequest, HttpResponse, HttpTransport, RequestAuthorizer};
use crate::cache::TtlCache;
use crate::telemetry;
use crate::{MimirError, Result};

/// Longest upstream error body excerpt kept in an error message.
const ERROR_BODY_EXCERPT: usize = 200;

/// One upstream behind its limiter, retry policy and the shared cache.
///
/// Cheap to clone; clones share limiter and cache.
#[derive(Clone)]
pub struct GovernedUpstream {
    id: UpstreamId,
    transport: Arc<dyn HttpTransport>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    cache: TtlCache,
    timeout: Duration,
    authorizer: Option<Arc<dyn RequestAuthorizer>>,
}

impl GovernedUpstream {
    pub fn new(
        id: UpstreamId,
        transport: Arc<dyn HttpTransport>,
        limiter: RateLimiter,
        retry: RetryPolicy,
        cache: TtlCache,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            transport,
            limiter,
            retry,
            cache,
            timeout,
            authorizer: None,
        }
    }

    /// Attach credentials to every request; 401 responses become
    /// [`MimirError::AuthExpired`] and notify the authorizer.
    pub fn with_authorizer(mut self, authorizer: Arc<dyn RequestAuthorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn id(&self) -> UpstreamId {
        self.id
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// Cache namespace for one of this upstream's operations.
    pub fn namespace(&self, operation: &str) -> String {
        format!("{}:{}", self.id.as_str(), operation)
    }

    /// Cache-aside fetch: return the cached value for `key`, or perform the
    /// governed request, `parse` the response and cache the result for `ttl`.
    pub async fn fetch<T>(
        &self,
        operation: &'static str,
        ttl: Duration,
        key: String,
        request: HttpRequest,
        parse: fn(&HttpResponse) -> Result<T>,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let this = self.clone();
        self.get_or_compute(operation, ttl, key, move || async move {
            let response = this.call(operation, &request).await?;
            parse(&response)
        })
        .await
    }

    /// Cache-aside over an arbitrary computation under this upstream's
    /// `operation` namespace.
    ///
    /// The lookup runs on a spawned task, so a caller that stops waiting
    /// does not cancel it and the result is still cached.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        operation: &'static str,
        ttl: Duration,
        key: String,
        factory: F,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let cache = self.cache.clone();
        let namespace = self.namespace(operation);
        let task =
            tokio::spawn(async move { cache.get_or_compute(&namespace, &key, ttl, factory).await });
        task.await
            .map_err(|e| MimirError::Internal(format!("{} {operation} task failed: {e}", self.id)))?
    }

    /// Governed request without caching.
    pub async fn call(&self, operation: &str, request: &HttpRequest) -> Result<HttpResponse> {
        let mut request = request.clone();
        if request.timeout.is_none() {
            request.timeout = Some(self.timeout);
        }
        if let Some(authorizer) = &self.authorizer {
            request = authorizer.authorize(request).await?;
        }

        self.retry
            .run(self.id.as_str(), operation, || self.attempt(operation, &request))
            .await
    }

    async fn attempt(&self, operation: &str, request: &HttpRequest) -> Result<HttpResponse> {
        self.limiter.acquire().await;

        let started = Instant::now();
        let outcome = match self.transport.get(request).await {
            Ok(response) => self.check_status(request, response),
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed();

        let status = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.code().as_str(),
        };
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "upstream" => self.id.as_str(),
            "operation" => operation.to_owned(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "upstream" => self.id.as_str(),
            "operation" => operation.to_owned(),
        )
        .record(elapsed.as_secs_f64());
        debug!(
            upstream = self.id.as_str(),
            operation,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            "upstream request finished"
        );

        if let (Err(MimirError::AuthExpired), Some(authorizer)) = (&outcome, &self.authorizer) {
            authorizer.credential_rejected().await;
        }
        outcome
    }

    fn check_status(&self, request: &HttpRequest, response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            return Ok(response);
        }
        Err(status_error(
            self.id.as_str(),
            &request.url,
            &response,
            self.authorizer.is_some(),
        ))
    }
}

/// Map a non-2xx response to the error taxonomy.
pub(crate) fn status_error(
    upstream: &str,
    url: &str,
    response: &HttpResponse,
    authenticated: bool,
) -> MimirError {
    match response.status {
        401 if authenticated => MimirError::AuthExpired,
        404 => MimirError::NotFound(url.to_string()),
        429 => MimirError::RateLimited {
            retry_after: response.retry_after,
        },
        status => {
            let excerpt: String = response.body.trim().chars().take(ERROR_BODY_EXCERPT).collect();
            let message = if excerpt.is_empty() {
                format!("{upstream} returned HTTP {status}")
            } else {
                format!("{upstream} returned HTTP {status}: {excerpt}")
            };
            MimirError::Api { status, message }
        }
    }
}
