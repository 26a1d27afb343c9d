//! ICD-11 credential lifecycle: exchange, caching, refresh and eviction.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mimir::upstream::auth::IssuedCredential;
use mimir::upstream::{
    ClientCredentials, CredentialExchange, CredentialManager, GovernedUpstream, HttpRequest,
    OAuthClientCredentials, RateLimit, RateLimiter, ReqwestTransport, RetryPolicy, UpstreamId,
};
use mimir::{MimirError, Result, TtlCache};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Issues `tok-1`, `tok-2`, ... and counts exchanges.
struct CountingExchange {
    calls: AtomicU32,
    lifetime: Duration,
}

impl CountingExchange {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            lifetime: Duration::from_secs(3600),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialExchange for CountingExchange {
    async fn exchange(&self, _: &ClientCredentials) -> Result<IssuedCredential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(IssuedCredential {
            token: format!("tok-{n}"),
            lifetime: self.lifetime,
        })
    }
}

/// Always fails with the given error.
struct FailingExchange {
    calls: AtomicU32,
    error: MimirError,
}

#[async_trait]
impl CredentialExchange for FailingExchange {
    async fn exchange(&self, _: &ClientCredentials) -> Result<IssuedCredential> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .jitter(false)
}

fn credentials() -> Option<ClientCredentials> {
    Some(ClientCredentials::new("client-id", "client-secret"))
}

fn manager(exchange: Arc<dyn CredentialExchange>, ttl: Duration) -> CredentialManager {
    CredentialManager::new(
        UpstreamId::Icd,
        credentials(),
        exchange,
        TtlCache::default(),
        fast_retry(),
        ttl,
    )
    .unwrap()
}

#[tokio::test]
async fn credential_is_exchanged_once_and_cached() {
    let exchange = CountingExchange::new();
    let manager = manager(exchange.clone(), Duration::from_secs(60));

    let first = manager.credential().await.unwrap();
    let second = manager.credential().await.unwrap();

    assert_eq!(first.token, "tok-1");
    assert_eq!(second.token, "tok-1");
    assert_eq!(exchange.calls(), 1);
    assert!(manager.is_cached());
}

#[tokio::test]
async fn concurrent_requests_share_one_exchange() {
    let exchange = CountingExchange::new();
    let manager = manager(exchange.clone(), Duration::from_secs(60));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.credential().await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().token, "tok-1");
    }
    assert_eq!(exchange.calls(), 1);
}

#[tokio::test]
async fn credential_refreshes_after_ttl() {
    let exchange = CountingExchange::new();
    let manager = manager(exchange.clone(), Duration::from_millis(150));

    assert_eq!(manager.credential().await.unwrap().token, "tok-1");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!manager.is_cached());
    assert_eq!(manager.credential().await.unwrap().token, "tok-2");
    assert_eq!(exchange.calls(), 2);
}

#[tokio::test]
async fn invalidate_forces_new_exchange() {
    let exchange = CountingExchange::new();
    let manager = manager(exchange.clone(), Duration::from_secs(60));

    manager.credential().await.unwrap();
    manager.invalidate().await;
    assert!(!manager.is_cached());
    assert_eq!(manager.credential().await.unwrap().token, "tok-2");
}

#[tokio::test]
async fn transient_exchange_failure_is_retried_and_not_cached() {
    let exchange = Arc::new(FailingExchange {
        calls: AtomicU32::new(0),
        error: MimirError::Api {
            status: 503,
            message: "token service down".into(),
        },
    });
    let manager = manager(exchange.clone(), Duration::from_secs(60));

    let err = manager.credential().await.unwrap_err();
    assert!(matches!(err, MimirError::Api { status: 503, .. }));
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 3);
    assert!(!manager.is_cached());
}

#[tokio::test]
async fn rejected_client_credentials_are_not_retried() {
    let exchange = Arc::new(FailingExchange {
        calls: AtomicU32::new(0),
        error: MimirError::AuthConfig("invalid_client".into()),
    });
    let manager = manager(exchange.clone(), Duration::from_secs(60));

    let err = manager.credential().await.unwrap_err();
    assert!(matches!(err, MimirError::AuthConfig(_)));
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn blank_credentials_fail_fast() {
    let result = CredentialManager::new(
        UpstreamId::Icd,
        Some(ClientCredentials::new("id", "  ")),
        CountingExchange::new(),
        TtlCache::default(),
        fast_retry(),
        Duration::from_secs(60),
    );
    assert!(matches!(result, Err(MimirError::AuthConfig(_))));
}

fn oauth(server: &MockServer) -> OAuthClientCredentials {
    OAuthClientCredentials::new(
        Arc::new(ReqwestTransport::new().unwrap()),
        format!("{}/connect/token", server.uri()),
        "icdapi_access",
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn oauth_exchange_posts_client_credentials_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("scope=icdapi_access"))
        .and(body_string_contains("client_id=client-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "abc123",
            "expires_in": 3600,
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let issued = oauth(&server)
        .exchange(&ClientCredentials::new("client-id", "client-secret"))
        .await
        .unwrap();
    assert_eq!(issued.token, "abc123");
    assert_eq!(issued.lifetime, Duration::from_secs(3600));
}

#[tokio::test]
async fn oauth_exchange_maps_rejection_and_outage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("client_id=wrong"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": "invalid_client"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("client_id=client-id"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let exchange = oauth(&server);
    let rejected = exchange
        .exchange(&ClientCredentials::new("wrong", "secret"))
        .await
        .unwrap_err();
    assert!(matches!(rejected, MimirError::AuthConfig(_)));

    let outage = exchange
        .exchange(&ClientCredentials::new("client-id", "secret"))
        .await
        .unwrap_err();
    assert!(matches!(outage, MimirError::Api { status: 502, .. }));
}

#[tokio::test]
async fn rejected_bearer_evicts_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entity"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entity"))
        .and(header("Authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let exchange = CountingExchange::new();
    let manager = Arc::new(manager(exchange.clone(), Duration::from_secs(60)));
    let upstream = GovernedUpstream::new(
        UpstreamId::Icd,
        Arc::new(ReqwestTransport::new().unwrap()),
        RateLimiter::new("icd", RateLimit::per_second(10)).unwrap(),
        fast_retry(),
        TtlCache::default(),
        Duration::from_secs(5),
    )
    .with_authorizer(manager.clone());
    let request = HttpRequest::new(format!("{}/entity", server.uri()));

    let err = upstream.call("entity", &request).await.unwrap_err();
    assert!(matches!(err, MimirError::AuthExpired));
    assert!(!manager.is_cached());

    let response = upstream.call("entity", &request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(exchange.calls(), 2);
}
