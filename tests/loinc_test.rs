//! LOINC client against a mock Clinical Tables endpoint.

use std::time::Duration;

use mimir::{Lookup, Mimir, MimirError, RetryPolicy, TerminologyGateway, UpstreamId};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .jitter(false)
}

fn gateway(server: &MockServer) -> TerminologyGateway {
    Mimir::builder()
        .base_url(UpstreamId::Loinc, server.uri())
        .retry_policy(fast_retry())
        .build()
        .expect("gateway builds")
}

fn glucose_page() -> serde_json::Value {
    json!([
        2,
        ["2345-7", "2339-0"],
        null,
        [
            ["2345-7", "Glucose [Mass/volume] in Serum or Plasma", "Glucose", "Ser/Plas"],
            ["2339-0", "Glucose [Mass/volume] in Blood", "Glucose", "Bld"]
        ]
    ])
}

#[tokio::test]
async fn test_search_parses_positional_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("terms", "glucose"))
        .and(query_param("maxList", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(glucose_page()))
        .mount(&server)
        .await;

    let result = gateway(&server).loinc().search("Glucose", 10).await.unwrap();

    assert_eq!(result.total, 2);
    assert_eq!(result.items.len(), 2);
    assert_eq!(result.items[0].code, "2345-7");
    assert_eq!(result.items[0].component.as_deref(), Some("Glucose"));
    assert_eq!(result.items[1].system.as_deref(), Some("Bld"));
}

#[tokio::test]
async fn test_repeated_search_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(glucose_page()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let first = gateway.loinc().search("glucose", 10).await.unwrap();
    // differently spelled, same normalized query
    let second = gateway.loinc().search("  GLUCOSE ", 10).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_lookup_matches_exact_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("terms", "2339-0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(glucose_page()))
        .mount(&server)
        .await;

    let item = gateway(&server).loinc().lookup("2339-0").await.unwrap();

    match item {
        Lookup::Found(item) => {
            assert_eq!(item.code, "2339-0");
            assert_eq!(item.long_common_name, "Glucose [Mass/volume] in Blood");
        }
        other => panic!("expected found, got {other:?}"),
    }
}

#[tokio::test]
async fn test_lookup_without_exact_match_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([0, [], null, []])))
        .mount(&server)
        .await;

    let item = gateway(&server).loinc().lookup("9999-9").await.unwrap();
    assert_eq!(
        item,
        Lookup::NotFound {
            id: "9999-9".to_string()
        }
    );
}

#[tokio::test]
async fn test_server_error_retried_until_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(3)
        .mount(&server)
        .await;

    let err = gateway(&server).loinc().search("glucose", 10).await.unwrap_err();
    assert!(matches!(err, MimirError::Api { status: 500, .. }), "{err:?}");
}

#[tokio::test]
async fn test_failed_search_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(400))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    assert!(gateway.loinc().search("glucose", 10).await.is_err());
    assert!(gateway.loinc().search("glucose", 10).await.is_err());
}

#[tokio::test]
async fn test_rate_limited_response_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(glucose_page()))
        .expect(1)
        .mount(&server)
        .await;

    let result = gateway(&server).loinc().search("glucose", 10).await.unwrap();
    assert_eq!(result.total, 2);
}

#[tokio::test]
async fn test_abandoned_request_still_populates_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(glucose_page())
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let gave_up =
        tokio::time::timeout(Duration::from_millis(50), gateway.loinc().search("glucose", 10))
            .await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let result = gateway.loinc().search("glucose", 10).await.unwrap();
    assert_eq!(result.total, 2);
}

#[tokio::test]
async fn test_empty_query_is_rejected_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = gateway(&server).loinc().search("   ", 10).await.unwrap_err();
    assert!(matches!(err, MimirError::InvalidArguments(_)));
}
