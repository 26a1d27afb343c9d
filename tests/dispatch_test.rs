//! Named-operation dispatch through `TerminologyGateway::invoke`.

use std::time::Duration;

use mimir::{ErrorCode, Mimir, MimirError, Operation, RetryPolicy, UpstreamId, error_body};
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn code_of(result: mimir::Result<Value>) -> ErrorCode {
    result.expect_err("operation should fail").code()
}

#[tokio::test]
async fn test_operations_cover_every_upstream() {
    let gateway = Mimir::builder().build().unwrap();
    let ops = gateway.operations();

    assert_eq!(ops.len(), 15);
    for id in UpstreamId::ALL {
        assert!(ops.iter().any(|op| op.upstream == id), "{id} has no operations");
    }
    let search = ops.iter().find(|op| op.name == "snomed_search").unwrap();
    assert_eq!(search.input_schema["required"], json!(["query"]));
    assert_eq!(search.input_schema["additionalProperties"], json!(false));
}

#[tokio::test]
async fn test_unknown_operation() {
    let gateway = Mimir::builder().build().unwrap();
    let err = gateway.invoke("umls_search", json!({})).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownOperation);

    let body = error_body(&err);
    assert_eq!(body["error"]["code"], "UNKNOWN_OPERATION");
    assert!(body["error"]["message"].as_str().unwrap().contains("umls_search"));
}

#[tokio::test]
async fn test_invalid_arguments_never_reach_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = Mimir::builder()
        .base_url(UpstreamId::Loinc, server.uri())
        .base_url(UpstreamId::Snomed, server.uri())
        .build()
        .unwrap();

    let cases = [
        ("loinc_search", json!({})),
        ("loinc_search", json!({"query": 42})),
        ("loinc_search", json!({"query": "glucose", "limit": 0})),
        ("loinc_search", json!({"query": "glucose", "limit": 101})),
        ("loinc_search", json!({"query": "glucose", "verbose": true})),
        ("snomed_hierarchy", json!({"concept_id": "73211009", "direction": "sideways"})),
        ("snomed_lookup", json!({"concept_id": "12"})),
        ("rxnorm_lookup", json!({"rxcui": "not-a-number"})),
        ("mesh_search", json!({"query": "asthma", "limit": 51})),
    ];
    for (name, args) in cases {
        assert_eq!(
            code_of(gateway.invoke(name, args.clone()).await),
            ErrorCode::InvalidArguments,
            "{name} {args}"
        );
    }
}

#[tokio::test]
async fn test_icd_without_credentials_reports_auth_config() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/MAIN/concepts"))
        .and(query_param("term", "asthma"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "total": 0})))
        .mount(&server)
        .await;

    let gateway = Mimir::builder()
        .base_url(UpstreamId::Snomed, server.uri())
        .build()
        .unwrap();

    for op in [Operation::IcdSearch, Operation::IcdLookup, Operation::IcdHierarchy] {
        let args = match op {
            Operation::IcdSearch => json!({"query": "asthma"}),
            Operation::IcdLookup => json!({"code": "CA23"}),
            _ => json!({"entity_id": "123"}),
        };
        assert_eq!(
            code_of(gateway.invoke_operation(op, args).await),
            ErrorCode::AuthConfigError
        );
    }

    let other = gateway
        .invoke("snomed_search", json!({"query": "asthma"}))
        .await
        .unwrap();
    assert_eq!(other, json!([]));
}

#[tokio::test]
async fn test_lookup_encodes_found_and_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rxcui/1191/properties.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "properties": {"rxcui": "1191", "name": "aspirin", "tty": "IN"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rxcui/2/properties.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let gateway = Mimir::builder()
        .base_url(UpstreamId::RxNorm, server.uri())
        .build()
        .unwrap();

    let found = gateway
        .invoke("rxnorm_lookup", json!({"rxcui": "1191"}))
        .await
        .unwrap();
    assert_eq!(found["status"], "found");
    assert_eq!(found["result"]["name"], "aspirin");

    let missing = gateway
        .invoke("rxnorm_lookup", json!({"rxcui": "2"}))
        .await
        .unwrap();
    assert_eq!(missing, json!({"status": "not_found", "result": {"id": "2"}}));
}

#[tokio::test]
async fn test_null_arguments_use_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rxcui/1191/related.json"))
        .and(query_param("tty", "BN IN SBD SCD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"relatedGroup": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Mimir::builder()
        .base_url(UpstreamId::RxNorm, server.uri())
        .build()
        .unwrap();

    let related = gateway
        .invoke("rxnorm_related", json!({"rxcui": "1191", "term_types": []}))
        .await
        .unwrap();
    assert_eq!(related, json!([]));

    let err = gateway.invoke("rxnorm_related", Value::Null).await.unwrap_err();
    assert!(matches!(err, MimirError::InvalidArguments(_)));
}

#[tokio::test]
async fn test_upstream_errors_keep_their_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = Mimir::builder()
        .base_url(UpstreamId::Loinc, server.uri())
        .retry_policy(
            RetryPolicy::new()
                .max_retries(1)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5)),
        )
        .build()
        .unwrap();

    let err = gateway
        .invoke("loinc_search", json!({"query": "glucose"}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::RateLimit);
    assert_eq!(error_body(&err)["error"]["code"], "RATE_LIMIT");
}
