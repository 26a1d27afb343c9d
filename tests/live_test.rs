//! Live integration tests - ignored by default, run with:
//! `cargo test --test live_test -- --ignored`
//!
//! The ICD-11 test additionally needs `ICD_CLIENT_ID` and `ICD_CLIENT_SECRET`.

use mimir::upstream::ClientCredentials;
use mimir::{Lookup, MeshMatch, Mimir};
use serde_json::json;

#[tokio::test]
#[ignore]
async fn test_live_rxnorm_lookup() {
    let gateway = Mimir::builder().build().expect("Failed to build gateway");

    let props = gateway.rxnorm().lookup("1191").await.expect("Lookup failed");
    match props {
        Lookup::Found(p) => assert_eq!(p.name.to_lowercase(), "aspirin"),
        other => panic!("expected aspirin, got {other:?}"),
    }
}

#[tokio::test]
#[ignore]
async fn test_live_loinc_search() {
    let gateway = Mimir::builder().build().expect("Failed to build gateway");

    let result = gateway.loinc().search("glucose", 5).await.expect("Search failed");
    assert!(result.total > 0);
    assert!(!result.items.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_live_mesh_search() {
    let gateway = Mimir::builder().build().expect("Failed to build gateway");

    let hits = gateway
        .mesh()
        .search("diabetes mellitus", MeshMatch::Exact, 5)
        .await
        .expect("Search failed");
    assert!(hits.iter().any(|h| h.id == "D003920"), "got {hits:?}");
}

#[tokio::test]
#[ignore]
async fn test_live_snomed_via_dispatch() {
    let gateway = Mimir::builder().build().expect("Failed to build gateway");

    let result = gateway
        .invoke("snomed_lookup", json!({"concept_id": "73211009"}))
        .await
        .expect("Lookup failed");
    assert_eq!(result["status"], "found");
}

#[tokio::test]
#[ignore]
async fn test_live_icd_search() {
    let client_id = std::env::var("ICD_CLIENT_ID").expect("ICD_CLIENT_ID must be set for live tests");
    let client_secret =
        std::env::var("ICD_CLIENT_SECRET").expect("ICD_CLIENT_SECRET must be set for live tests");

    let gateway = Mimir::builder()
        .icd_credentials(ClientCredentials::new(client_id, client_secret))
        .build()
        .expect("Failed to build gateway");

    let hits = gateway
        .icd()
        .expect("ICD enabled")
        .search("type 2 diabetes", 5)
        .await
        .expect("Search failed");
    assert!(hits.iter().any(|h| h.code.as_deref() == Some("5A11")), "got {hits:?}");
}
