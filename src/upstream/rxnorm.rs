//! RxNorm via the NLM RxNav REST API.

use serde::Deserialize;

use super::governed::GovernedUpstream;
use super::join_url;
use super::traits::{HttpRequest, HttpResponse};
use crate::cache::{CacheTtls, TtlClass, normalize_id, normalize_query, request_key};
use crate::types::{self, Lookup, RxConcept, RxProperties};
use crate::{MimirError, Result};

pub const DEFAULT_BASE_URL: &str = "https://rxnav.nlm.nih.gov/REST";

/// Term types returned by `related` when none are requested.
pub const DEFAULT_RELATED_TTYS: [&str; 4] = ["IN", "BN", "SCD", "SBD"];

#[derive(Clone)]
pub struct RxNormClient {
    upstream: GovernedUpstream,
    base_url: String,
    ttls: CacheTtls,
}

impl RxNormClient {
    pub fn new(upstream: GovernedUpstream, base_url: impl Into<String>, ttls: CacheTtls) -> Self {
        Self {
            upstream,
            base_url: base_url.into(),
            ttls,
        }
    }

    pub fn upstream(&self) -> &GovernedUpstream {
        &self.upstream
    }

    fn request(&self, path: &str) -> HttpRequest {
        HttpRequest::new(join_url(&self.base_url, path)).header("Accept", "application/json")
    }

    /// Drug concepts matching `name`, across all term types.
    pub async fn search(&self, name: &str) -> Result<Vec<RxConcept>> {
        let name = normalize_query(name);
        if name.is_empty() {
            return Err(MimirError::InvalidArguments("name must not be empty".into()));
        }
        let key = request_key(&name)?;
        let request = self.request("drugs.json").query("name", &name);
        types::or_empty(
            self.upstream
                .fetch(
                    "search",
                    self.ttls.ttl(TtlClass::Search),
                    key,
                    request,
                    parse_drug_group,
                )
                .await,
        )
    }

    pub async fn lookup(&self, rxcui: &str) -> Result<Lookup<RxProperties>> {
        let rxcui = validated_rxcui(rxcui)?;
        let key = request_key(&rxcui)?;
        let request = self.request(&format!("rxcui/{rxcui}/properties.json"));
        let result = self
            .upstream
            .fetch(
                "lookup",
                self.ttls.ttl(TtlClass::Lookup),
                key,
                request,
                parse_properties,
            )
            .await;
        types::lookup(&rxcui, result)
    }

    /// Concepts related to `rxcui`, restricted to `term_types`.
    pub async fn related(&self, rxcui: &str, term_types: &[String]) -> Result<Vec<RxConcept>> {
        let rxcui = validated_rxcui(rxcui)?;
        let mut ttys: Vec<String> = if term_types.is_empty() {
            DEFAULT_RELATED_TTYS.iter().map(|t| t.to_string()).collect()
        } else {
            term_types.iter().map(|t| t.trim().to_uppercase()).collect()
        };
        ttys.sort();
        ttys.dedup();

        let key = request_key(&(&rxcui, &ttys))?;
        let request = self
            .request(&format!("rxcui/{rxcui}/related.json"))
            .query("tty", ttys.join(" "));
        types::or_empty(
            self.upstream
                .fetch(
                    "related",
                    self.ttls.ttl(TtlClass::Structural),
                    key,
                    request,
                    parse_related_group,
                )
                .await,
        )
    }
}

fn validated_rxcui(rxcui: &str) -> Result<String> {
    let rxcui = normalize_id(rxcui);
    if rxcui.is_empty() || !rxcui.chars().all(|c| c.is_ascii_digit()) {
        return Err(MimirError::InvalidArguments(format!(
            "rxcui must be numeric, got {rxcui:?}"
        )));
    }
    Ok(rxcui)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConceptGroup {
    #[serde(default)]
    concept_properties: Vec<RawConcept>,
}

#[derive(Deserialize)]
struct RawConcept {
    rxcui: String,
    name: String,
    #[serde(default)]
    tty: String,
    #[serde(default)]
    synonym: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    suppress: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

impl From<RawConcept> for RxConcept {
    fn from(raw: RawConcept) -> Self {
        Self {
            rxcui: raw.rxcui,
            name: raw.name,
            tty: raw.tty,
            synonym: non_empty(raw.synonym),
        }
    }
}

fn flatten_groups(groups: Vec<RawConceptGroup>) -> Vec<RxConcept> {
    groups
        .into_iter()
        .flat_map(|g| g.concept_properties)
        .map(RxConcept::from)
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDrugResponse {
    #[serde(default)]
    drug_group: Option<RawGroupWrapper>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRelatedResponse {
    #[serde(default)]
    related_group: Option<RawGroupWrapper>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroupWrapper {
    #[serde(default)]
    concept_group: Vec<RawConceptGroup>,
}

fn parse_drug_group(response: &HttpResponse) -> Result<Vec<RxConcept>> {
    let raw: RawDrugResponse = response.json()?;
    Ok(raw
        .drug_group
        .map(|g| flatten_groups(g.concept_group))
        .unwrap_or_default())
}

fn parse_related_group(response: &HttpResponse) -> Result<Vec<RxConcept>> {
    let raw: RawRelatedResponse = response.json()?;
    Ok(raw
        .related_group
        .map(|g| flatten_groups(g.concept_group))
        .unwrap_or_default())
}

#[derive(Deserialize)]
struct RawPropertiesResponse {
    #[serde(default)]
    properties: Option<RawConcept>,
}

/// RxNav answers unknown ids with `{}` and HTTP 200.
fn parse_properties(response: &HttpResponse) -> Result<RxProperties> {
    let raw: RawPropertiesResponse = response.json()?;
    let props = raw
        .properties
        .ok_or_else(|| MimirError::NotFound(response_hint(response)))?;
    Ok(RxProperties {
        rxcui: props.rxcui,
        name: props.name,
        tty: props.tty,
        synonym: non_empty(props.synonym),
        language: non_empty(props.language),
        suppress: non_empty(props.suppress),
    })
}

fn response_hint(response: &HttpResponse) -> String {
    format!("rxnorm properties (HTTP {}, empty body)", response.status)
}
