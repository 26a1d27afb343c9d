//! MeSH via the NLM linked-data API (`id.nlm.nih.gov/mesh`).

use std::collections::BTreeMap;

use serde::Deserialize;

use super::governed::GovernedUpstream;
use super::join_url;
use super::traits::{HttpRequest, HttpResponse};
use crate::cache::{CacheTtls, TtlClass, normalize_id, normalize_query, request_key};
use crate::types::{
    self, Lookup, MeshDescriptor, MeshDescriptorHit, MeshMatch, MeshQualifier, MeshTerm,
    SparqlResult,
};
use crate::{MimirError, Result};

pub const DEFAULT_BASE_URL: &str = "https://id.nlm.nih.gov/mesh";
const MAX_LIMIT: usize = 50;
const MAX_SPARQL_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct MeshClient {
    upstream: GovernedUpstream,
    base_url: String,
    ttls: CacheTtls,
}

impl MeshClient {
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

    /// Descriptors whose label matches `query`.
    pub async fn search(
        &self,
        query: &str,
        match_mode: MeshMatch,
        limit: usize,
    ) -> Result<Vec<MeshDescriptorHit>> {
        let query = normalize_query(query);
        if query.is_empty() {
            return Err(MimirError::InvalidArguments("query must not be empty".into()));
        }
        let limit = limit.clamp(1, MAX_LIMIT);
        let key = request_key(&(&query, match_mode, limit))?;
        let request = self
            .request("lookup/descriptor")
            .query("label", &query)
            .query("match", match_mode.as_str())
            .query("limit", limit);
        types::or_empty(
            self.upstream
                .fetch(
                    "search",
                    self.ttls.ttl(TtlClass::Search),
                    key,
                    request,
                    parse_descriptor_hits,
                )
                .await,
        )
    }

    /// Details of a descriptor such as `D003920`.
    pub async fn lookup(&self, descriptor_id: &str) -> Result<Lookup<MeshDescriptor>> {
        let id = normalize_id(descriptor_id).to_uppercase();
        if id.is_empty() {
            return Err(MimirError::InvalidArguments(
                "descriptor_id must not be empty".into(),
            ));
        }
        let key = request_key(&id)?;
        let request = self.request("lookup/details").query("descriptor", &id);
        let result = self
            .upstream
            .fetch(
                "lookup",
                self.ttls.ttl(TtlClass::Lookup),
                key,
                request,
                parse_details,
            )
            .await;
        types::lookup(&id, result)
    }

    /// Run a SPARQL query against the MeSH endpoint.
    ///
    /// The query text is cached verbatim (only trimmed), since SPARQL
    /// literals are case-sensitive.
    pub async fn sparql(&self, query: &str, limit: usize) -> Result<SparqlResult> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(MimirError::InvalidArguments("query must not be empty".into()));
        }
        let limit = limit.clamp(1, MAX_SPARQL_LIMIT);
        let key = request_key(&(&query, limit))?;
        let request = HttpRequest::new(join_url(&self.base_url, "sparql"))
            .header("Accept", "application/sparql-results+json")
            .query("query", &query)
            .query("format", "JSON")
            .query("limit", limit)
            .query("inference", "true");
        self.upstream
            .fetch(
                "sparql",
                self.ttls.ttl(TtlClass::Search),
                key,
                request,
                parse_sparql,
            )
            .await
    }
}

/// `http://id.nlm.nih.gov/mesh/D003920` → `D003920`.
fn resource_id(uri: &str) -> String {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(uri)
        .to_string()
}

#[derive(Deserialize)]
struct RawResource {
    resource: String,
    label: String,
}

fn parse_descriptor_hits(response: &HttpResponse) -> Result<Vec<MeshDescriptorHit>> {
    let raw: Vec<RawResource> = response.json()?;
    Ok(raw
        .into_iter()
        .map(|r| MeshDescriptorHit {
            id: resource_id(&r.resource),
            label: r.label,
            resource: r.resource,
        })
        .collect())
}

#[derive(Deserialize)]
struct RawDetails {
    #[serde(default)]
    descriptor: Option<String>,
    #[serde(default)]
    terms: Vec<RawTerm>,
    #[serde(default)]
    qualifiers: Vec<RawResource>,
}

#[derive(Deserialize)]
struct RawTerm {
    label: String,
    #[serde(default)]
    preferred: bool,
}

/// Unknown descriptors come back as HTTP 200 with no terms.
fn parse_details(response: &HttpResponse) -> Result<MeshDescriptor> {
    let raw: RawDetails = response.json()?;
    let resource = match raw.descriptor {
        Some(uri) if !raw.terms.is_empty() => uri,
        _ => return Err(MimirError::NotFound("mesh descriptor".into())),
    };
    let label = raw
        .terms
        .iter()
        .find(|t| t.preferred)
        .or_else(|| raw.terms.first())
        .map(|t| t.label.clone())
        .unwrap_or_default();

    Ok(MeshDescriptor {
        id: resource_id(&resource),
        label,
        resource,
        terms: raw
            .terms
            .into_iter()
            .map(|t| MeshTerm {
                label: t.label,
                preferred: t.preferred,
            })
            .collect(),
        qualifiers: raw
            .qualifiers
            .into_iter()
            .map(|q| MeshQualifier {
                id: resource_id(&q.resource),
                label: q.label,
            })
            .collect(),
    })
}

#[derive(Deserialize)]
struct RawSparql {
    head: RawSparqlHead,
    results: RawSparqlResults,
}

#[derive(Deserialize)]
struct RawSparqlHead {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Deserialize)]
struct RawSparqlResults {
    #[serde(default)]
    bindings: Vec<BTreeMap<String, RawBinding>>,
}

#[derive(Deserialize)]
struct RawBinding {
    value: String,
}

fn parse_sparql(response: &HttpResponse) -> Result<SparqlResult> {
    let raw: RawSparql = response.json()?;
    Ok(SparqlResult {
        vars: raw.head.vars,
        rows: raw
            .results
            .bindings
            .into_iter()
            .map(|row| row.into_iter().map(|(k, v)| (k, v.value)).collect())
            .collect(),
    })
}
