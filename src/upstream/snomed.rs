//! SNOMED CT via a Snowstorm terminology server.

use serde::Deserialize;

use super::governed::GovernedUpstream;
use super::join_url;
use super::traits::{HttpRequest, HttpResponse};
use crate::cache::{CacheTtls, TtlClass, normalize_id, normalize_query, request_key};
use crate::types::{self, Direction, Lookup, SnomedConcept, SnomedEclResult};
use crate::{MimirError, Result};

pub const DEFAULT_BASE_URL: &str = "https://snowstorm.ihtsdotools.org/snowstorm/snomed-ct";
pub const DEFAULT_BRANCH: &str = "MAIN";
const MAX_LIMIT: usize = 200;

#[derive(Clone)]
pub struct SnomedClient {
    upstream: GovernedUpstream,
    base_url: String,
    branch: String,
    ttls: CacheTtls,
}

impl SnomedClient {
    pub fn new(
        upstream: GovernedUpstream,
        base_url: impl Into<String>,
        branch: impl Into<String>,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            upstream,
            base_url: base_url.into(),
            branch: branch.into(),
            ttls,
        }
    }

    pub fn upstream(&self) -> &GovernedUpstream {
        &self.upstream
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn request(&self, path: &str) -> HttpRequest {
        HttpRequest::new(join_url(&self.base_url, path))
            .header("Accept", "application/json")
            .header("Accept-Language", "en")
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        active_only: bool,
    ) -> Result<Vec<SnomedConcept>> {
        let query = normalize_query(query);
        if query.len() < 3 {
            return Err(MimirError::InvalidArguments(
                "query must be at least 3 characters".into(),
            ));
        }
        let limit = limit.clamp(1, MAX_LIMIT);
        let key = request_key(&(&self.branch, &query, limit, active_only))?;
        let mut request = self
            .request(&format!("{}/concepts", self.branch))
            .query("term", &query)
            .query("limit", limit);
        if active_only {
            request = request.query("activeFilter", "true");
        }
        let page = types::or_empty(
            self.upstream
                .fetch(
                    "search",
                    self.ttls.ttl(TtlClass::Search),
                    key,
                    request,
                    |r| parse_page(r).map(|p| p.concepts),
                )
                .await,
        )?;
        Ok(page)
    }

    pub async fn lookup(&self, concept_id: &str) -> Result<Lookup<SnomedConcept>> {
        let concept_id = validated_sctid(concept_id)?;
        let key = request_key(&(&self.branch, &concept_id))?;
        let request = self.request(&format!("{}/concepts/{concept_id}", self.branch));
        let result = self
            .upstream
            .fetch(
                "lookup",
                self.ttls.ttl(TtlClass::Lookup),
                key,
                request,
                parse_concept,
            )
            .await;
        types::lookup(&concept_id, result)
    }

    /// Inferred parents or children of a concept.
    pub async fn hierarchy(
        &self,
        concept_id: &str,
        direction: Direction,
    ) -> Result<Vec<SnomedConcept>> {
        let concept_id = validated_sctid(concept_id)?;
        let key = request_key(&(&self.branch, &concept_id, direction))?;
        let request = self
            .request(&format!(
                "browser/{}/concepts/{concept_id}/{}",
                self.branch,
                direction.as_str()
            ))
            .query("form", "inferred");
        types::or_empty(
            self.upstream
                .fetch(
                    "hierarchy",
                    self.ttls.ttl(TtlClass::Structural),
                    key,
                    request,
                    parse_concept_list,
                )
                .await,
        )
    }

    /// Evaluate an Expression Constraint Language query, e.g.
    /// `<< 73211009 |Diabetes mellitus|`.
    pub async fn ecl(&self, expression: &str, limit: usize) -> Result<SnomedEclResult> {
        let expression = expression.split_whitespace().collect::<Vec<_>>().join(" ");
        if expression.is_empty() {
            return Err(MimirError::InvalidArguments(
                "expression must not be empty".into(),
            ));
        }
        let limit = limit.clamp(1, MAX_LIMIT);
        let key = request_key(&(&self.branch, &expression, limit))?;
        let request = self
            .request(&format!("{}/concepts", self.branch))
            .query("ecl", &expression)
            .query("limit", limit);
        self.upstream
            .fetch(
                "ecl",
                self.ttls.ttl(TtlClass::Search),
                key,
                request,
                parse_page,
            )
            .await
    }
}

/// SNOMED identifiers are 6 to 18 digits.
fn validated_sctid(id: &str) -> Result<String> {
    let id = normalize_id(id);
    if !(6..=18).contains(&id.len()) || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(MimirError::InvalidArguments(format!(
            "invalid SNOMED CT concept id {id:?}"
        )));
    }
    Ok(id)
}

#[derive(Deserialize)]
struct RawTerm {
    term: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConcept {
    concept_id: String,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    fsn: Option<RawTerm>,
    #[serde(default)]
    pt: Option<RawTerm>,
    #[serde(default)]
    definition_status: Option<String>,
    #[serde(default)]
    module_id: Option<String>,
}

fn default_active() -> bool {
    true
}

impl From<RawConcept> for SnomedConcept {
    fn from(raw: RawConcept) -> Self {
        Self {
            concept_id: raw.concept_id,
            active: raw.active,
            fsn: raw.fsn.map(|t| t.term),
            preferred_term: raw.pt.map(|t| t.term),
            definition_status: raw.definition_status,
            module_id: raw.module_id,
        }
    }
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(default)]
    items: Vec<RawConcept>,
    #[serde(default)]
    total: Option<u64>,
}

fn parse_page(response: &HttpResponse) -> Result<SnomedEclResult> {
    let raw: RawPage = response.json()?;
    let concepts: Vec<SnomedConcept> = raw.items.into_iter().map(SnomedConcept::from).collect();
    Ok(SnomedEclResult {
        total: raw.total.unwrap_or(concepts.len() as u64),
        concepts,
    })
}

fn parse_concept(response: &HttpResponse) -> Result<SnomedConcept> {
    let raw: RawConcept = response.json()?;
    Ok(raw.into())
}

fn parse_concept_list(response: &HttpResponse) -> Result<Vec<SnomedConcept>> {
    let raw: Vec<RawConcept> = response.json()?;
    Ok(raw.into_iter().map(SnomedConcept::from).collect())
}
