//! WHO ICD-11 API client.
//!
//! Requests are scoped to one release and linearization (e.g. `2024-01` /
//! `mms`). Entity references come back as absolute URIs such as
//! `http://id.who.int/icd/release/11/2024-01/mms/1435254666/unspecified`;
//! only the trailing entity id is kept and re-resolved against the
//! configured base URL.

use futures_util::future::try_join_all;
use serde::Deserialize;

use super::governed::GovernedUpstream;
use super::join_url;
use super::traits::{HttpRequest, HttpResponse};
use crate::cache::{CacheTtls, TtlClass, normalize_id, normalize_query, request_key};
use crate::types::{self, Direction, IcdEntity, IcdRelative, IcdSearchHit, Lookup};
use crate::{MimirError, Result};

pub const DEFAULT_BASE_URL: &str = "https://id.who.int";
pub const DEFAULT_TOKEN_URL: &str = "https://icdaccessmanagement.who.int/connect/token";
pub const TOKEN_SCOPE: &str = "icdapi_access";
pub const DEFAULT_RELEASE: &str = "2024-01";
pub const DEFAULT_LINEARIZATION: &str = "mms";
const API_VERSION: &str = "v2";
const MAX_LIMIT: usize = 100;

/// Release/linearization the client is pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcdRelease {
    pub base_url: String,
    pub release: String,
    pub linearization: String,
    pub language: String,
}

impl Default for IcdRelease {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            release: DEFAULT_RELEASE.to_string(),
            linearization: DEFAULT_LINEARIZATION.to_string(),
            language: "en".to_string(),
        }
    }
}

/// Client for ICD-11 search, code lookup and hierarchy traversal.
#[derive(Clone)]
pub struct IcdClient {
    upstream: GovernedUpstream,
    release: IcdRelease,
    ttls: CacheTtls,
}

impl IcdClient {
    /// `upstream` is expected to carry the ICD-11 credential authorizer.
    pub fn new(upstream: GovernedUpstream, release: IcdRelease, ttls: CacheTtls) -> Self {
        Self {
            upstream,
            release,
            ttls,
        }
    }

    pub fn upstream(&self) -> &GovernedUpstream {
        &self.upstream
    }

    fn url(&self, path: &str) -> String {
        let root = format!(
            "icd/release/11/{}/{}",
            self.release.release, self.release.linearization
        );
        join_url(&join_url(&self.release.base_url, &root), path)
    }

    fn request(&self, path: &str) -> HttpRequest {
        HttpRequest::new(self.url(path))
            .header("Accept", "application/json")
            .header("Accept-Language", self.release.language.clone())
            .header("API-Version", API_VERSION)
    }

    /// Free-text search over the linearization.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<IcdSearchHit>> {
        let query = normalize_query(query);
        if query.is_empty() {
            return Err(MimirError::InvalidArguments("query must not be empty".into()));
        }
        let limit = limit.clamp(1, MAX_LIMIT);
        let request = self
            .request("search")
            .query("q", &query)
            .query("flatResults", "true")
            .query("highlightingEnabled", "false");
        let key = request_key(&(&query, &self.release.release))?;

        let hits = types::or_empty(
            self.upstream
                .fetch(
                    "search",
                    self.ttls.ttl(TtlClass::Search),
                    key,
                    request,
                    parse_search,
                )
                .await,
        )?;
        Ok(hits.into_iter().take(limit).collect())
    }

    /// Resolve a code such as `5A11` to its entity.
    pub async fn lookup(&self, code: &str) -> Result<Lookup<IcdEntity>> {
        let code = normalize_id(code);
        if code.is_empty() {
            return Err(MimirError::InvalidArguments("code must not be empty".into()));
        }
        if !is_code(&code) {
            return Err(MimirError::InvalidArguments(format!(
                "code must be an ICD-11 code such as 5A11, got {code:?}"
            )));
        }
        let stem = types::lookup(&code, self.stem_id(&code).await)?;
        match stem {
            Lookup::Found(entity_id) => types::lookup(&code, self.entity(&entity_id).await),
            Lookup::NotFound { id } => Ok(Lookup::NotFound { id }),
        }
    }

    /// Parents or children of an entity, resolved to titles.
    pub async fn hierarchy(
        &self,
        entity_id: &str,
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<IcdRelative>> {
        let entity_id = normalize_id(entity_id);
        if entity_id.is_empty() {
            return Err(MimirError::InvalidArguments("entity_id must not be empty".into()));
        }
        if !is_entity_id(&entity_id) {
            return Err(MimirError::InvalidArguments(format!(
                "entity_id must be a numeric ICD-11 entity id, got {entity_id:?}"
            )));
        }
        let limit = limit.clamp(1, MAX_LIMIT);
        let key = request_key(&(&entity_id, direction, limit, &self.release.release))?;

        let client = self.clone();
        let result = self
            .upstream
            .get_or_compute(
                "hierarchy",
                self.ttls.ttl(TtlClass::Structural),
                key,
                move || async move {
                    client
                        .resolve_relatives(&entity_id, direction, limit)
                        .await
                },
            )
            .await;
        types::or_empty(result)
    }

    async fn resolve_relatives(
        &self,
        entity_id: &str,
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<IcdRelative>> {
        let entity = self.entity(entity_id).await?;
        let related = match direction {
            Direction::Parents => &entity.parents,
            Direction::Children => &entity.children,
        };
        let ids = related.iter().filter(|id| is_entity_id(id)).take(limit);
        let resolved = try_join_all(ids.map(|id| async move {
            match self.entity(id).await {
                Ok(e) => Ok(Some(IcdRelative::from(&e))),
                // dangling reference in the upstream tree
                Err(MimirError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        }))
        .await?;
        Ok(resolved.into_iter().flatten().collect())
    }

    async fn stem_id(&self, code: &str) -> Result<String> {
        let request = self.request(&format!("codeinfo/{code}"));
        let key = request_key(&(code, &self.release.release))?;
        self.upstream
            .fetch(
                "codeinfo",
                self.ttls.ttl(TtlClass::Lookup),
                key,
                request,
                parse_codeinfo,
            )
            .await
    }

    async fn entity(&self, entity_id: &str) -> Result<IcdEntity> {
        if !is_entity_id(entity_id) {
            return Err(MimirError::Decode(format!(
                "unexpected ICD-11 entity reference {entity_id:?}"
            )));
        }
        let request = self.request(entity_id);
        let key = request_key(&(entity_id, &self.release.release))?;
        self.upstream
            .fetch(
                "entity",
                self.ttls.ttl(TtlClass::Lookup),
                key,
                request,
                parse_entity,
            )
            .await
    }
}

/// Letters, digits and `.` only, e.g. `5A11` or `1A00.0`.
fn is_code(code: &str) -> bool {
    code.len() <= 32
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
        && code.chars().any(|c| c.is_ascii_alphanumeric())
}

/// A numeric stem, optionally with an `unspecified` or `other` residual.
fn is_entity_id(id: &str) -> bool {
    let (stem, residual) = match id.split_once('/') {
        Some((stem, residual)) => (stem, Some(residual)),
        None => (id, None),
    };
    !stem.is_empty()
        && stem.bytes().all(|b| b.is_ascii_digit())
        && matches!(residual, None | Some("unspecified" | "other"))
}

/// Trailing entity id of an ICD URI, keeping residual-category suffixes.
fn entity_id(uri: &str) -> String {
    let trimmed = uri.trim_end_matches('/');
    let mut segments = trimmed.rsplit('/');
    let last = segments.next().unwrap_or_default();
    match (last, segments.next()) {
        ("unspecified" | "other", Some(stem)) => format!("{stem}/{last}"),
        _ => last.to_string(),
    }
}

#[derive(Deserialize)]
struct LanguageValue {
    #[serde(rename = "@value")]
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSearch {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    destination_entities: Vec<RawSearchEntity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSearchEntity {
    id: String,
    #[serde(default)]
    the_code: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    score: Option<f64>,
}

fn parse_search(response: &HttpResponse) -> Result<Vec<IcdSearchHit>> {
    let raw: RawSearch = response.json()?;
    if raw.error {
        return Err(MimirError::Api {
            status: response.status,
            message: raw
                .error_message
                .unwrap_or_else(|| "icd search reported an error".to_string()),
        });
    }
    Ok(raw
        .destination_entities
        .into_iter()
        .map(|e| IcdSearchHit {
            id: entity_id(&e.id),
            code: e.the_code.filter(|c| !c.is_empty()),
            title: e.title,
            score: e.score,
        })
        .collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCodeInfo {
    stem_id: String,
}

fn parse_codeinfo(response: &HttpResponse) -> Result<String> {
    let raw: RawCodeInfo = response.json()?;
    Ok(entity_id(&raw.stem_id))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntity {
    #[serde(rename = "@id")]
    id: String,
    #[serde(default)]
    code: Option<String>,
    title: LanguageValue,
    #[serde(default)]
    definition: Option<LanguageValue>,
    #[serde(default)]
    class_kind: Option<String>,
    #[serde(default)]
    parent: Vec<String>,
    #[serde(default)]
    child: Vec<String>,
    #[serde(default)]
    browser_url: Option<String>,
}

fn parse_entity(response: &HttpResponse) -> Result<IcdEntity> {
    let raw: RawEntity = response.json()?;
    Ok(IcdEntity {
        id: entity_id(&raw.id),
        code: raw.code.filter(|c| !c.is_empty()),
        title: raw.title.value,
        definition: raw.definition.map(|d| d.value),
        class_kind: raw.class_kind,
        parents: raw.parent.iter().map(|u| entity_id(u)).collect(),
        children: raw.child.iter().map(|u| entity_id(u)).collect(),
        browser_url: raw.browser_url,
    })
}
