//! LOINC via the NLM Clinical Tables search service.
//!
//! The service answers with a positional JSON array:
//! `[total, [codes...], extra, [[display fields...], ...]]`, where the
//! display fields follow the `df` request parameter.

use serde_json::Value;

use super::governed::GovernedUpstream;
use super::join_url;
use super::traits::{HttpRequest, HttpResponse};
use crate::cache::{CacheTtls, TtlClass, normalize_id, normalize_query, request_key};
use crate::types::{self, LoincItem, LoincSearchResult, Lookup};
use crate::{MimirError, Result};

pub const DEFAULT_BASE_URL: &str = "https://clinicaltables.nlm.nih.gov/api/loinc_items/v3";
const DISPLAY_FIELDS: &str = "LOINC_NUM,LONG_COMMON_NAME,COMPONENT,SYSTEM";
const MAX_LIMIT: usize = 500;
/// Candidates fetched when looking a code up through the search endpoint.
const LOOKUP_CANDIDATES: usize = 25;

#[derive(Clone)]
pub struct LoincClient {
    upstream: GovernedUpstream,
    base_url: String,
    ttls: CacheTtls,
}

impl LoincClient {
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

    fn request(&self, terms: &str, max_list: usize) -> HttpRequest {
        HttpRequest::new(join_url(&self.base_url, "search"))
            .header("Accept", "application/json")
            .query("terms", terms)
            .query("maxList", max_list)
            .query("df", DISPLAY_FIELDS)
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<LoincSearchResult> {
        let query = normalize_query(query);
        if query.is_empty() {
            return Err(MimirError::InvalidArguments("query must not be empty".into()));
        }
        let limit = limit.clamp(1, MAX_LIMIT);
        let key = request_key(&(&query, limit))?;
        let result = self
            .upstream
            .fetch(
                "search",
                self.ttls.ttl(TtlClass::Search),
                key,
                self.request(&query, limit),
                parse_search,
            )
            .await;
        match result {
            Err(MimirError::NotFound(_)) => Ok(LoincSearchResult {
                total: 0,
                items: Vec::new(),
            }),
            other => other,
        }
    }

    /// Exact lookup of a LOINC number such as `2345-7`.
    pub async fn lookup(&self, code: &str) -> Result<Lookup<LoincItem>> {
        let code = normalize_id(code);
        if code.is_empty() {
            return Err(MimirError::InvalidArguments("code must not be empty".into()));
        }
        let key = request_key(&code)?;
        let result = self
            .upstream
            .fetch(
                "lookup",
                self.ttls.ttl(TtlClass::Lookup),
                key,
                self.request(&code, LOOKUP_CANDIDATES),
                parse_search,
            )
            .await
            .and_then(|page| {
                page.items
                    .into_iter()
                    .find(|item| item.code.eq_ignore_ascii_case(&code))
                    .ok_or_else(|| MimirError::NotFound(code.clone()))
            });
        types::lookup(&code, result)
    }
}

fn field(row: &[Value], index: usize) -> Option<String> {
    row.get(index)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_search(response: &HttpResponse) -> Result<LoincSearchResult> {
    let body: Value = response.json()?;
    let parts = body
        .as_array()
        .ok_or_else(|| MimirError::Decode("loinc response is not an array".into()))?;
    let total = parts.first().and_then(Value::as_u64).unwrap_or(0);
    let rows: &[Value] = match parts.get(3) {
        Some(Value::Array(rows)) => rows.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => {
            return Err(MimirError::Decode(
                "loinc display rows are not an array".into(),
            ));
        }
    };

    let items = rows
        .iter()
        .filter_map(Value::as_array)
        .filter_map(|row| {
            Some(LoincItem {
                code: field(row, 0)?,
                long_common_name: field(row, 1).unwrap_or_default(),
                component: field(row, 2),
                system: field(row, 3),
            })
        })
        .collect();
    Ok(LoincSearchResult { total, items })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_array() {
        let body = r#"[2, ["2345-7", "2339-0"], null, [
            ["2345-7", "Glucose [Mass/volume] in Serum or Plasma", "Glucose", "Ser/Plas"],
            ["2339-0", "Glucose [Mass/volume] in Blood", "Glucose", ""]
        ]]"#;
        let page = parse_search(&HttpResponse::new(200, body)).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].system.as_deref(), Some("Ser/Plas"));
        assert_eq!(page.items[1].system, None);
    }

    #[test]
    fn empty_result() {
        let page = parse_search(&HttpResponse::new(200, "[0, [], null, []]")).unwrap();
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }

    #[test]
    fn rejects_non_array() {
        assert!(matches!(
            parse_search(&HttpResponse::new(200, "{}")),
            Err(MimirError::Decode(_))
        ));
    }
}
