//! Cache key composition.
//!
//! A [`CacheKey`] is a `(namespace, key)` pair compared structurally, so two
//! namespaces can never produce the same key no matter what characters the
//! logical key contains. Upstream clients build keys with [`request_key`]
//! from their normalized parameters.

use std::fmt;

use serde::Serialize;

use crate::Result;

/// Composite identity of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    key: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

/// Derive a deterministic key from already-normalized request parameters.
///
/// Parameters are JSON-encoded (typically a tuple), which quotes and escapes
/// every field, so `("a|b", 1)` and `("a", "b|1")` can never collide.
pub fn request_key<P: Serialize + ?Sized>(params: &P) -> Result<String> {
    Ok(serde_json::to_string(params)?)
}

/// Normalize a free-text query: trim, collapse inner whitespace, lower-case.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize an identifier: trim only (codes are case-sensitive upstream).
pub fn normalize_id(id: &str) -> String {
    id.trim().to_string()
}
