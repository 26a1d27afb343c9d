use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How MeSH label lookup matches the query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshMatch {
    Exact,
    #[default]
    Contains,
    StartsWith,
}

impl MeshMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::StartsWith => "startswith",
        }
    }
}

/// A descriptor label match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshDescriptorHit {
    /// Descriptor UI, e.g. `D003920`.
    pub id: String,
    pub label: String,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshTerm {
    pub label: String,
    pub preferred: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshQualifier {
    pub id: String,
    pub label: String,
}

/// Descriptor details.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshDescriptor {
    pub id: String,
    /// Label of the preferred term.
    pub label: String,
    pub resource: String,
    pub terms: Vec<MeshTerm>,
    pub qualifiers: Vec<MeshQualifier>,
}

/// Tabular SPARQL results, one map of variable to value per row.
///
/// Unbound variables are absent from a row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparqlResult {
    pub vars: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}
