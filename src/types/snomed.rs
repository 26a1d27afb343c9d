use serde::Serialize;

/// A SNOMED CT concept summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnomedConcept {
    pub concept_id: String,
    pub active: bool,
    /// Fully specified name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fsn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
}

/// Concepts matched by an ECL expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnomedEclResult {
    /// Total matches upstream, which may exceed `concepts.len()`.
    pub total: u64,
    pub concepts: Vec<SnomedConcept>,
}
