use serde::Serialize;

/// An RxNorm concept as returned in concept groups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RxConcept {
    pub rxcui: String,
    pub name: String,
    /// Term type, e.g. `SCD`, `SBD`, `IN`.
    pub tty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synonym: Option<String>,
}

/// Properties of a single RxNorm concept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RxProperties {
    pub rxcui: String,
    pub name: String,
    pub tty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synonym: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress: Option<String>,
}
