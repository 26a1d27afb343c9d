use serde::Serialize;

/// A LOINC term.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoincItem {
    /// LOINC number, e.g. `2345-7`.
    pub code: String,
    pub long_common_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Specimen or system, e.g. `Ser/Plas`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// A page of LOINC matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoincSearchResult {
    /// Total matches reported upstream, which may exceed `items.len()`.
    pub total: u64,
    pub items: Vec<LoincItem>,
}
