use serde::Serialize;

/// One ICD-11 search match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IcdSearchHit {
    /// Foundation/linearization entity id (numeric string).
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A resolved ICD-11 linearization entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IcdEntity {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_kind: Option<String>,
    /// Parent entity ids.
    pub parents: Vec<String>,
    /// Child entity ids.
    pub children: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_url: Option<String>,
}

/// A neighbour in the ICD-11 hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IcdRelative {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub title: String,
}

impl From<&IcdEntity> for IcdRelative {
    fn from(entity: &IcdEntity) -> Self {
        Self {
            id: entity.id.clone(),
            code: entity.code.clone(),
            title: entity.title.clone(),
        }
    }
}
