//! Operation registry and dispatcher.
//!
//! Every operation has a stable name, a JSON input schema for the calling
//! agent, and a typed argument struct. [`TerminologyGateway::invoke`] maps
//! a name plus a JSON argument bag onto the matching client call and
//! returns the normalized result as JSON.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::TerminologyGateway;
use crate::types::{Direction, MeshMatch};
use crate::upstream::UpstreamId;
use crate::{MimirError, Result};

/// Every callable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    IcdSearch,
    IcdLookup,
    IcdHierarchy,
    LoincSearch,
    LoincLookup,
    RxNormSearch,
    RxNormLookup,
    RxNormRelated,
    MeshSearch,
    MeshLookup,
    MeshSparql,
    SnomedSearch,
    SnomedLookup,
    SnomedHierarchy,
    SnomedEcl,
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::IcdSearch,
        Operation::IcdLookup,
        Operation::IcdHierarchy,
        Operation::LoincSearch,
        Operation::LoincLookup,
        Operation::RxNormSearch,
        Operation::RxNormLookup,
        Operation::RxNormRelated,
        Operation::MeshSearch,
        Operation::MeshLookup,
        Operation::MeshSparql,
        Operation::SnomedSearch,
        Operation::SnomedLookup,
        Operation::SnomedHierarchy,
        Operation::SnomedEcl,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::IcdSearch => "icd_search",
            Self::IcdLookup => "icd_lookup",
            Self::IcdHierarchy => "icd_hierarchy",
            Self::LoincSearch => "loinc_search",
            Self::LoincLookup => "loinc_lookup",
            Self::RxNormSearch => "rxnorm_search",
            Self::RxNormLookup => "rxnorm_lookup",
            Self::RxNormRelated => "rxnorm_related",
            Self::MeshSearch => "mesh_search",
            Self::MeshLookup => "mesh_lookup",
            Self::MeshSparql => "mesh_sparql",
            Self::SnomedSearch => "snomed_search",
            Self::SnomedLookup => "snomed_lookup",
            Self::SnomedHierarchy => "snomed_hierarchy",
            Self::SnomedEcl => "snomed_ecl",
        }
    }

    pub fn upstream(&self) -> UpstreamId {
        match self {
            Self::IcdSearch | Self::IcdLookup | Self::IcdHierarchy => UpstreamId::Icd,
            Self::LoincSearch | Self::LoincLookup => UpstreamId::Loinc,
            Self::RxNormSearch | Self::RxNormLookup | Self::RxNormRelated => UpstreamId::RxNorm,
            Self::MeshSearch | Self::MeshLookup | Self::MeshSparql => UpstreamId::Mesh,
            Self::SnomedSearch | Self::SnomedLookup | Self::SnomedHierarchy | Self::SnomedEcl => {
                UpstreamId::Snomed
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::IcdSearch => "Search ICD-11 diseases and conditions by free text.",
            Self::IcdLookup => "Look up an ICD-11 code (e.g. 5A11) and return its entity.",
            Self::IcdHierarchy => "List the parents or children of an ICD-11 entity.",
            Self::LoincSearch => "Search LOINC laboratory and clinical observation codes.",
            Self::LoincLookup => "Look up a LOINC number (e.g. 2345-7).",
            Self::RxNormSearch => "Search RxNorm drug concepts by name.",
            Self::RxNormLookup => "Get properties of an RxNorm concept by RXCUI.",
            Self::RxNormRelated => "List RxNorm concepts related to an RXCUI by term type.",
            Self::MeshSearch => "Search MeSH descriptors by label.",
            Self::MeshLookup => "Get terms and qualifiers of a MeSH descriptor (e.g. D003920).",
            Self::MeshSparql => "Run a SPARQL query against the MeSH linked-data endpoint.",
            Self::SnomedSearch => "Search SNOMED CT concepts by term.",
            Self::SnomedLookup => "Look up a SNOMED CT concept by id.",
            Self::SnomedHierarchy => "List inferred parents or children of a SNOMED CT concept.",
            Self::SnomedEcl => "Evaluate a SNOMED CT Expression Constraint Language query.",
        }
    }

    /// JSON Schema of the operation's arguments.
    pub fn input_schema(&self) -> Value {
        let limit = |default: usize, max: usize| {
            json!({"type": "integer", "minimum": 1, "maximum": max, "default": default})
        };
        let direction = json!({
            "type": "string", "enum": ["parents", "children"], "default": "children"
        });
        let object = |properties: Value, required: &[&str]| {
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            })
        };

        match self {
            Self::IcdSearch | Self::LoincSearch => object(
                json!({"query": {"type": "string"}, "limit": limit(DEFAULT_LIMIT, MAX_LIMIT)}),
                &["query"],
            ),
            Self::IcdLookup | Self::LoincLookup => {
                object(json!({"code": {"type": "string"}}), &["code"])
            }
            Self::IcdHierarchy => object(
                json!({
                    "entity_id": {"type": "string"},
                    "direction": direction,
                    "limit": limit(DEFAULT_HIERARCHY_LIMIT, MAX_LIMIT),
                }),
                &["entity_id"],
            ),
            Self::RxNormSearch => object(json!({"name": {"type": "string"}}), &["name"]),
            Self::RxNormLookup => object(json!({"rxcui": {"type": "string"}}), &["rxcui"]),
            Self::RxNormRelated => object(
                json!({
                    "rxcui": {"type": "string"},
                    "term_types": {"type": "array", "items": {"type": "string"}},
                }),
                &["rxcui"],
            ),
            Self::MeshSearch => object(
                json!({
                    "query": {"type": "string"},
                    "match": {
                        "type": "string",
                        "enum": ["exact", "contains", "startswith"],
                        "default": "contains"
                    },
                    "limit": limit(DEFAULT_LIMIT, MAX_MESH_LIMIT),
                }),
                &["query"],
            ),
            Self::MeshLookup => {
                object(json!({"descriptor_id": {"type": "string"}}), &["descriptor_id"])
            }
            Self::MeshSparql => object(
                json!({
                    "query": {"type": "string"},
                    "limit": limit(DEFAULT_SPARQL_LIMIT, MAX_SPARQL_LIMIT),
                }),
                &["query"],
            ),
            Self::SnomedSearch => object(
                json!({
                    "query": {"type": "string", "minLength": 3},
                    "limit": limit(DEFAULT_LIMIT, MAX_LIMIT),
                    "active_only": {"type": "boolean", "default": true},
                }),
                &["query"],
            ),
            Self::SnomedLookup => {
                object(json!({"concept_id": {"type": "string"}}), &["concept_id"])
            }
            Self::SnomedHierarchy => object(
                json!({"concept_id": {"type": "string"}, "direction": direction}),
                &["concept_id"],
            ),
            Self::SnomedEcl => object(
                json!({
                    "expression": {"type": "string"},
                    "limit": limit(DEFAULT_ECL_LIMIT, MAX_LIMIT),
                }),
                &["expression"],
            ),
        }
    }

    pub fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor {
            name: self.name(),
            upstream: self.upstream(),
            description: self.description(),
            input_schema: self.input_schema(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = MimirError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| MimirError::UnknownOperation(s.to_string()))
    }
}

/// Listing entry for one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub upstream: UpstreamId,
    pub description: &'static str,
    pub input_schema: Value,
}

const DEFAULT_LIMIT: usize = 10;
const DEFAULT_HIERARCHY_LIMIT: usize = 25;
const DEFAULT_SPARQL_LIMIT: usize = 100;
const DEFAULT_ECL_LIMIT: usize = 50;
const MAX_LIMIT: usize = 100;
const MAX_MESH_LIMIT: usize = 50;
const MAX_SPARQL_LIMIT: usize = 1000;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_hierarchy_limit() -> usize {
    DEFAULT_HIERARCHY_LIMIT
}

fn default_sparql_limit() -> usize {
    DEFAULT_SPARQL_LIMIT
}

fn default_ecl_limit() -> usize {
    DEFAULT_ECL_LIMIT
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CodeArgs {
    code: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IcdHierarchyArgs {
    entity_id: String,
    #[serde(default)]
    direction: Direction,
    #[serde(default = "default_hierarchy_limit")]
    limit: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NameArgs {
    name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RxcuiArgs {
    rxcui: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RxRelatedArgs {
    rxcui: String,
    #[serde(default)]
    term_types: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MeshSearchArgs {
    query: String,
    #[serde(default, rename = "match")]
    match_mode: MeshMatch,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorArgs {
    descriptor_id: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SparqlArgs {
    query: String,
    #[serde(default = "default_sparql_limit")]
    limit: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SnomedSearchArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_true")]
    active_only: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConceptArgs {
    concept_id: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SnomedHierarchyArgs {
    concept_id: String,
    #[serde(default)]
    direction: Direction,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EclArgs {
    expression: String,
    #[serde(default = "default_ecl_limit")]
    limit: usize,
}

/// Decode the argument bag; a missing bag counts as `{}`.
fn args<T: DeserializeOwned>(op: Operation, value: Value) -> Result<T> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value)
        .map_err(|e| MimirError::InvalidArguments(format!("{op}: {e}")))
}

fn check_limit(op: Operation, limit: usize, max: usize) -> Result<usize> {
    if (1..=max).contains(&limit) {
        Ok(limit)
    } else {
        Err(MimirError::InvalidArguments(format!(
            "{op}: limit must be between 1 and {max}, got {limit}"
        )))
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| MimirError::Internal(format!("failed to encode result: {e}")))
}

impl TerminologyGateway {
    /// Descriptors for every operation, in a stable order.
    pub fn operations(&self) -> Vec<OperationDescriptor> {
        Operation::ALL.iter().map(Operation::descriptor).collect()
    }

    /// Invoke an operation by name with a JSON argument object.
    #[instrument(skip(self, arguments), fields(operation = %name))]
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value> {
        let op: Operation = name.parse()?;
        debug!(upstream = op.upstream().as_str(), "dispatching");
        self.invoke_operation(op, arguments).await
    }

    pub async fn invoke_operation(&self, op: Operation, arguments: Value) -> Result<Value> {
        match op {
            Operation::IcdSearch => {
                let a: SearchArgs = args(op, arguments)?;
                let limit = check_limit(op, a.limit, MAX_LIMIT)?;
                to_json(self.icd()?.search(&a.query, limit).await?)
            }
            Operation::IcdLookup => {
                let a: CodeArgs = args(op, arguments)?;
                to_json(self.icd()?.lookup(&a.code).await?)
            }
            Operation::IcdHierarchy => {
                let a: IcdHierarchyArgs = args(op, arguments)?;
                let limit = check_limit(op, a.limit, MAX_LIMIT)?;
                to_json(self.icd()?.hierarchy(&a.entity_id, a.direction, limit).await?)
            }
            Operation::LoincSearch => {
                let a: SearchArgs = args(op, arguments)?;
                let limit = check_limit(op, a.limit, MAX_LIMIT)?;
                to_json(self.loinc().search(&a.query, limit).await?)
            }
            Operation::LoincLookup => {
                let a: CodeArgs = args(op, arguments)?;
                to_json(self.loinc().lookup(&a.code).await?)
            }
            Operation::RxNormSearch => {
                let a: NameArgs = args(op, arguments)?;
                to_json(self.rxnorm().search(&a.name).await?)
            }
            Operation::RxNormLookup => {
                let a: RxcuiArgs = args(op, arguments)?;
                to_json(self.rxnorm().lookup(&a.rxcui).await?)
            }
            Operation::RxNormRelated => {
                let a: RxRelatedArgs = args(op, arguments)?;
                to_json(self.rxnorm().related(&a.rxcui, &a.term_types).await?)
            }
            Operation::MeshSearch => {
                let a: MeshSearchArgs = args(op, arguments)?;
                let limit = check_limit(op, a.limit, MAX_MESH_LIMIT)?;
                to_json(self.mesh().search(&a.query, a.match_mode, limit).await?)
            }
            Operation::MeshLookup => {
                let a: DescriptorArgs = args(op, arguments)?;
                to_json(self.mesh().lookup(&a.descriptor_id).await?)
            }
            Operation::MeshSparql => {
                let a: SparqlArgs = args(op, arguments)?;
                let limit = check_limit(op, a.limit, MAX_SPARQL_LIMIT)?;
                to_json(self.mesh().sparql(&a.query, limit).await?)
            }
            Operation::SnomedSearch => {
                let a: SnomedSearchArgs = args(op, arguments)?;
                let limit = check_limit(op, a.limit, MAX_LIMIT)?;
                to_json(self.snomed().search(&a.query, limit, a.active_only).await?)
            }
            Operation::SnomedLookup => {
                let a: ConceptArgs = args(op, arguments)?;
                to_json(self.snomed().lookup(&a.concept_id).await?)
            }
            Operation::SnomedHierarchy => {
                let a: SnomedHierarchyArgs = args(op, arguments)?;
                to_json(self.snomed().hierarchy(&a.concept_id, a.direction).await?)
            }
            Operation::SnomedEcl => {
                let a: EclArgs = args(op, arguments)?;
                let limit = check_limit(op, a.limit, MAX_LIMIT)?;
                to_json(self.snomed().ecl(&a.expression, limit).await?)
            }
        }
    }
}

/// Caller-facing error body: `{"error": {"code": ..., "message": ...}}`.
pub fn error_body(err: &MimirError) -> Value {
    json!({"error": {"code": err.code(), "message": err.to_string()}})
}
