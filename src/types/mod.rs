//! Normalized result types, one submodule per upstream.

mod common;
mod icd;
mod loinc;
mod mesh;
mod rxnorm;
mod snomed;

pub(crate) use common::{lookup, or_empty};
pub use common::{Direction, Lookup};
pub use icd::{IcdEntity, IcdRelative, IcdSearchHit};
pub use loinc::{LoincItem, LoincSearchResult};
pub use mesh::{MeshDescriptor, MeshDescriptorHit, MeshMatch, MeshQualifier, MeshTerm, SparqlResult};
pub use rxnorm::{RxConcept, RxProperties};
pub use snomed::{SnomedConcept, SnomedEclResult};
