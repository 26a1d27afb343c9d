//! Mimir - governed gateway for medical terminology services
//!
//! This crate exposes five terminology services (WHO ICD-11, LOINC, RxNorm,
//! MeSH and SNOMED CT) as a uniform set of named operations. Every upstream
//! call passes through the same governance layer:
//!
//! - a per-upstream token-bucket [`RateLimiter`] with FIFO queueing,
//! - a [`RetryPolicy`] with exponential backoff, jitter and structural
//!   error classification,
//! - a shared [`TtlCache`] used cache-aside, which also holds the ICD-11
//!   bearer credential.
//!
//! # Example
//!
//! ```rust,no_run
//! use mimir::Mimir;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> mimir::Result<()> {
//!     let gateway = Mimir::builder().build()?;
//!
//!     let hits = gateway
//!         .invoke("snomed_search", json!({"query": "diabetes", "limit": 5}))
//!         .await?;
//!     println!("{hits:#}");
//!
//!     let drug = gateway.rxnorm().lookup("1191").await?;
//!     println!("{drug:?}");
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod telemetry;
pub mod types;
pub mod upstream;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheTtls, Sweeper, TtlCache, TtlClass};
pub use error::{ErrorCode, MimirError, Result, TransportErrorKind};
pub use gateway::{
    Mimir, MimirBuilder, Operation, OperationDescriptor, TerminologyGateway, error_body,
};
pub use upstream::{
    ClientCredentials, HttpRequest, HttpResponse, HttpTransport, RateLimit, RateLimiter,
    RetryPolicy, UpstreamId,
};
pub use version::{PKG_VERSION, version_string};

// Re-export all types
pub use types::{
    Direction, IcdEntity, IcdRelative, IcdSearchHit, LoincItem, LoincSearchResult, Lookup,
    MeshDescriptor, MeshDescriptorHit, MeshMatch, MeshQualifier, MeshTerm, RxConcept,
    RxProperties, SnomedConcept, SnomedEclResult, SparqlResult,
};
