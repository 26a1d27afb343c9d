//! Telemetry metric name constants.
//!
//! Consumers install their own `metrics` recorder (prometheus, statsd, ...);
//! without one, every metric call is a no-op.
//!
//! # Common labels
//!
//! - `upstream`: upstream id (`icd`, `loinc`, `rxnorm`, `mesh`, `snomed`)
//! - `operation`: client operation (e.g. `search`, `lookup`)
//! - `status`: outcome: "ok" or an error code such as "RATE_LIMIT"
//! - `namespace`: cache namespace (`{upstream}:{operation}`)

/// Total upstream HTTP attempts, including retries.
///
/// Labels: `upstream`, `operation`, `status`.
pub const REQUESTS_TOTAL: &str = "mimir_requests_total";

/// Upstream HTTP attempt duration in seconds.
///
/// Labels: `upstream`, `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "mimir_request_duration_seconds";

/// Total retries scheduled (not counting the initial attempt).
///
/// Labels: `upstream`, `operation`.
pub const RETRIES_TOTAL: &str = "mimir_retries_total";

/// Total cache hits, including callers joining an in-flight computation.
///
/// Labels: `namespace`.
pub const CACHE_HITS_TOTAL: &str = "mimir_cache_hits_total";

/// Total cache misses that ran the factory.
///
/// Labels: `namespace`.
pub const CACHE_MISSES_TOTAL: &str = "mimir_cache_misses_total";

/// Total acquisitions that had to queue behind an empty bucket.
///
/// Labels: `upstream`.
pub const RATE_LIMIT_WAITS_TOTAL: &str = "mimir_rate_limit_waits_total";

/// Total client-credentials exchanges attempted.
///
/// Labels: `upstream`, `status`.
pub const CREDENTIAL_EXCHANGES_TOTAL: &str = "mimir_credential_exchanges_total";
