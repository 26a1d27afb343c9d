//! Mimir error types

use std::fmt;
use std::time::Duration;

/// Low-level transport failure category, tagged where the HTTP adapter
/// observes the failure.
///
/// Every kind is transient: connection resets, refusals, DNS failures,
/// timeouts and truncated bodies are all retried by
/// [`RetryPolicy`](crate::upstream::retry::RetryPolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request exceeded its timeout.
    Timeout,
    /// The connection could not be established (refused, DNS, TLS).
    Connect,
    /// The request failed while being sent (reset, socket closed).
    Request,
    /// The response body could not be read to completion.
    Body,
    /// Any other transport-level failure.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Body => "body",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Stable error codes surfaced to callers at the dispatcher boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    RateLimit,
    ApiError,
    AuthConfigError,
    AuthExpired,
    InvalidArguments,
    UnknownOperation,
    ConfigError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::RateLimit => "RATE_LIMIT",
            Self::ApiError => "API_ERROR",
            Self::AuthConfigError => "AUTH_CONFIG_ERROR",
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::UnknownOperation => "UNKNOWN_OPERATION",
            Self::ConfigError => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mimir error types
///
/// `Clone` so a single failed computation can be handed to every caller
/// waiting on the same in-flight cache entry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MimirError {
    // Transport/network errors
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited by upstream, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("not found: {0}")]
    NotFound(String),

    // Credential errors
    #[error("credentials not configured: {0}")]
    AuthConfig(String),

    /// The upstream rejected a bearer credential that was believed valid.
    #[error("credential expired or rejected by upstream")]
    AuthExpired,

    // Data errors
    #[error("malformed upstream payload: {0}")]
    Decode(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MimirError {
    /// Build a transport error from a kind and any displayable cause.
    pub fn transport(kind: TransportErrorKind, cause: impl fmt::Display) -> Self {
        Self::Transport {
            kind,
            message: cause.to_string(),
        }
    }

    /// Whether this is a network-transport failure (always retryable).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// The HTTP status this error was mapped from, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::NotFound(_) => Some(404),
            Self::AuthExpired => Some(401),
            _ => None,
        }
    }

    /// Upstream `Retry-After` hint carried by a 429.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// The caller-facing error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::RateLimited { .. } => ErrorCode::RateLimit,
            Self::AuthConfig(_) => ErrorCode::AuthConfigError,
            Self::AuthExpired => ErrorCode::AuthExpired,
            Self::InvalidArguments(_) => ErrorCode::InvalidArguments,
            Self::UnknownOperation(_) => ErrorCode::UnknownOperation,
            Self::Configuration(_) => ErrorCode::ConfigError,
            Self::Transport { .. } | Self::Api { .. } | Self::Decode(_) | Self::Internal(_) => {
                ErrorCode::ApiError
            }
        }
    }
}

impl From<serde_json::Error> for MimirError {
    fn from(err: serde_json::Error) -> Self {
        MimirError::Decode(err.to_string())
    }
}

/// Result type alias for Mimir operations
pub type Result<T> = std::result::Result<T, MimirError>;
