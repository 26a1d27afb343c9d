//! Seams between the governance layer and the outside world.
//!
//! [`HttpTransport`] is the only way clients reach the network. It returns
//! the raw status and body; status interpretation happens in
//! [`governed`](super::governed). Transport failures come back as
//! [`MimirError::Transport`](crate::MimirError::Transport), already tagged,
//! so nothing downstream inspects error message text.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::Result;

/// An outbound HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A completed HTTP exchange, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed `Retry-After` header (seconds form only).
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Raw HTTP capability wrapped by the governance layer.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse>;

    /// POST an `application/x-www-form-urlencoded` body.
    async fn post_form(
        &self,
        request: &HttpRequest,
        form: &[(String, String)],
    ) -> Result<HttpResponse>;
}

/// Attaches credentials to requests for an authenticated upstream.
#[async_trait]
pub trait RequestAuthorizer: Send + Sync {
    /// Return `request` with credentials attached.
    async fn authorize(&self, request: HttpRequest) -> Result<HttpRequest>;

    /// Called when the upstream rejected the credential (HTTP 401).
    async fn credential_rejected(&self);
}
