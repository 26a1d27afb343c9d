//! reqwest-backed [`HttpTransport`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use super::traits::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::TransportErrorKind;
use crate::{MimirError, Result};

/// Fallback timeout when a request does not carry its own.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client for all upstreams.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(crate::version::user_agent())
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| MimirError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    fn prepare(&self, builder: RequestBuilder, request: &HttpRequest) -> RequestBuilder {
        let mut builder = builder.query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<HttpResponse> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.map_err(transport_error)?;
        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let builder = self.prepare(self.http.get(&request.url), request);
        self.send(builder).await
    }

    async fn post_form(
        &self,
        request: &HttpRequest,
        form: &[(String, String)],
    ) -> Result<HttpResponse> {
        let builder = self.prepare(self.http.post(&request.url), request).form(form);
        self.send(builder).await
    }
}

/// Tag a reqwest failure with its transport category.
fn transport_error(err: reqwest::Error) -> MimirError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else if err.is_request() {
        TransportErrorKind::Request
    } else {
        TransportErrorKind::Other
    };
    MimirError::transport(kind, err)
}
