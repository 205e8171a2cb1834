//! reqwest-backed transport
//!
//! # Security
//!
//! Request URLs and headers carry credentials and are never logged.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::debug;

use super::{Transport, TransportResponse, decode_body};
use crate::catalog::HttpMethod;
use crate::resolver::ResolvedRequest;
use crate::{Error, Result};

/// HTTP transport with a fixed per-request timeout
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("integration-tester/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self { client })
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    fn headers(request: &ResolvedRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::invalid_parameter(name, "not a valid header name"))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::invalid_parameter(name.as_str(), "not a valid header value"))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ResolvedRequest) -> Result<TransportResponse> {
        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url)
            .headers(Self::headers(request)?);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| {
            // reqwest errors embed the URL, which may carry a token
            let reason = if e.is_timeout() {
                "request timed out"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "request failed"
            };
            Error::Transport(reason.to_string())
        })?;

        let status = response.status();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|_| Error::Transport("failed to read response body".to_string()))?;

        debug!(
            method = %request.method,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis(),
            bytes = text.len(),
            "Upstream responded"
        );

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: decode_body(&text),
        })
    }
}
