//! HTTP transport used by the default license and certificate sources
//!
//! The transport is injected so hosts can route license traffic through their
//! own stack; `ReqwestTransport` is the stock implementation.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Header layer as configured; a `None` value removes the key from earlier layers
pub type HeaderOverrides = BTreeMap<String, Option<String>>;

/// Final request headers with lowercase names
pub type Headers = BTreeMap<String, String>;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// What a request is for, so hosts can tag or route it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    License,
    Certificate,
}

/// Request descriptor handed to the transport; the response body is always raw bytes
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub uri: String,
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub request_type: RequestType,
    pub key_system: String,
}

/// Raw response from the transport
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Transport seam for license and certificate requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request; only transport-level failures are errors here
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
        }
    }
}

/// `reqwest` backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.uri),
            HttpMethod::Post => self.client.post(&request.uri),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        debug!(
            uri = %request.uri,
            method = %request.method,
            status,
            bytes = body.len(),
            "HTTP request completed"
        );

        Ok(HttpResponse { status, body })
    }
}

/// Merge header layers; later layers win per case-insensitive name.
pub fn merge_headers<'a, I>(layers: I) -> Headers
where
    I: IntoIterator<Item = &'a HeaderOverrides>,
{
    let mut merged = Headers::new();
    for layer in layers {
        for (name, value) in layer {
            let name = name.to_ascii_lowercase();
            match value {
                Some(value) => {
                    merged.insert(name, value.clone());
                }
                None => {
                    merged.remove(&name);
                }
            }
        }
    }
    merged
}

/// Turn a response into the license/certificate body.
///
/// Statuses 400-599 fail with the body decoded as text as the cause.
pub fn handle_response(response: HttpResponse) -> Result<Bytes> {
    if (400..=599).contains(&response.status) {
        return Err(Error::HttpStatus {
            status: response.status,
            cause: String::from_utf8_lossy(&response.body).into_owned(),
        });
    }
    Ok(response.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(pairs: &[(&str, Option<&str>)]) -> HeaderOverrides {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_merge_later_layers_win() {
        let defaults = layer(&[("Content-type", Some("application/octet-stream"))]);
        let global = layer(&[("X-Token", Some("global")), ("Accept", Some("*/*"))]);
        let per_system = layer(&[("x-token", Some("widevine"))]);

        let merged = merge_headers([&defaults, &global, &per_system]);
        assert_eq!(merged.get("content-type").map(String::as_str), Some("application/octet-stream"));
        assert_eq!(merged.get("x-token").map(String::as_str), Some("widevine"));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_merge_null_removes() {
        let defaults = layer(&[("Content-Type", Some("application/octet-stream"))]);
        let removal = layer(&[("content-type", None)]);
        assert!(merge_headers([&defaults, &removal]).is_empty());
    }

    #[test]
    fn test_handle_response_status_ranges() {
        let ok = handle_response(HttpResponse { status: 200, body: Bytes::from_static(b"lic") });
        assert_eq!(ok.unwrap(), Bytes::from_static(b"lic"));

        let redirect = handle_response(HttpResponse { status: 302, body: Bytes::new() });
        assert!(redirect.is_ok());

        match handle_response(HttpResponse { status: 403, body: Bytes::from_static(b"forbidden") }) {
            Err(Error::HttpStatus { status, cause }) => {
                assert_eq!(status, 403);
                assert_eq!(cause, "forbidden");
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(handle_response(HttpResponse { status: 599, body: Bytes::new() }).is_err());
        assert!(handle_response(HttpResponse { status: 600, body: Bytes::new() }).is_ok());
    }
}
