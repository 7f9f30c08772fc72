//! HTTP client for outbound requests made by agents.
//!
//! Agents call out synchronously from the blocking pool, so the client is
//! reqwest's blocking one. It is built on first use: constructing it on a
//! runtime thread would panic.

use std::sync::OnceLock;
use std::time::Duration;

use rawhook_agent_sdk::host::{HostError, HttpRequest, HttpResponse};
use reqwest::blocking::Client;
use thiserror::Error;

/// HTTP client with lazily built connection pool.
#[derive(Debug)]
pub struct HttpClient {
    client: OnceLock<Client>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(config: HttpClientConfig) -> Self {
        Self {
            client: OnceLock::new(),
            config,
        }
    }

    fn client(&self) -> Result<&Client, HttpClientError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }

        let client = Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.default_timeout)
            .build()
            .map_err(HttpClientError::BuildError)?;

        Ok(self.client.get_or_init(|| client))
    }

    /// Make an HTTP request. Must not be called from an async context.
    pub fn call(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        // Validate URL scheme
        let url = request
            .url
            .parse::<reqwest::Url>()
            .map_err(|e| HttpClientError::InvalidUrl(e.to_string()))?;

        if url.scheme() == "http" && !self.config.allow_plaintext {
            return Err(HttpClientError::PlaintextNotAllowed);
        }

        let method = request
            .method
            .parse::<reqwest::Method>()
            .map_err(|e| HttpClientError::InvalidMethod(e.to_string()))?;

        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_timeout);

        let mut req_builder = self.client()?.request(method, url).timeout(timeout);

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        match req_builder.send() {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .filter_map(|(k, v)| {
                        v.to_str()
                            .ok()
                            .map(|v| (k.as_str().to_lowercase(), v.to_string()))
                    })
                    .collect();

                let body = response.text().map_err(HttpClientError::ResponseReadError)?;

                Ok(HttpResponse {
                    status,
                    headers,
                    body: Some(body),
                })
            }
            Err(e) if e.is_timeout() => Err(HttpClientError::Timeout),
            Err(e) if e.is_connect() => Err(HttpClientError::ConnectionFailed(e.to_string())),
            Err(e) => Err(HttpClientError::RequestFailed(e.to_string())),
        }
    }
}

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Default request timeout.
    pub default_timeout: Duration,
    /// Allow plaintext HTTP (development only).
    pub allow_plaintext: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            default_timeout: Duration::from_secs(30),
            allow_plaintext: false,
        }
    }
}

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("failed to build HTTP client: {0}")]
    BuildError(#[source] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("plaintext HTTP not allowed")]
    PlaintextNotAllowed,

    #[error("request timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("failed to read response: {0}")]
    ResponseReadError(#[source] reqwest::Error),
}

impl From<HttpClientError> for HostError {
    fn from(err: HttpClientError) -> Self {
        match err {
            HttpClientError::Timeout => HostError::Timeout,
            HttpClientError::ConnectionFailed(msg) => HostError::ConnectionFailed(msg),
            build @ HttpClientError::BuildError(_) => HostError::Unavailable(build.to_string()),
            other => HostError::RequestFailed(other.to_string()),
        }
    }
}
