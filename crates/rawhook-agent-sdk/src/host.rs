//! The seam between an agent and the host that runs it.
//!
//! Agents never own storage, schedulers or network clients. Everything
//! beyond pure request handling goes through [`AgentHost`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Severity of an agent log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Outbound HTTP request issued through the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Per-request timeout; the host default applies when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Response to an outbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Failures the host reports back across the seam.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("request timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("capability not available: {0}")]
    Unavailable(String),
}

/// Facilities a host provides to the agents it runs.
///
/// Implementations must be usable from several requests at once; every
/// method takes `&self`.
pub trait AgentHost {
    /// Resolve a templated option value against `context`.
    ///
    /// Missing fields resolve to the empty string.
    fn interpolate(&self, template: &str, context: &Value) -> String;

    /// Hand a new event payload to the host's event bus.
    fn create_event(&self, payload: Value);

    /// Perform an outbound HTTP request.
    fn http_call(&self, request: HttpRequest) -> Result<HttpResponse, HostError>;

    /// Write a line to the agent's log.
    fn log(&self, level: LogLevel, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_request_defaults() {
        let req: HttpRequest =
            serde_json::from_str(r#"{"method":"POST","url":"https://example.com"}"#).unwrap();
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
        assert!(req.timeout_ms.is_none());
    }

    #[test]
    fn log_level_orders_by_severity() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"warn\"");
    }

    #[test]
    fn host_error_messages() {
        assert_eq!(HostError::Timeout.to_string(), "request timeout");
        assert_eq!(
            HostError::ConnectionFailed("refused".into()).to_string(),
            "connection failed: refused"
        );
    }
}
