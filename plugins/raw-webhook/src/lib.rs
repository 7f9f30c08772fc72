//! Raw webhook agent for Rawhook.
//!
//! Accepts webhooks from any source, authenticates them with a shared
//! secret (and optionally reCAPTCHA), and emits one event per accepted
//! request:
//!
//! ```text
//! { "body": "...", "query": { ... }, "json": { ... } }
//! ```
//!
//! Requests are addressed to `/users/{user_id}/web_requests/{agent_id}/{secret}`.
//! Every authorization failure answers `401 Not Authorized`; nothing is
//! ever surfaced to the caller as an error.

pub mod options;
pub mod recaptcha;
pub mod working;

pub use options::{ConfigError, WebhookOptions};
pub use recaptcha::RECAPTCHA_VERIFY_URL;
pub use working::AgentStatus;

use chrono::{DateTime, Utc};
use rawhook_agent_sdk::prelude::*;
use recaptcha::Verification;
use serde_json::{json, Value};

/// Parameters injected by the host's router; never part of the payload.
const ROUTING_PARAMS: [&str; 5] = ["action", "controller", "agent_id", "user_id", "format"];

const RECAPTCHA_PARAM: &str = "g-recaptcha-response";

/// Path at which the host exposes an agent.
pub fn web_request_path(user_id: u64, agent_id: u64, secret: &str) -> String {
    format!("/users/{user_id}/web_requests/{agent_id}/{secret}")
}

/// A configured raw webhook agent.
#[derive(Debug, Clone)]
pub struct RawWebhookAgent {
    options: WebhookOptions,
    verify_url: String,
}

impl RawWebhookAgent {
    pub fn new(options: WebhookOptions) -> Self {
        Self {
            options,
            verify_url: RECAPTCHA_VERIFY_URL.to_string(),
        }
    }

    /// Send reCAPTCHA verifications somewhere other than Google.
    pub fn with_verify_url(mut self, url: impl Into<String>) -> Self {
        self.verify_url = url.into();
        self
    }

    pub fn options(&self) -> &WebhookOptions {
        &self.options
    }

    /// Save-time validation of this agent's options.
    pub fn validate(&self) -> Vec<ConfigError> {
        self.options.validate()
    }

    /// Handle one inbound request.
    ///
    /// Checks, in order: secret, verb, reCAPTCHA. Only a request passing
    /// all of them creates an event.
    pub fn receive_web_request(&self, host: &dyn AgentHost, req: &Request) -> WebResponse {
        let options = self.options.interpolated(host, &json!({}));

        let mut params = req.params();
        for key in ROUTING_PARAMS {
            params.remove(key);
        }

        let secret = params.remove("secret");
        let authorized = match (secret.as_ref(), options.secret.as_deref()) {
            (Some(Value::String(given)), Some(expected)) => given == expected,
            _ => false,
        };
        if !authorized {
            return WebResponse::not_authorized();
        }

        let verbs = options.verbs();
        let method = req.method.to_lowercase();
        if !verbs.contains(&method) {
            return WebResponse::new(
                format!("Please use {} requests only", verbs.join("/").to_uppercase()),
                401,
            );
        }

        let code = options.code();

        if let Some(recaptcha_secret) = options.recaptcha_secret() {
            let token = match params.remove(RECAPTCHA_PARAM) {
                Some(Value::String(token)) => token,
                _ => return WebResponse::not_authorized(),
            };

            let verification = Verification {
                secret: recaptcha_secret,
                response: &token,
                remote_ip: options.send_remote_addr().then_some(req.client_ip.as_str()),
            };

            if let Err(e) = verification.verify(host, &self.verify_url) {
                if !matches!(e, recaptcha::VerificationError::Rejected(_)) {
                    host.log(LogLevel::Error, &format!("Verification failed: {e}"));
                }
                return WebResponse::not_authorized();
            }
        }

        let raw = req.raw_post();
        let query = Value::Object(req.query_parameters());
        let parsed = parse_json(raw);

        host.create_event(json!({
            "body": raw,
            "query": query.clone(),
            "json": parsed.clone(),
        }));

        params.insert("body".to_string(), Value::String(raw.to_string()));
        params.insert("query".to_string(), query);
        params.insert("json".to_string(), parsed);
        let context = Value::Object(params);

        let body = match self.options.response.as_deref() {
            Some(template) => host.interpolate(template, &context),
            None => options::DEFAULT_RESPONSE.to_string(),
        };

        match options.response_headers() {
            Some(headers) => WebResponse::with_headers(body, code, "text/plain", headers.clone()),
            None => WebResponse::new(body, code),
        }
    }

    /// Healthy when an event arrived within the expected period and no
    /// error has been logged since shortly before it.
    pub fn is_working(&self, host: &dyn AgentHost, status: &AgentStatus, now: DateTime<Utc>) -> bool {
        let options = self.options.interpolated(host, &json!({}));
        let Some(days) = options.expected_receive_period_in_days() else {
            return false;
        };
        status.event_created_within(days, now) && !status.recent_error_logs()
    }
}

/// Parse a body as JSON, falling back to an empty object.
pub fn parse_json(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
}
