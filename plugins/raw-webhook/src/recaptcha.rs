//! reCAPTCHA token verification through the host's outbound HTTP.

use rawhook_agent_sdk::host::{AgentHost, HostError, HttpRequest, LogLevel};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Google's token verification endpoint.
pub const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

/// Verification calls never wait longer than this.
const VERIFY_TIMEOUT_MS: u64 = 5_000;

/// Answer of the siteverify endpoint.
#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,

    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error(transparent)]
    Transport(#[from] HostError),

    #[error("malformed verification response: {0}")]
    Malformed(String),

    #[error("token rejected")]
    Rejected(Vec<String>),
}

/// A token to check, together with the secret that owns it.
#[derive(Debug)]
pub struct Verification<'a> {
    pub secret: &'a str,
    pub response: &'a str,
    pub remote_ip: Option<&'a str>,
}

impl Verification<'_> {
    fn form_body(&self) -> String {
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("secret", self.secret);
        form.append_pair("response", self.response);
        if let Some(ip) = self.remote_ip {
            form.append_pair("remoteip", ip);
        }
        form.finish()
    }

    /// POST the token to `url`. Any failure is final: no retries.
    pub fn verify(&self, host: &dyn AgentHost, url: &str) -> Result<(), VerificationError> {
        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );

        let response = host.http_call(HttpRequest {
            method: "POST".to_string(),
            url: url.to_string(),
            headers,
            body: Some(self.form_body()),
            timeout_ms: Some(VERIFY_TIMEOUT_MS),
        })?;

        let answer: SiteVerifyResponse =
            serde_json::from_str(response.body.as_deref().unwrap_or_default())
                .map_err(|e| VerificationError::Malformed(e.to_string()))?;

        if answer.success {
            Ok(())
        } else {
            host.log(
                LogLevel::Debug,
                &format!("reCAPTCHA rejected token: {:?}", answer.error_codes),
            );
            Err(VerificationError::Rejected(answer.error_codes))
        }
    }
}
