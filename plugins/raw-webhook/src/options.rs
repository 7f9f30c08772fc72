//! Agent options: storage shape, interpolation and save-time validation.

use rawhook_agent_sdk::host::AgentHost;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

pub const DEFAULT_VERBS: &str = "post";
pub const DEFAULT_RESPONSE: &str = "Event Created";
pub const DEFAULT_CODE: u16 = 201;

/// Options as stored by the host. Every string value may be a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookOptions {
    /// Shared secret callers must present.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub secret: Option<String>,

    /// How often events are expected; drives the liveness check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_receive_period_in_days: Option<Value>,

    /// Comma-separated list of accepted HTTP verbs.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub verbs: Option<String>,

    /// Response body, or redirect target for 301/302 codes.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub response: Option<String>,

    /// Extra response headers.
    #[serde(
        default,
        deserialize_with = "deserialize_headers",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_headers: Option<BTreeMap<String, String>>,

    /// Response status; an integer or a templated string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,

    /// reCAPTCHA secret key. Enables verification when set.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub recaptcha_secret: Option<String>,

    /// Forward the caller's address to reCAPTCHA as `remoteip`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recaptcha_send_remote_addr: Option<Value>,
}

/// Save-time configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Must specify a secret for 'Authenticating' requests")]
    MissingSecret,

    #[error("Must specify a code for request responses")]
    InvalidCode,

    #[error("Must specify a url for request redirect")]
    MissingRedirectUrl,
}

fn code_pattern() -> &'static Regex {
    static CODE: OnceLock<Regex> = OnceLock::new();
    CODE.get_or_init(|| Regex::new(r"^\s*(\d+|\{.*)\s*$").expect("valid code pattern"))
}

impl WebhookOptions {
    /// Options offered for a freshly created agent.
    pub fn default_options() -> Self {
        Self {
            secret: Some("supersecretstring".to_string()),
            expected_receive_period_in_days: Some(Value::from(1)),
            ..Self::default()
        }
    }

    /// Check the options before they are saved.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !present(self.secret.as_deref()) {
            errors.push(ConfigError::MissingSecret);
        }

        let code = self.code.as_ref().map(value_text).unwrap_or_default();
        if present(Some(&code)) && !code_pattern().is_match(&code) {
            errors.push(ConfigError::InvalidCode);
        }

        if matches!(code.as_str(), "301" | "302") && !present(self.response.as_deref()) {
            errors.push(ConfigError::MissingRedirectUrl);
        }

        errors
    }

    /// Resolve every templated value against `context`.
    pub fn interpolated(&self, host: &dyn AgentHost, context: &Value) -> Self {
        let text = |value: &Option<String>| {
            value
                .as_deref()
                .map(|template| host.interpolate(template, context))
        };
        let any = |value: &Option<Value>| {
            value.as_ref().map(|v| match v {
                Value::String(template) => Value::String(host.interpolate(template, context)),
                other => other.clone(),
            })
        };

        Self {
            secret: text(&self.secret),
            expected_receive_period_in_days: any(&self.expected_receive_period_in_days),
            verbs: text(&self.verbs),
            response: text(&self.response),
            response_headers: self.response_headers.as_ref().map(|headers| {
                headers
                    .iter()
                    .map(|(name, template)| (name.clone(), host.interpolate(template, context)))
                    .collect()
            }),
            code: any(&self.code),
            recaptcha_secret: text(&self.recaptcha_secret),
            recaptcha_send_remote_addr: any(&self.recaptcha_send_remote_addr),
        }
    }

    /// Accepted verbs, lower-cased, in configured order.
    pub fn verbs(&self) -> Vec<String> {
        self.verbs
            .as_deref()
            .unwrap_or(DEFAULT_VERBS)
            .split(',')
            .map(|verb| verb.trim().to_lowercase())
            .filter(|verb| !verb.is_empty())
            .collect()
    }

    /// Response status. Falls back to 201 when unset, blank, or not a
    /// usable HTTP status.
    pub fn code(&self) -> u16 {
        let parsed = match &self.code {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) if present(Some(s)) => leading_integer(s),
            _ => None,
        };

        parsed
            .and_then(|n| u16::try_from(n).ok())
            .filter(|code| (100..=999).contains(code))
            .unwrap_or(DEFAULT_CODE)
    }

    /// The reCAPTCHA secret, when verification is enabled.
    pub fn recaptcha_secret(&self) -> Option<&str> {
        self.recaptcha_secret
            .as_deref()
            .filter(|secret| present(Some(secret)))
    }

    pub fn send_remote_addr(&self) -> bool {
        match self.recaptcha_send_remote_addr.as_ref() {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(s)) => s.trim() == "true",
            _ => false,
        }
    }

    /// Custom response headers, when any are configured.
    pub fn response_headers(&self) -> Option<&BTreeMap<String, String>> {
        self.response_headers
            .as_ref()
            .filter(|headers| !headers.is_empty())
    }

    pub fn expected_receive_period_in_days(&self) -> Option<i64> {
        match self.expected_receive_period_in_days.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Accept any scalar where text is expected: `secret: 123` means `"123"`.
fn scalar_text<E: serde::de::Error>(value: Value) -> Result<String, E> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(E::custom(format!(
            "expected a string, number or boolean, got {}",
            other
        ))),
    }
}

fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar_text(value).map(Some),
    }
}

fn deserialize_headers<'de, D>(
    deserializer: D,
) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(headers) = Option::<BTreeMap<String, Value>>::deserialize(deserializer)? else {
        return Ok(None);
    };

    headers
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::Null => String::new(),
                other => scalar_text::<D::Error>(other)?,
            };
            Ok((name, value))
        })
        .collect::<Result<_, _>>()
        .map(Some)
}

/// A value is present when it exists and is not only whitespace.
fn present(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse the integer prefix of `s`: leading whitespace and a sign are
/// allowed, anything after the digits is ignored.
fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let n: i64 = digits[..end].parse().ok()?;

    Some(if negative { -n } else { n })
}
