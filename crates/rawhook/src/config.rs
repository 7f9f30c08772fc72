//! Host configuration file.
//!
//! ```yaml
//! listen: 0.0.0.0:3000
//! allow_plaintext_http: false
//! agents:
//!   - id: 7
//!     user_id: 1
//!     name: Inbound hooks
//!     options:
//!       secret: supersecretstring
//!       expected_receive_period_in_days: 1
//! ```

use rawhook_webhook::{ConfigError, RawWebhookAgent, WebhookOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Top-level host configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Override for the reCAPTCHA verification endpoint.
    #[serde(default)]
    pub recaptcha_verify_url: Option<String>,

    /// Allow outbound `http://` calls (development only).
    #[serde(default)]
    pub allow_plaintext_http: bool,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Largest accepted request body, in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

/// One configured webhook agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub id: u64,
    pub user_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub options: WebhookOptions,
}

impl AgentConfig {
    /// Build the agent this entry describes.
    pub fn agent(&self, verify_url: Option<&str>) -> RawWebhookAgent {
        let agent = RawWebhookAgent::new(self.options.clone());
        match verify_url {
            Some(url) => agent.with_verify_url(url),
            None => agent,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

/// An options error, attributed to the agent that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionIssue {
    pub agent_id: u64,
    pub message: String,
}

impl OptionIssue {
    fn new(agent_id: u64, error: &ConfigError) -> Self {
        Self {
            agent_id,
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for OptionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent {}: {}", self.agent_id, self.message)
    }
}

/// Failures while loading a configuration file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("duplicate agent id {0}")]
    DuplicateAgent(u64),

    #[error("invalid agent options: {}", join_issues(.0))]
    InvalidOptions(Vec<OptionIssue>),
}

fn join_issues(issues: &[OptionIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl HostConfig {
    /// Parse without validating agent options.
    pub fn from_yaml(source: &str) -> Result<Self, LoadError> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let source = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&source)?;
        config.check()?;
        Ok(config)
    }

    /// Every options error across all agents, in file order.
    pub fn issues(&self) -> Vec<OptionIssue> {
        self.agents
            .iter()
            .flat_map(|agent| {
                agent
                    .options
                    .validate()
                    .into_iter()
                    .map(move |error| OptionIssue::new(agent.id, &error))
            })
            .collect()
    }

    /// Reject duplicate agent ids and invalid options.
    pub fn check(&self) -> Result<(), LoadError> {
        let mut seen = BTreeSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id) {
                return Err(LoadError::DuplicateAgent(agent.id));
            }
        }

        let issues = self.issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(LoadError::InvalidOptions(issues))
        }
    }
}
