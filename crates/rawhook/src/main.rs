//! Rawhook webhook host.
//!
//! Validates agent configurations and serves their web request endpoints.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use rawhook_lib::config::{HostConfig, LoadError};
use rawhook_lib::server::{serve, WebhookServer};
use rawhook_telemetry::{log_config_loaded, log_listening, log_startup, LogFormat, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "rawhook", about = "Raw webhook agent host", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a configuration file without serving it.
    Validate {
        /// Configuration file (YAML).
        #[arg(short, long)]
        config: String,

        /// Output format (text or json).
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Run the webhook server.
    Serve {
        /// Configuration file (YAML).
        #[arg(short, long, env = "RAWHOOK_CONFIG")]
        config: String,

        /// Listen address; overrides the configuration file.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Log level.
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Log format (json or pretty).
        #[arg(long, default_value = "json")]
        log_format: String,
    },
}

/// Validation result for a configuration file.
#[derive(serde::Serialize)]
struct ValidationResult {
    file: String,
    valid: bool,
    agents: usize,
    errors: Vec<ValidationIssue>,
}

#[derive(serde::Serialize)]
struct ValidationIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<u64>,
    message: String,
}

impl ValidationIssue {
    fn file(message: String) -> Self {
        Self {
            agent_id: None,
            message,
        }
    }
}

/// Run the validate command.
fn run_validate(config_path: &str, output_format: &str) -> ExitCode {
    let mut errors = Vec::new();
    let mut agents = 0;

    let parsed = std::fs::read_to_string(config_path)
        .map_err(|e| format!("failed to read {}: {}", config_path, e))
        .and_then(|source| HostConfig::from_yaml(&source).map_err(|e| e.to_string()));

    match parsed {
        Ok(config) => {
            agents = config.agents.len();
            match config.check() {
                Ok(()) => {}
                Err(LoadError::InvalidOptions(issues)) => {
                    errors.extend(issues.into_iter().map(|issue| ValidationIssue {
                        agent_id: Some(issue.agent_id),
                        message: issue.message,
                    }));
                }
                Err(LoadError::DuplicateAgent(id)) => errors.push(ValidationIssue {
                    agent_id: Some(id),
                    message: format!("duplicate agent id {}", id),
                }),
                Err(e) => errors.push(ValidationIssue::file(e.to_string())),
            }
        }
        Err(message) => errors.push(ValidationIssue::file(message)),
    }

    let result = ValidationResult {
        file: config_path.to_string(),
        valid: errors.is_empty(),
        agents,
        errors,
    };

    if output_format == "json" {
        match serde_json::to_string_pretty(&result) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("error: failed to encode result: {}", e);
                return ExitCode::from(1);
            }
        }
    } else if result.valid {
        eprintln!("✓ {} is valid ({} agent(s))", result.file, result.agents);
    } else {
        eprintln!("✗ {} has {} error(s)", result.file, result.errors.len());
        for err in &result.errors {
            match err.agent_id {
                Some(id) => eprintln!("  agent {}: {}", id, err.message),
                None => eprintln!("  {}", err.message),
            }
        }
    }

    if result.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

/// Run the serve command.
async fn run_serve(config_path: &str, listen: Option<SocketAddr>) -> ExitCode {
    let config = match HostConfig::load(Path::new(config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };

    let server = Arc::new(WebhookServer::from_config(&config));
    log_config_loaded!(path = config_path, agents = server.agent_count());

    let addr = listen.unwrap_or(config.listen);

    // Bind the listener
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("error: failed to bind to {}: {}", addr, e);
            return ExitCode::from(1);
        }
    };

    log_listening!(address = %addr);

    serve(server, listener).await;
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config, format } => run_validate(&config, &format),
        Commands::Serve {
            config,
            listen,
            log_level,
            log_format,
        } => {
            let Some(log_format) = LogFormat::parse(&log_format) else {
                eprintln!("error: invalid log format: {}", log_format);
                return ExitCode::from(1);
            };

            let telemetry = TelemetryConfig::new()
                .with_service_name(env!("CARGO_PKG_NAME"))
                .with_log_level(log_level)
                .with_log_format(log_format);
            if let Err(e) = rawhook_telemetry::init(&telemetry) {
                eprintln!("error: {}", e);
                return ExitCode::from(1);
            }

            log_startup!(
                service = %telemetry.service_name,
                version = env!("CARGO_PKG_VERSION")
            );

            run_serve(&config, listen).await
        }
    }
}
