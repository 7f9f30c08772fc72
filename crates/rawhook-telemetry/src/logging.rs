//! Structured logging.
//!
//! Implements 12-factor app logging: structured JSON to stdout.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// Sets up tracing-subscriber with either JSON or pretty format,
/// respecting the configured log level.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => init_json_logging(filter),
        LogFormat::Pretty => init_pretty_logging(filter),
    }
}

/// Initialize JSON logging for production.
fn init_json_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Initialize pretty logging for development.
fn init_pretty_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Standard log event names.
pub mod events {
    /// Host is starting up.
    pub const STARTUP: &str = "startup";

    /// Agent configuration has been loaded and validated.
    pub const CONFIG_LOADED: &str = "config_loaded";

    /// Host is listening on a port.
    pub const LISTENING: &str = "listening";

    /// Web request has been answered.
    pub const REQUEST_COMPLETED: &str = "request_completed";

    /// An agent emitted an event.
    pub const EVENT_CREATED: &str = "event_created";

    /// An agent wrote to its log.
    pub const AGENT_LOG: &str = "agent_log";
}

/// Helper macros for structured logging with standard fields.
///
/// These wrap the tracing macros to ensure consistent field naming.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_config_loaded {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::CONFIG_LOADED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_listening {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::LISTENING,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_request_completed {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::REQUEST_COMPLETED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_event_created {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::EVENT_CREATED,
            $($field)*
        )
    };
}
