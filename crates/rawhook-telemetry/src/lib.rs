//! Logging infrastructure for the Rawhook webhook host.
//!
//! Structured JSON logs to stdout in production, pretty output for
//! development. `RUST_LOG` overrides the configured level.
//!
//! # Usage
//!
//! ```ignore
//! use rawhook_telemetry::{LogFormat, TelemetryConfig};
//!
//! let config = TelemetryConfig::new()
//!     .with_log_level("debug")
//!     .with_log_format(LogFormat::Pretty);
//!
//! rawhook_telemetry::init(&config)?;
//! ```

pub mod config;
pub mod logging;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::events;

use thiserror::Error;

/// Telemetry errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}

/// Initialize logging for the process.
///
/// Fails if a global subscriber is already installed.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    logging::init_logging(config)
}
