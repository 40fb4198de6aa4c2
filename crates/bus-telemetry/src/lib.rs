//! # Bus Telemetry
//!
//! Logging bootstrap for processes embedding the bus. Every crate of the
//! workspace logs through `tracing`; this crate installs the subscriber
//! once per process.
//!
//! ```rust,ignore
//! use bus_telemetry::{init_logging, TelemetryConfig};
//!
//! init_logging(&TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUS_SERVICE_NAME` | `topic-bus` | Service name attached to startup logs |
//! | `BUS_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter directives |
//! | `BUS_JSON_LOGS` | `false` | JSON lines instead of human-readable output |
//! | `BUS_CONSOLE_OUTPUT` | `true` | Write logs to stdout at all |

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A global subscriber is already installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
