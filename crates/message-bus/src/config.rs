//! Dispatcher configuration from environment variables.

use serde::Deserialize;
use std::env;

/// Default number of concurrently running async dispatches.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 16;

/// Configuration for one bus instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Upper bound on concurrently running async dispatches
    pub worker_pool_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_WORKER_POOL_SIZE`: async dispatch concurrency (default: 16)
    pub fn from_env() -> Self {
        Self {
            worker_pool_size: env::var("BUS_WORKER_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_WORKER_POOL_SIZE),
        }
    }

    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }
}
