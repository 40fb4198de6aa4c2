//! Federation configuration.
//!
//! A node with a `central_address` is a peer; a node without one is the
//! central node. Durations are (de)serialized as milliseconds.

use crate::cross_sender::DEFAULT_BREAK_THRESHOLD;
use crate::error::FederationError;
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Bridge settings of one node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Address other nodes reach this node at
    pub node_address: String,

    /// Bridge port of this node
    pub node_port: u16,

    /// Central node address; `None` makes this node the central one
    pub central_address: Option<String>,

    /// Central node bridge port
    pub central_port: u16,

    /// Central: evict peers silent for longer than this; `None` never evicts
    #[serde(with = "opt_duration_ms")]
    pub heartbeat_max_age: Option<Duration>,

    /// Peer: heartbeat interval; `None` sends no heartbeats
    #[serde(with = "opt_duration_ms")]
    pub heartbeat_rate: Option<Duration>,

    /// Central: compute cross connections between announcing peers
    pub cross_connections: bool,

    /// Peer: topics this node serves to direct connections
    pub offers: Vec<String>,

    /// Peer: topics this node sends over direct connections
    pub demands: Vec<String>,

    /// Peer: free-form node label carried in the announcement
    pub tag: Option<String>,

    /// Consecutive failures before a direct connection is dropped
    pub break_threshold: u32,

    /// Peer: extra topics forwarded to the central node as they are
    pub additional_subscriptions: Vec<String>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            node_address: "127.0.0.1".to_string(),
            node_port: 9000,
            central_address: None,
            central_port: 9000,
            heartbeat_max_age: Some(Duration::from_secs(15)),
            heartbeat_rate: Some(Duration::from_secs(5)),
            cross_connections: false,
            offers: Vec::new(),
            demands: Vec::new(),
            tag: None,
            break_threshold: DEFAULT_BREAK_THRESHOLD,
            additional_subscriptions: Vec::new(),
        }
    }
}

impl FederationConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_NODE_ADDRESS`: this node's address (default: 127.0.0.1)
    /// - `BUS_NODE_PORT`: this node's bridge port (default: 9000)
    /// - `BUS_CENTRAL_ADDRESS`: central node address (default: unset, node is central)
    /// - `BUS_CENTRAL_PORT`: central node bridge port (default: 9000)
    /// - `BUS_HEARTBEAT_MAX_AGE_MS`: eviction age, 0 disables (default: 15000)
    /// - `BUS_HEARTBEAT_RATE_MS`: heartbeat interval, 0 disables (default: 5000)
    /// - `BUS_CROSS_CONNECTIONS`: (default: false)
    /// - `BUS_OFFERS`, `BUS_DEMANDS`, `BUS_ADDITIONAL_SUBSCRIPTIONS`: comma separated topics
    /// - `BUS_NODE_TAG`: node label
    /// - `BUS_BREAK_THRESHOLD`: (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            node_address: env::var("BUS_NODE_ADDRESS").unwrap_or(defaults.node_address),

            node_port: env::var("BUS_NODE_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.node_port),

            central_address: env::var("BUS_CENTRAL_ADDRESS")
                .ok()
                .filter(|v| !v.trim().is_empty()),

            central_port: env::var("BUS_CENTRAL_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.central_port),

            heartbeat_max_age: env_millis("BUS_HEARTBEAT_MAX_AGE_MS", defaults.heartbeat_max_age),

            heartbeat_rate: env_millis("BUS_HEARTBEAT_RATE_MS", defaults.heartbeat_rate),

            cross_connections: env::var("BUS_CROSS_CONNECTIONS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(defaults.cross_connections),

            offers: env_list("BUS_OFFERS"),

            demands: env_list("BUS_DEMANDS"),

            tag: env::var("BUS_NODE_TAG").ok().filter(|v| !v.is_empty()),

            break_threshold: env::var("BUS_BREAK_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.break_threshold),

            additional_subscriptions: env_list("BUS_ADDITIONAL_SUBSCRIPTIONS"),
        }
    }

    /// True if this node runs as the central node.
    #[must_use]
    pub fn is_central(&self) -> bool {
        self.central_address.is_none()
    }

    /// True if this peer takes part in direct connections.
    #[must_use]
    pub fn announces_cross_node(&self) -> bool {
        !self.offers.is_empty() || !self.demands.is_empty()
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// `FederationError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<(), FederationError> {
        if self.node_address.trim().is_empty() {
            return Err(FederationError::Config("node address is blank".to_string()));
        }
        if self.node_port == 0 {
            return Err(FederationError::Config("node port must be set".to_string()));
        }
        if let Some(central) = &self.central_address {
            if central == &self.node_address && self.central_port == self.node_port {
                return Err(FederationError::Config(
                    "peer points at itself as central node".to_string(),
                ));
            }
        }
        if self.break_threshold == 0 {
            return Err(FederationError::Config(
                "break threshold must be positive".to_string(),
            ));
        }
        if self.heartbeat_rate.is_some_and(|rate| rate.is_zero()) {
            return Err(FederationError::Config(
                "heartbeat rate must be positive, leave it unset to disable".to_string(),
            ));
        }
        if self.heartbeat_max_age.is_some_and(|age| age.is_zero()) {
            return Err(FederationError::Config(
                "heartbeat max age must be positive, leave it unset to disable".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_millis(name: &str, default: Option<Duration>) -> Option<Duration> {
    match env::var(name).ok().and_then(|v| v.parse::<u64>().ok()) {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => default,
    }
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
