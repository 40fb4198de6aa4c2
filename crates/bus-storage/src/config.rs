//! Storage configuration.
//!
//! Durations are (de)serialized as milliseconds.

use bus_types::{BusError, GroupEntry};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::time::Duration;

/// Storage, redelivery and grouping settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Only topics fully matching this pattern are persisted
    pub topic_pattern: String,

    /// Wake interval of the redelivery scheduler
    #[serde(with = "duration_ms")]
    pub redelivery_period: Duration,

    /// Skip redelivery while a topic has no exact subscriber
    pub redelivery_only_if_receivers_exist: bool,

    /// Persist CALL envelopes too
    pub store_calls: bool,

    /// Remove processed envelopes instead of re-saving them
    pub remove_processed: bool,

    /// Wake interval of the grouping scan; `None` disables time-based flushes
    #[serde(with = "opt_duration_ms")]
    pub grouping_scan_period: Option<Duration>,

    /// Batching rules
    pub grouping: Vec<GroupEntry>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            topic_pattern: ".*".to_string(),
            redelivery_period: Duration::from_secs(10),
            redelivery_only_if_receivers_exist: true,
            store_calls: true,
            remove_processed: true,
            grouping_scan_period: None,
            grouping: Vec::new(),
        }
    }
}

impl StorageConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_STORAGE_TOPIC_PATTERN`: persisted topics (default: `.*`)
    /// - `BUS_STORAGE_REDELIVERY_PERIOD_MS`: redelivery interval (default: 10000)
    /// - `BUS_STORAGE_REDELIVERY_ONLY_IF_RECEIVERS`: (default: true)
    /// - `BUS_STORAGE_STORE_CALLS`: (default: true)
    /// - `BUS_STORAGE_REMOVE_PROCESSED`: (default: true)
    /// - `BUS_STORAGE_GROUPING_SCAN_PERIOD_MS`: grouping scan interval (default: disabled)
    ///
    /// Grouping rules are not read from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            topic_pattern: env::var("BUS_STORAGE_TOPIC_PATTERN").unwrap_or(defaults.topic_pattern),

            redelivery_period: env::var("BUS_STORAGE_REDELIVERY_PERIOD_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.redelivery_period),

            redelivery_only_if_receivers_exist: env_flag(
                "BUS_STORAGE_REDELIVERY_ONLY_IF_RECEIVERS",
                defaults.redelivery_only_if_receivers_exist,
            ),

            store_calls: env_flag("BUS_STORAGE_STORE_CALLS", defaults.store_calls),

            remove_processed: env_flag("BUS_STORAGE_REMOVE_PROCESSED", defaults.remove_processed),

            grouping_scan_period: env::var("BUS_STORAGE_GROUPING_SCAN_PERIOD_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis),

            grouping: defaults.grouping,
        }
    }

    #[must_use]
    pub fn with_grouping(mut self, entry: GroupEntry) -> Self {
        self.grouping.push(entry);
        self
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// `BusError::StorageInit` describing the first problem found.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.topic_pattern.trim().is_empty() {
            return Err(BusError::StorageInit("topic pattern is blank".to_string()));
        }
        Regex::new(&self.topic_pattern).map_err(|e| {
            BusError::StorageInit(format!("invalid topic pattern {}: {e}", self.topic_pattern))
        })?;
        if self.redelivery_period.is_zero() {
            return Err(BusError::StorageInit(
                "redelivery period must be positive".to_string(),
            ));
        }
        if self.grouping_scan_period.is_some_and(|p| p.is_zero()) {
            return Err(BusError::StorageInit(
                "grouping scan period must be positive".to_string(),
            ));
        }

        let mut singles = HashSet::new();
        for entry in &self.grouping {
            if entry.topic_single.is_empty() || entry.topic_list.is_empty() {
                return Err(BusError::StorageInit(
                    "grouping entry with empty topic".to_string(),
                ));
            }
            if entry.topic_single == entry.topic_list {
                return Err(BusError::StorageInit(format!(
                    "grouping entry {} delivers to itself",
                    entry.topic_single
                )));
            }
            if !singles.insert(entry.topic_single.as_str()) {
                return Err(BusError::StorageInit(format!(
                    "topic {} grouped twice",
                    entry.topic_single
                )));
            }
        }
        Ok(())
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
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
