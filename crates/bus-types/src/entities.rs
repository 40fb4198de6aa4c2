//! # Topology and Grouping Entities

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// A federated bus node and the topics it offers and demands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossNode {
    #[serde(default)]
    pub tag: Option<String>,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub offer_topics: Vec<String>,
    #[serde(default)]
    pub demand_topics: Vec<String>,
}

impl CrossNode {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            tag: None,
            address: address.into(),
            port,
            offer_topics: Vec::new(),
            demand_topics: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn offering<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.offer_topics = topics.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn demanding<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.demand_topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// True if both nodes listen on the same address and port.
    #[must_use]
    pub fn same_endpoint(&self, other: &CrossNode) -> bool {
        self.address == other.address && self.port == other.port
    }

    /// Topics `self` offers that `other` demands, sorted.
    #[must_use]
    pub fn offers_to(&self, other: &CrossNode) -> BTreeSet<String> {
        intersect(&self.offer_topics, &other.demand_topics)
    }
}

/// Set intersection of two topic lists.
#[must_use]
pub fn intersect(left: &[String], right: &[String]) -> BTreeSet<String> {
    let right: BTreeSet<&String> = right.iter().collect();
    left.iter()
        .filter(|topic| right.contains(topic))
        .cloned()
        .collect()
}

/// Batching rule: messages on `topic_single` are collected and delivered as
/// one list on `topic_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub topic_single: String,
    pub topic_list: String,
    /// Flush once more than this many messages are buffered.
    pub max_size: usize,
    /// Flush once the oldest buffered message is older than this.
    #[serde(with = "duration_millis")]
    pub max_time_in_queue: Duration,
}

impl GroupEntry {
    pub fn new(
        topic_single: impl Into<String>,
        topic_list: impl Into<String>,
        max_size: usize,
        max_time_in_queue: Duration,
    ) -> Self {
        Self {
            topic_single: topic_single.into(),
            topic_list: topic_list.into(),
            max_size,
            max_time_in_queue,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
