//! # Topic Registry
//!
//! Exact and pattern subscriptions for one bus instance.
//!
//! A topic made only of ASCII letters, digits and dots is *exact*. Anything
//! else is a *pattern*, compiled as a regular expression that must match the
//! whole topic.
//!
//! All mutation happens under the registry write lock. Dispatch reads clone
//! the receiver list, so iteration never observes a half-applied change.

use crate::receiver::{same_receiver, ReceiverRef};
use crate::round_robin::RoundRobinSelector;
use bus_types::BusError;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// How a topic string was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Exact,
    Pattern,
}

/// Classify a topic string.
#[must_use]
pub fn classify(topic: &str) -> TopicKind {
    if topic.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
        TopicKind::Exact
    } else {
        TopicKind::Pattern
    }
}

/// Receivers registered on one exact topic.
///
/// The same receiver may appear twice; each entry takes its own turn in
/// round robin.
pub struct Subscription {
    topic: String,
    receivers: RwLock<Vec<ReceiverRef>>,
    selector: RoundRobinSelector,
}

impl Subscription {
    fn new(topic: String) -> Self {
        Self {
            topic,
            receivers: RwLock::new(Vec::new()),
            selector: RoundRobinSelector::new(),
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Snapshot of the receivers in registration order.
    #[must_use]
    pub fn receivers(&self) -> Vec<ReceiverRef> {
        self.receivers.read().clone()
    }

    /// Next receiver in round-robin order.
    #[must_use]
    pub fn next_receiver(&self) -> Option<ReceiverRef> {
        let receivers = self.receivers.read();
        self.selector.next(&receivers).cloned()
    }

    /// All receivers for broadcast, otherwise the next round-robin one.
    #[must_use]
    pub fn receivers_by_mode(&self, broadcast: bool) -> Vec<ReceiverRef> {
        if broadcast {
            self.receivers()
        } else {
            self.next_receiver().into_iter().collect()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.receivers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receivers.read().is_empty()
    }

    fn push(&self, receiver: ReceiverRef) {
        self.receivers.write().push(receiver);
    }

    fn remove(&self, receiver: &ReceiverRef) -> bool {
        let mut receivers = self.receivers.write();
        match receivers.iter().position(|r| same_receiver(r, receiver)) {
            Some(index) => {
                receivers.remove(index);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("receivers", &self.len())
            .finish()
    }
}

struct PatternSubscription {
    pattern: String,
    regex: Regex,
    receivers: Vec<ReceiverRef>,
}

/// Thread-safe subscription table.
#[derive(Default)]
pub struct TopicRegistry {
    exact: RwLock<HashMap<String, Arc<Subscription>>>,
    patterns: RwLock<Vec<PatternSubscription>>,
}

impl TopicRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `receiver` on an exact topic or a pattern.
    ///
    /// # Errors
    ///
    /// `BusError::Registration` for an empty topic or a pattern that does not
    /// compile.
    pub fn subscribe(&self, topic: &str, receiver: ReceiverRef) -> Result<TopicKind, BusError> {
        if topic.is_empty() {
            return Err(BusError::Registration(
                "can't register receiver on empty topic".to_string(),
            ));
        }
        let kind = classify(topic);
        match kind {
            TopicKind::Exact => {
                let mut exact = self.exact.write();
                exact
                    .entry(topic.to_string())
                    .or_insert_with(|| Arc::new(Subscription::new(topic.to_string())))
                    .push(receiver);
            }
            TopicKind::Pattern => {
                let mut patterns = self.patterns.write();
                if let Some(entry) = patterns.iter_mut().find(|p| p.pattern == topic) {
                    entry.receivers.push(receiver);
                } else {
                    let regex = Regex::new(&format!("^(?:{topic})$")).map_err(|e| {
                        BusError::Registration(format!("invalid topic pattern {topic}: {e}"))
                    })?;
                    patterns.push(PatternSubscription {
                        pattern: topic.to_string(),
                        regex,
                        receivers: vec![receiver],
                    });
                }
            }
        }
        info!(topic = %topic, kind = ?kind, "Subscription added");
        Ok(kind)
    }

    /// Remove the first registration of `receiver` on `topic`.
    ///
    /// Returns false if it was not registered there. The topic entry is
    /// dropped once its last receiver is gone.
    pub fn unsubscribe(&self, topic: &str, receiver: &ReceiverRef) -> bool {
        let removed = match classify(topic) {
            TopicKind::Exact => {
                let mut exact = self.exact.write();
                let Some(subscription) = exact.get(topic) else {
                    return false;
                };
                let removed = subscription.remove(receiver);
                if subscription.is_empty() {
                    exact.remove(topic);
                }
                removed
            }
            TopicKind::Pattern => {
                let mut patterns = self.patterns.write();
                let Some(index) = patterns.iter().position(|p| p.pattern == topic) else {
                    return false;
                };
                let entry = &mut patterns[index];
                let position = entry
                    .receivers
                    .iter()
                    .position(|r| same_receiver(r, receiver));
                if let Some(position) = position {
                    entry.receivers.remove(position);
                }
                if entry.receivers.is_empty() {
                    patterns.remove(index);
                }
                position.is_some()
            }
        };
        if removed {
            info!(topic = %topic, "Subscription removed");
        }
        removed
    }

    /// The exact subscription for `topic`, if any.
    #[must_use]
    pub fn lookup_exact(&self, topic: &str) -> Option<Arc<Subscription>> {
        self.exact.read().get(topic).cloned()
    }

    /// Every receiver whose pattern fully matches `topic`, deduplicated,
    /// in registration order.
    #[must_use]
    pub fn lookup_pattern_receivers(&self, topic: &str) -> Vec<ReceiverRef> {
        let patterns = self.patterns.read();
        let mut matched: Vec<ReceiverRef> = Vec::new();
        for entry in patterns.iter().filter(|p| p.regex.is_match(topic)) {
            for receiver in &entry.receivers {
                if !matched.iter().any(|r| same_receiver(r, receiver)) {
                    matched.push(receiver.clone());
                }
            }
        }
        if !matched.is_empty() {
            debug!(topic = %topic, receivers = matched.len(), "Pattern receivers matched");
        }
        matched
    }

    /// True if an exact subscription exists for `topic`.
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.exact.read().contains_key(topic)
    }

    /// All exact topics currently subscribed.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.exact.read().keys().cloned().collect()
    }

    /// All registered patterns.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        self.patterns.read().iter().map(|p| p.pattern.clone()).collect()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.exact.write().clear();
        self.patterns.write().clear();
        info!("Registry cleared");
    }
}
