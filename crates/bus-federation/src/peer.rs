//! # Peer Sender
//!
//! Central-node receiver standing in for one remote node. It is subscribed
//! locally to every topic the remote asked for and forwards matching
//! envelopes over the bridge. It also carries the remote's heartbeat time.

use crate::link::BridgeLink;
use async_trait::async_trait;
use bus_types::{Envelope, ReceiverError};
use message_bus::Receiver;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub struct PeerSender {
    name: String,
    link: BridgeLink,
    subscriptions: RwLock<BTreeSet<String>>,
    beat: Mutex<Instant>,
}

impl PeerSender {
    #[must_use]
    pub fn new(link: BridgeLink) -> Self {
        Self {
            name: format!("peer:{}", link.key()),
            link,
            subscriptions: RwLock::new(BTreeSet::new()),
            beat: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn link(&self) -> &BridgeLink {
        &self.link
    }

    #[must_use]
    pub fn address(&self) -> &str {
        self.link.address()
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.link.port()
    }

    /// Returns false if the topic was already held.
    pub fn add_subscription(&self, topic: &str) -> bool {
        self.subscriptions.write().insert(topic.to_string())
    }

    pub fn remove_subscription(&self, topic: &str) -> bool {
        self.subscriptions.write().remove(topic)
    }

    #[must_use]
    pub fn has_subscription(&self, topic: &str) -> bool {
        self.subscriptions.read().contains(topic)
    }

    /// Held topics, sorted.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().iter().cloned().collect()
    }

    /// Forget every topic, returning what was held.
    pub fn take_subscriptions(&self) -> Vec<String> {
        std::mem::take(&mut *self.subscriptions.write())
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Record a heartbeat now.
    pub fn beat(&self) {
        *self.beat.lock() = Instant::now();
        trace!(node = %self.link.key(), "Heartbeat updated");
    }

    #[must_use]
    pub fn beat_age(&self) -> Duration {
        self.beat.lock().elapsed()
    }

    /// True once the last heartbeat is older than `max_age`.
    #[must_use]
    pub fn is_beat_expired(&self, max_age: Duration) -> bool {
        self.beat_age() > max_age
    }

    /// True if `envelope` is on a held topic and did not come from this peer.
    #[must_use]
    pub fn should_send(&self, envelope: &Envelope) -> bool {
        if !self.has_subscription(envelope.topic()) {
            return false;
        }
        if self.link.originated_from(envelope) {
            debug!(
                id = %envelope.id(),
                node = %self.link.key(),
                "Not echoing message back to its origin"
            );
            return false;
        }
        true
    }
}

#[async_trait]
impl Receiver for PeerSender {
    async fn receive(&self, envelope: &mut Envelope) -> Result<(), ReceiverError> {
        if !self.should_send(envelope) {
            return Ok(());
        }
        self.link.forward(envelope).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
