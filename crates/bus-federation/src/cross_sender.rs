//! # Cross Connection Sender
//!
//! Direct peer-to-peer sender created once two nodes learn they share
//! topics. Delivery runs behind a consecutive-failure breaker:
//!
//! ```text
//!   sent ─────→ counter reset to threshold
//!   failure ──→ counter - 1 ──→ 0 ──→ OPEN: unsubscribe from every topic,
//!                                     never deliver again
//! ```
//!
//! The breaker is independent of redelivery; a tripped sender does not
//! come back. A fresh "cross node up" creates a new one.
//!
//! Only envelopes produced on this node travel the direct connection.
//! Anything that already came over the bridge is left alone.

use crate::link::BridgeLink;
use crate::peer::PeerSender;
use crate::topics::NODE_IP_HEADER;
use async_trait::async_trait;
use bus_types::{Envelope, ReceiverError};
use message_bus::{Receiver, ReceiverRef, WeakMessageBus};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Default consecutive failures before the breaker opens.
pub const DEFAULT_BREAK_THRESHOLD: u32 = 3;

pub struct CrossConnectionSender {
    peer: PeerSender,
    bus: WeakMessageBus,
    threshold: u32,
    remaining: AtomicU32,
    open: AtomicBool,
    this: Weak<CrossConnectionSender>,
}

impl CrossConnectionSender {
    /// A zero threshold is treated as one.
    #[must_use]
    pub fn new(link: BridgeLink, bus: WeakMessageBus, threshold: u32) -> Arc<Self> {
        let threshold = threshold.max(1);
        Arc::new_cyclic(|this| Self {
            peer: PeerSender::new(link),
            bus,
            threshold,
            remaining: AtomicU32::new(threshold),
            open: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    #[must_use]
    pub fn peer(&self) -> &PeerSender {
        &self.peer
    }

    /// True once the breaker has opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Failures left before the breaker opens.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Subscribe this sender on the local bus for `topics`.
    ///
    /// # Errors
    ///
    /// `ReceiverError` if the bus is gone or a topic is rejected.
    pub fn attach<I, S>(&self, topics: I) -> Result<(), ReceiverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (Some(bus), Some(this)) = (self.bus.upgrade(), self.this.upgrade()) else {
            return Err(ReceiverError::msg("bus is shut down"));
        };
        let receiver: ReceiverRef = this;
        for topic in topics {
            let topic = topic.as_ref();
            if self.peer.add_subscription(topic) {
                bus.subscribe(topic, receiver.clone())?;
            }
        }
        Ok(())
    }

    /// Unsubscribe from every held topic. Idempotent.
    pub fn detach(&self) {
        let topics = self.peer.take_subscriptions();
        let (Some(bus), Some(this)) = (self.bus.upgrade(), self.this.upgrade()) else {
            return;
        };
        let receiver: ReceiverRef = this;
        bus.unsubscribe_all(&topics, &receiver);
        info!(node = %self.peer.link().key(), topics = topics.len(), "Cross connection detached");
    }

    fn trip(&self) {
        if self.open.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(
            node = %self.peer.link().key(),
            threshold = self.threshold,
            "Terminating cross connection"
        );
        self.detach();
    }
}

#[async_trait]
impl Receiver for CrossConnectionSender {
    async fn receive(&self, envelope: &mut Envelope) -> Result<(), ReceiverError> {
        if self.is_open() {
            return Ok(());
        }
        if envelope.header(NODE_IP_HEADER).is_some() {
            debug!(
                id = %envelope.id(),
                node = %self.peer.link().key(),
                "Bridged message not sent over cross connection"
            );
            return Ok(());
        }
        if !self.peer.should_send(envelope) {
            return Ok(());
        }
        match self.peer.link().forward(envelope).await {
            Ok(()) => {
                self.remaining.store(self.threshold, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                let left = self
                    .remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
                    .map_or(0, |previous| previous.saturating_sub(1));
                warn!(
                    node = %self.peer.link().key(),
                    error = %err,
                    remaining = left,
                    "Cross connection delivery failed"
                );
                if left == 0 {
                    self.trip();
                }
                Err(err)
            }
        }
    }

    fn name(&self) -> &str {
        self.peer.name()
    }
}
