//! # Remote Subscriptions
//!
//! Central-node side of the interest relay. Listens on the remote
//! subscribe, unsubscribe and heartbeat topics and keeps one [`PeerSender`]
//! per remote `address:port`, subscribed locally to whatever that node asked
//! for plus its own "cross node up" topic.
//!
//! A periodic sweep evicts nodes whose heartbeat is too old: all of their
//! subscriptions go, and `CrossNodeDown` is broadcast so peers holding a
//! direct connection to the dead node drop it too.

use crate::link::BridgeLink;
use crate::peer::PeerSender;
use crate::topics::{
    cross_node_up_topic, node_key, CROSS_NODE_DOWN_TOPIC, HEARTBEAT_TOPIC, NODE_IP_HEADER,
    NODE_PORT_HEADER, REMOTE_SUBSCRIBE_TOPIC, REMOTE_UNSUBSCRIBE_TOPIC,
};
use crate::transport::BridgeTransport;
use crate::wire::TypeRegistry;
use async_trait::async_trait;
use bus_types::headers::SUBSCRIPTION_TOPIC_HEADER;
use bus_types::{CrossNode, DeliveryOptions, Envelope, Payload, ReceiverError};
use dashmap::DashMap;
use message_bus::{MessageBus, Receiver, ReceiverRef, WeakMessageBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct RemoteSubscriptionReceiver {
    bus: WeakMessageBus,
    local_port: u16,
    transport: Arc<dyn BridgeTransport>,
    types: Arc<TypeRegistry>,
    senders: DashMap<String, Arc<PeerSender>>,
}

impl RemoteSubscriptionReceiver {
    #[must_use]
    pub fn new(
        bus: WeakMessageBus,
        local_port: u16,
        transport: Arc<dyn BridgeTransport>,
        types: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            bus,
            local_port,
            transport,
            types,
            senders: DashMap::new(),
        }
    }

    #[must_use]
    pub fn sender(&self, address: &str, port: u16) -> Option<Arc<PeerSender>> {
        self.senders
            .get(&node_key(address, port))
            .map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.senders.len()
    }

    /// Keys of the known remote nodes, sorted.
    #[must_use]
    pub fn nodes(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.senders.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn new_sender(&self, address: &str, port: u16) -> Arc<PeerSender> {
        Arc::new(PeerSender::new(BridgeLink::new(
            address,
            port,
            self.local_port,
            self.transport.clone(),
            self.types.clone(),
        )))
    }

    /// Get or create the sender of `address:port`. A new sender is
    /// subscribed to the node's "cross node up" topic right away.
    pub fn ensure_sender(&self, address: &str, port: u16) -> Arc<PeerSender> {
        let key = node_key(address, port);
        if let Some(existing) = self.senders.get(&key) {
            return existing.value().clone();
        }
        let sender = self
            .senders
            .entry(key)
            .or_insert_with(|| {
                info!(address = address, port = port, "Creating new subscriber for node");
                self.new_sender(address, port)
            })
            .value()
            .clone();
        self.attach(&sender, &cross_node_up_topic(address, port));
        sender
    }

    fn attach(&self, sender: &Arc<PeerSender>, topic: &str) {
        if !sender.add_subscription(topic) {
            return;
        }
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let receiver: ReceiverRef = sender.clone();
        if let Err(err) = bus.subscribe(topic, receiver) {
            sender.remove_subscription(topic);
            warn!(topic = topic, error = %err, "Remote subscription rejected");
        }
    }

    fn detach(&self, sender: &Arc<PeerSender>, topic: &str) {
        if !sender.remove_subscription(topic) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            let receiver: ReceiverRef = sender.clone();
            bus.unsubscribe(topic, &receiver);
        }
    }

    /// Subscribe a known remote node to `topic` on its behalf. Returns false
    /// if the node is unknown.
    pub fn subscribe_remote_node(&self, address: &str, port: u16, topic: &str) -> bool {
        match self.sender(address, port) {
            Some(sender) => {
                self.attach(&sender, topic);
                true
            }
            None => false,
        }
    }

    fn on_subscribe(&self, address: &str, port: u16, topic: &str) {
        let sender = self.ensure_sender(address, port);
        self.attach(&sender, topic);
    }

    fn on_unsubscribe(&self, address: &str, port: u16, topic: &str) {
        let Some(sender) = self.sender(address, port) else {
            return;
        };
        self.detach(&sender, topic);

        let up_topic = cross_node_up_topic(address, port);
        let only_up_left = sender.subscriptions().iter().all(|t| *t == up_topic);
        if only_up_left {
            info!(address = address, port = port, "Removing subscriber for node");
            self.detach(&sender, &up_topic);
            self.senders.remove(&node_key(address, port));
        }
    }

    fn on_heartbeat(&self, address: &str, port: u16, envelope: &Envelope) {
        if let Some(sender) = self.sender(address, port) {
            sender.beat();
            return;
        }
        let Some(topics) = envelope.content().and_then(|c| c.downcast_ref::<Vec<String>>()) else {
            error!(
                address = address,
                port = port,
                "Cannot reinit connection, heartbeat carries no subscriptions"
            );
            return;
        };
        info!(address = address, port = port, topics = topics.len(), "Reinit connection");
        let sender = self.ensure_sender(address, port);
        for topic in topics {
            self.attach(&sender, topic);
        }
    }

    /// Evict every node whose heartbeat is older than `max_age`. Returns the
    /// evicted node keys.
    pub async fn sweep(&self, max_age: Duration) -> Vec<String> {
        let expired: Vec<Arc<PeerSender>> = self
            .senders
            .iter()
            .filter(|entry| entry.value().is_beat_expired(max_age))
            .map(|entry| entry.value().clone())
            .collect();

        let mut evicted = Vec::new();
        for sender in expired {
            let key = sender.link().key();
            warn!(node = %key, age_ms = sender.beat_age().as_millis() as u64, "Killing node, heartbeat expired");
            if let Some(bus) = self.bus.upgrade() {
                let receiver: ReceiverRef = sender.clone();
                bus.unsubscribe_all(sender.take_subscriptions(), &receiver);
                self.senders.remove(&key);
                announce_down(&bus, sender.address(), sender.port()).await;
            } else {
                self.senders.remove(&key);
            }
            evicted.push(key);
        }
        evicted
    }

    /// Start the eviction loop. It ends once the bus is gone.
    pub fn spawn_sweep(self: &Arc<Self>, max_age: Duration, period: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            info!(max_age_ms = max_age.as_millis() as u64, "Heartbeat sweep started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if this.bus.upgrade().is_none() {
                    info!("Bus dropped, heartbeat sweep stopping");
                    break;
                }
                let tick = this.clone();
                if let Err(err) = tokio::spawn(async move { tick.sweep(max_age).await }).await {
                    error!(error = %err, "Heartbeat sweep tick failed");
                }
            }
        })
    }
}

async fn announce_down(bus: &MessageBus, address: &str, port: u16) {
    let options = match DeliveryOptions::builder().asynchronous().broadcast().build() {
        Ok(options) => options,
        Err(err) => {
            error!(error = %err, "Could not build cross node down options");
            return;
        }
    };
    let node = CrossNode::new(address, port);
    if let Err(err) = bus
        .fire(CROSS_NODE_DOWN_TOPIC, Some(Payload::new(node)), options)
        .await
    {
        warn!(address = address, port = port, error = %err, "Cross node down broadcast failed");
    }
}

fn origin(envelope: &Envelope) -> Result<(String, u16), ReceiverError> {
    let address = envelope
        .header(NODE_IP_HEADER)
        .ok_or_else(|| ReceiverError::new("MissingHeader", NODE_IP_HEADER))?;
    let port = envelope
        .header(NODE_PORT_HEADER)
        .ok_or_else(|| ReceiverError::new("MissingHeader", NODE_PORT_HEADER))?
        .parse::<u16>()?;
    Ok((address.to_string(), port))
}

#[async_trait]
impl Receiver for RemoteSubscriptionReceiver {
    async fn receive(&self, envelope: &mut Envelope) -> Result<(), ReceiverError> {
        let (address, port) = origin(envelope)?;
        let subscription = envelope.header(SUBSCRIPTION_TOPIC_HEADER).map(str::to_string);

        match envelope.topic() {
            REMOTE_SUBSCRIBE_TOPIC | REMOTE_UNSUBSCRIBE_TOPIC => {
                let topic = subscription
                    .ok_or_else(|| ReceiverError::new("MissingHeader", SUBSCRIPTION_TOPIC_HEADER))?;
                info!(
                    request = %envelope.topic(),
                    topic = %topic,
                    address = %address,
                    port = port,
                    "Remote subscription change"
                );
                if envelope.topic() == REMOTE_SUBSCRIBE_TOPIC {
                    self.on_subscribe(&address, port, &topic);
                } else {
                    self.on_unsubscribe(&address, port, &topic);
                }
            }
            HEARTBEAT_TOPIC => {
                debug!(address = %address, port = port, "Heartbeat");
                self.on_heartbeat(&address, port, envelope);
            }
            other => debug!(topic = other, "Ignoring message"),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "remote-subscriptions"
    }
}
