//! # Cross-Node Topology
//!
//! Discovery of direct peer-to-peer routes.
//!
//! A node *offers* the topics it serves and *demands* the topics it sends.
//! The central node remembers every announced [`CrossNode`]; whenever a new
//! one arrives it checks it against each known node in both directions and,
//! for every non-empty intersection, tells the demanding node about the
//! offering one on the demander's own "cross node up" topic. The demander
//! then opens a [`CrossConnectionSender`] straight to the offerer.
//!
//! ```text
//!   A offers {X, Y}, demands {Z}       B offers {Z}, demands {X}
//!
//!   central: B.offers ∩ A.demands = {Z} ──→ CrossNodeUp.A (content B)
//!            B.demands ∩ A.offers = {X} ──→ CrossNodeUp.B (content A)
//! ```

use crate::cross_sender::CrossConnectionSender;
use crate::link::BridgeLink;
use crate::remote::RemoteSubscriptionReceiver;
use crate::topics::{cross_node_up_topic, node_key, CROSS_NODE_DOWN_TOPIC, NODE_IP_HEADER};
use crate::transport::BridgeTransport;
use crate::wire::TypeRegistry;
use async_trait::async_trait;
use bus_types::entities::intersect;
use bus_types::{CrossNode, DeliveryOptions, Envelope, Payload, ReceiverError};
use dashmap::DashMap;
use message_bus::{Receiver, WeakMessageBus};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tracing::{info, warn};

fn cross_node_of(envelope: &Envelope) -> Result<CrossNode, ReceiverError> {
    envelope
        .content()
        .and_then(|c| c.downcast_ref::<CrossNode>())
        .cloned()
        .ok_or_else(|| ReceiverError::new("InvalidContent", "expected a CrossNode"))
}

/// One "cross node up" notification sent by the central node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossNodeUp {
    /// Node told to connect
    pub to: String,
    /// Node it should connect to
    pub about: String,
    /// Topics the connection will carry
    pub topics: BTreeSet<String>,
}

/// Central-node record of announced nodes.
pub struct CrossConnectionStorage {
    bus: WeakMessageBus,
    nodes: Mutex<Vec<CrossNode>>,
    remote: Option<Weak<RemoteSubscriptionReceiver>>,
}

impl CrossConnectionStorage {
    #[must_use]
    pub fn new(bus: WeakMessageBus) -> Self {
        Self {
            bus,
            nodes: Mutex::new(Vec::new()),
            remote: None,
        }
    }

    /// Make sure every announcing node has a peer sender on this node, so
    /// its "cross node up" topic is served even if the announcement beats
    /// the node's first subscription.
    #[must_use]
    pub fn with_remote_subscriptions(mut self, remote: &Arc<RemoteSubscriptionReceiver>) -> Self {
        self.remote = Some(Arc::downgrade(remote));
        self
    }

    /// Known nodes, in announcement order.
    #[must_use]
    pub fn nodes(&self) -> Vec<CrossNode> {
        self.nodes.lock().clone()
    }

    /// Forget a node. Returns false if it was unknown.
    pub fn forget(&self, address: &str, port: u16) -> bool {
        let mut nodes = self.nodes.lock();
        let before = nodes.len();
        nodes.retain(|n| !(n.address == address && n.port == port));
        before != nodes.len()
    }

    /// Record `node` and notify every pair with overlapping topics.
    /// A node announcing again replaces its earlier record.
    pub async fn register(&self, node: CrossNode) -> Vec<CrossNodeUp> {
        info!(
            address = %node.address,
            port = node.port,
            offers = node.offer_topics.len(),
            demands = node.demand_topics.len(),
            "Processing cross node"
        );
        if let Some(remote) = self.remote.as_ref().and_then(Weak::upgrade) {
            remote.ensure_sender(&node.address, node.port);
        }

        let known: Vec<CrossNode> = {
            let mut nodes = self.nodes.lock();
            nodes.retain(|n| !n.same_endpoint(&node));
            let known = nodes.clone();
            nodes.push(node.clone());
            known
        };

        let mut sent = Vec::new();
        for other in &known {
            let to_other = node.offers_to(other);
            if !to_other.is_empty() {
                self.notify(other, &node).await;
                sent.push(CrossNodeUp {
                    to: node_key(&other.address, other.port),
                    about: node_key(&node.address, node.port),
                    topics: to_other,
                });
            }
            let to_new = other.offers_to(&node);
            if !to_new.is_empty() {
                self.notify(&node, other).await;
                sent.push(CrossNodeUp {
                    to: node_key(&node.address, node.port),
                    about: node_key(&other.address, other.port),
                    topics: to_new,
                });
            }
        }
        sent
    }

    /// Tell `to` about `about` on `to`'s own "cross node up" topic.
    async fn notify(&self, to: &CrossNode, about: &CrossNode) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let topic = cross_node_up_topic(&to.address, to.port);
        let options = match DeliveryOptions::builder().asynchronous().point_to_point().build() {
            Ok(options) => options,
            Err(err) => {
                warn!(error = %err, "Could not build cross node options");
                return;
            }
        };
        info!(topic = %topic, about = %node_key(&about.address, about.port), "Cross node up");
        if let Err(err) = bus.fire(&topic, Some(Payload::new(about.clone())), options).await {
            warn!(topic = %topic, error = %err, "Cross node notification failed");
        }
    }
}

#[async_trait]
impl Receiver for CrossConnectionStorage {
    async fn receive(&self, envelope: &mut Envelope) -> Result<(), ReceiverError> {
        let mut node = cross_node_of(envelope)?;
        if envelope.topic() == CROSS_NODE_DOWN_TOPIC {
            if self.forget(&node.address, node.port) {
                info!(address = %node.address, port = node.port, "Cross node forgotten");
            }
            return Ok(());
        }
        if let Some(address) = envelope.header(NODE_IP_HEADER) {
            node.address = address.to_string();
        }
        self.register(node).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "cross-connection-storage"
    }
}

/// Peer-side handler of "cross node up" and "cross node down".
pub struct CrossConnectionInit {
    bus: WeakMessageBus,
    demands: Vec<String>,
    local_port: u16,
    break_threshold: u32,
    transport: Arc<dyn BridgeTransport>,
    types: Arc<TypeRegistry>,
    senders: DashMap<String, Arc<CrossConnectionSender>>,
}

impl CrossConnectionInit {
    #[must_use]
    pub fn new(
        bus: WeakMessageBus,
        demands: Vec<String>,
        local_port: u16,
        break_threshold: u32,
        transport: Arc<dyn BridgeTransport>,
        types: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            bus,
            demands,
            local_port,
            break_threshold,
            transport,
            types,
            senders: DashMap::new(),
        }
    }

    /// Live cross connection to `address:port`, if any.
    #[must_use]
    pub fn sender(&self, address: &str, port: u16) -> Option<Arc<CrossConnectionSender>> {
        self.senders
            .get(&node_key(address, port))
            .map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.senders.len()
    }

    /// Open a connection to `node` for the topics it offers and this node
    /// demands. Replaces an existing connection to the same node. Returns
    /// the topics connected.
    ///
    /// # Errors
    ///
    /// `ReceiverError` if the local bus rejects the subscriptions.
    pub fn connect(&self, node: &CrossNode) -> Result<BTreeSet<String>, ReceiverError> {
        let topics = intersect(&self.demands, &node.offer_topics);
        if topics.is_empty() {
            return Ok(topics);
        }
        self.disconnect(&node.address, node.port);

        warn!(
            address = %node.address,
            port = node.port,
            topics = ?topics,
            "Init cross connection"
        );
        let link = BridgeLink::new(
            node.address.clone(),
            node.port,
            self.local_port,
            self.transport.clone(),
            self.types.clone(),
        );
        let sender = CrossConnectionSender::new(link, self.bus.clone(), self.break_threshold);
        sender.attach(&topics)?;
        self.senders.insert(node_key(&node.address, node.port), sender);
        Ok(topics)
    }

    /// Tear down the connection to `address:port`. Returns false if there
    /// was none.
    pub fn disconnect(&self, address: &str, port: u16) -> bool {
        match self.senders.remove(&node_key(address, port)) {
            Some((_, sender)) => {
                sender.detach();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Receiver for CrossConnectionInit {
    async fn receive(&self, envelope: &mut Envelope) -> Result<(), ReceiverError> {
        let node = cross_node_of(envelope)?;
        if envelope.topic() == CROSS_NODE_DOWN_TOPIC {
            if self.disconnect(&node.address, node.port) {
                info!(address = %node.address, port = node.port, "Cross connection closed, node down");
            }
            return Ok(());
        }
        self.connect(&node)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "cross-connection-init"
    }
}
