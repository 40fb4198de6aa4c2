//! # Client Sender
//!
//! Peer-node side of the interest relay. Subscribed to the local
//! `Global.Subscribe` / `Global.Unsubscribe` notifications, it forwards each
//! subscription change to the central node so the central can route matching
//! traffic back here. It also carries heartbeats and any topic the node
//! wants handled centrally.
//!
//! Topics the client forwards itself are never relayed as subscriptions, or
//! the central would start sending them back. Sync status reports are
//! addressed to one node and are not relayed either.

use crate::link::BridgeLink;
use crate::topics::{
    HEARTBEAT_TOPIC, NODE_IP_HEADER, REMOTE_SUBSCRIBE_TOPIC, REMOTE_UNSUBSCRIBE_TOPIC,
    SYNC_STATUS_TOPIC,
};
use async_trait::async_trait;
use bus_types::headers::{SUBSCRIBE_TOPIC, SUBSCRIPTION_TOPIC_HEADER, UNSUBSCRIBE_TOPIC};
use bus_types::{DeliveryOptions, Envelope, Payload, ReceiverError};
use message_bus::{Receiver, ReceiverRef, WeakMessageBus};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const GLOBAL_PREFIX: &str = "Global.";

pub struct ClientSender {
    name: String,
    link: BridgeLink,
    bus: WeakMessageBus,
    relayed: RwLock<BTreeSet<String>>,
    forwards: RwLock<BTreeSet<String>>,
    this: Weak<ClientSender>,
}

impl ClientSender {
    /// `link` points at the central node.
    #[must_use]
    pub fn new(link: BridgeLink, bus: WeakMessageBus) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name: format!("client:{}", link.key()),
            link,
            bus,
            relayed: RwLock::new(BTreeSet::new()),
            forwards: RwLock::new(BTreeSet::new()),
            this: this.clone(),
        })
    }

    #[must_use]
    pub fn link(&self) -> &BridgeLink {
        &self.link
    }

    /// Topics currently registered with the central node, sorted.
    #[must_use]
    pub fn relayed(&self) -> Vec<String> {
        self.relayed.read().iter().cloned().collect()
    }

    /// Subscribe this client on the local bus for `topics`. Envelopes on
    /// these topics go to the central node as they are.
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
            if !topic.starts_with(GLOBAL_PREFIX) {
                self.forwards.write().insert(topic.to_string());
            }
            bus.subscribe(topic, receiver.clone())?;
        }
        Ok(())
    }

    fn should_relay(&self, topic: &str) -> bool {
        !topic.starts_with(GLOBAL_PREFIX)
            && topic != SYNC_STATUS_TOPIC
            && !self.forwards.read().contains(topic)
    }

    async fn relay(&self, remote_topic: &str, topic: &str) -> Result<(), ReceiverError> {
        let options = DeliveryOptions::builder()
            .header(SUBSCRIPTION_TOPIC_HEADER, topic)
            .build()?;
        let mut request = Envelope::new(remote_topic, Some(Payload::new(topic.to_string())), options);
        info!(request = remote_topic, topic = topic, central = %self.link.key(), "Relaying subscription");
        self.link.forward(&mut request).await
    }

    async fn on_subscribe(&self, topic: &str) -> Result<(), ReceiverError> {
        if !self.relayed.write().insert(topic.to_string()) {
            return Ok(());
        }
        let result = self.relay(REMOTE_SUBSCRIBE_TOPIC, topic).await;
        if result.is_err() {
            self.relayed.write().remove(topic);
        }
        result
    }

    async fn on_unsubscribe(&self, topic: &str) -> Result<(), ReceiverError> {
        let still_local = self.bus.upgrade().is_some_and(|bus| bus.is_subscribed(topic));
        if still_local || !self.relayed.write().remove(topic) {
            return Ok(());
        }
        self.relay(REMOTE_UNSUBSCRIBE_TOPIC, topic).await
    }

    /// Relay every topic already subscribed on the local bus, for
    /// subscriptions made before this client was attached. Returns the number
    /// of topics relayed.
    pub async fn relay_existing(&self) -> usize {
        let Some(bus) = self.bus.upgrade() else {
            return 0;
        };
        let mut relayed = 0;
        for topic in bus.registry().topics() {
            if !self.should_relay(&topic) || self.relayed.read().contains(&topic) {
                continue;
            }
            match self.on_subscribe(&topic).await {
                Ok(()) => relayed += 1,
                Err(err) => warn!(topic = %topic, error = %err, "Could not relay existing subscription"),
            }
        }
        relayed
    }

    /// Fire one heartbeat on the local bus. The client forwards it to the
    /// central node with the relayed topics as content.
    pub async fn heartbeat(&self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let options = match DeliveryOptions::builder().sync().broadcast().build() {
            Ok(options) => options,
            Err(err) => {
                error!(error = %err, "Could not build heartbeat options");
                return;
            }
        };
        if let Err(err) = bus
            .fire(HEARTBEAT_TOPIC, Some(Payload::new(self.relayed())), options)
            .await
        {
            error!(error = %err, "Heartbeat failed");
        }
    }

    /// Start the heartbeat loop. It ends once the bus is gone.
    pub fn spawn_heartbeat(self: &Arc<Self>, rate: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            info!(rate_ms = rate.as_millis() as u64, central = %this.link.key(), "Heartbeat started");
            let mut interval = tokio::time::interval(rate);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if this.bus.upgrade().is_none() {
                    info!("Bus dropped, heartbeat stopping");
                    break;
                }
                let tick = this.clone();
                if let Err(err) = tokio::spawn(async move { tick.heartbeat().await }).await {
                    error!(error = %err, "Heartbeat tick failed");
                }
            }
        })
    }
}

#[async_trait]
impl Receiver for ClientSender {
    async fn receive(&self, envelope: &mut Envelope) -> Result<(), ReceiverError> {
        if envelope.header(NODE_IP_HEADER).is_some() {
            debug!(id = %envelope.id(), topic = %envelope.topic(), "Message came over the bridge, not sending back");
            return Ok(());
        }
        let message = envelope.topic().to_string();
        match message.as_str() {
            SUBSCRIBE_TOPIC | UNSUBSCRIBE_TOPIC => {
                let Some(topic) = envelope.header(SUBSCRIPTION_TOPIC_HEADER).map(str::to_string) else {
                    return Err(ReceiverError::new("MissingHeader", SUBSCRIPTION_TOPIC_HEADER));
                };
                if !self.should_relay(&topic) {
                    return Ok(());
                }
                if message == SUBSCRIBE_TOPIC {
                    self.on_subscribe(&topic).await
                } else {
                    self.on_unsubscribe(&topic).await
                }
            }
            _ => self.link.forward(envelope).await,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::BridgeEndpoint;
    use crate::topics::NODE_PORT_HEADER;
    use crate::transport::LoopbackNetwork;
    use crate::wire::TypeRegistry;
    use message_bus::{receiver_fn, MessageBus};
    use tokio::sync::mpsc;

    struct Fixture {
        peer: MessageBus,
        _central: MessageBus,
        client: Arc<ClientSender>,
        seen: mpsc::UnboundedReceiver<(String, Option<String>, Option<String>)>,
    }

    fn fixture() -> Fixture {
        let network = LoopbackNetwork::new();
        let types = Arc::new(TypeRegistry::with_builtins());
        let central = MessageBus::with_defaults().unwrap();
        let (tx, seen) = mpsc::unbounded_channel();
        for topic in [REMOTE_SUBSCRIBE_TOPIC, REMOTE_UNSUBSCRIBE_TOPIC, HEARTBEAT_TOPIC] {
            let tx = tx.clone();
            central
                .subscribe(
                    topic,
                    receiver_fn("central", move |envelope| {
                        let _ = tx.send((
                            envelope.topic().to_string(),
                            envelope.header(SUBSCRIPTION_TOPIC_HEADER).map(str::to_string),
                            envelope.header(NODE_PORT_HEADER).map(str::to_string),
                        ));
                        Ok(())
                    }),
                )
                .unwrap();
        }
        network.bind(
            "10.0.0.1",
            9000,
            Arc::new(BridgeEndpoint::new(central.downgrade(), types.clone())),
        );

        let peer = MessageBus::with_defaults().unwrap();
        let link = BridgeLink::new("10.0.0.1", 9000, 9001, network.transport("10.0.0.2"), types);
        let client = ClientSender::new(link, peer.downgrade());
        client
            .attach([SUBSCRIBE_TOPIC, UNSUBSCRIBE_TOPIC, HEARTBEAT_TOPIC])
            .unwrap();
        Fixture {
            peer,
            _central: central,
            client,
            seen,
        }
    }

    async fn next(
        seen: &mut mpsc::UnboundedReceiver<(String, Option<String>, Option<String>)>,
    ) -> (String, Option<String>, Option<String>) {
        tokio::time::timeout(Duration::from_secs(1), seen.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_subscribe_is_relayed() {
        let mut f = fixture();

        f.peer
            .subscribe("Orders.Created", receiver_fn("orders", |_| Ok(())))
            .unwrap();

        let (topic, subscription, port) = next(&mut f.seen).await;
        assert_eq!(topic, REMOTE_SUBSCRIBE_TOPIC);
        assert_eq!(subscription.as_deref(), Some("Orders.Created"));
        assert_eq!(port.as_deref(), Some("9001"));
        assert_eq!(f.client.relayed(), vec!["Orders.Created"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_relayed_when_last_local_receiver_leaves() {
        let mut f = fixture();
        let receiver = receiver_fn("orders", |_| Ok(()));
        f.peer.subscribe("Orders.Created", receiver.clone()).unwrap();
        next(&mut f.seen).await;

        f.peer.unsubscribe("Orders.Created", &receiver);

        let (topic, subscription, _) = next(&mut f.seen).await;
        assert_eq!(topic, REMOTE_UNSUBSCRIBE_TOPIC);
        assert_eq!(subscription.as_deref(), Some("Orders.Created"));
        assert!(f.client.relayed().is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_topics_are_not_relayed() {
        let f = fixture();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(f.client.relayed().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_central() {
        let mut f = fixture();
        tokio::time::sleep(Duration::from_millis(20)).await;

        f.client.heartbeat().await;

        let (topic, _, port) = next(&mut f.seen).await;
        assert_eq!(topic, HEARTBEAT_TOPIC);
        assert_eq!(port.as_deref(), Some("9001"));
    }

    #[tokio::test]
    async fn test_relay_existing_subscriptions() {
        let mut f = fixture();
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.peer
            .registry()
            .subscribe("Early.Topic", receiver_fn("early", |_| Ok(())))
            .unwrap();

        assert_eq!(f.client.relay_existing().await, 1);
        let (topic, subscription, _) = next(&mut f.seen).await;
        assert_eq!(topic, REMOTE_SUBSCRIBE_TOPIC);
        assert_eq!(subscription.as_deref(), Some("Early.Topic"));
    }

    #[tokio::test]
    async fn test_bridged_envelopes_are_not_sent_back() {
        let f = fixture();
        let mut envelope = Envelope::new(HEARTBEAT_TOPIC, None, DeliveryOptions::default());
        envelope.set_header(NODE_IP_HEADER, "10.0.0.1");

        assert!(f.client.receive(&mut envelope).await.is_ok());
    }
}
