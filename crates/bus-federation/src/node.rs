//! # Federated Node
//!
//! Wires the bridge receivers onto a local bus for one of two roles.
//!
//! ```text
//!   central                                  peer
//!   ───────                                  ────
//!   RemoteSubscriptionReceiver               ClientSender
//!     Local.Http.Message.Subscribe             Global.Subscribe / Unsubscribe
//!     Local.Http.Message.Unsubscribe           Local.Http.Message.HeartBeat
//!     Local.Http.Message.HeartBeat             additional subscriptions
//!   heartbeat sweep                          heartbeat job
//!   CrossConnectionStorage (optional)        CrossConnectionInit (offers/demands)
//!     Local.Http.Message.CrossNode             own CrossNodeUp topic
//!     Local.Http.Message.CrossNodeDown         Local.Http.Message.CrossNodeDown
//!   SyncStatusReceiver                       SyncStatusReceiver
//!     Local.Http.Message.SyncStatus            Local.Http.Message.SyncStatus
//! ```
//!
//! Binding an endpoint to a transport is left to the caller.

use crate::client::ClientSender;
use crate::config::FederationConfig;
use crate::endpoint::BridgeEndpoint;
use crate::error::FederationError;
use crate::link::BridgeLink;
use crate::remote::RemoteSubscriptionReceiver;
use crate::sync::SyncStatusReceiver;
use crate::topics::{
    cross_node_up_topic, CROSS_NODE_DOWN_TOPIC, CROSS_NODE_TOPIC, HEARTBEAT_TOPIC,
    REMOTE_SUBSCRIBE_TOPIC, REMOTE_UNSUBSCRIBE_TOPIC, SYNC_STATUS_TOPIC,
};
use crate::topology::{CrossConnectionInit, CrossConnectionStorage};
use crate::transport::BridgeTransport;
use crate::wire::TypeRegistry;
use bus_types::headers::{SUBSCRIBE_TOPIC, UNSUBSCRIBE_TOPIC};
use bus_types::{CrossNode, DeliveryOptions, Payload};
use message_bus::{MessageBus, ReceiverRef};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Running federation components of one node. Dropping it stops the
/// background jobs.
pub struct FederationNode {
    config: FederationConfig,
    endpoint: Arc<BridgeEndpoint>,
    remote: Option<Arc<RemoteSubscriptionReceiver>>,
    storage: Option<Arc<CrossConnectionStorage>>,
    client: Option<Arc<ClientSender>>,
    init: Option<Arc<CrossConnectionInit>>,
    jobs: Vec<JoinHandle<()>>,
}

impl FederationNode {
    /// Start the role `config` describes.
    ///
    /// # Errors
    ///
    /// `FederationError` if the config is invalid or the bus rejects a
    /// subscription.
    pub async fn start(
        bus: &MessageBus,
        config: FederationConfig,
        transport: Arc<dyn BridgeTransport>,
        types: Arc<TypeRegistry>,
    ) -> Result<Self, FederationError> {
        if config.is_central() {
            Self::start_central(bus, config, transport, types)
        } else {
            Self::start_peer(bus, config, transport, types).await
        }
    }

    /// Start the central role.
    ///
    /// # Errors
    ///
    /// As [`FederationNode::start`].
    pub fn start_central(
        bus: &MessageBus,
        config: FederationConfig,
        transport: Arc<dyn BridgeTransport>,
        types: Arc<TypeRegistry>,
    ) -> Result<Self, FederationError> {
        config.validate()?;
        info!(
            address = %config.node_address,
            port = config.node_port,
            cross_connections = config.cross_connections,
            "Starting central node"
        );
        let endpoint = Self::wire_endpoint(bus, &config, &transport, &types)?;

        let remote = Arc::new(RemoteSubscriptionReceiver::new(
            bus.downgrade(),
            config.node_port,
            transport,
            types,
        ));
        let receiver: ReceiverRef = remote.clone();
        bus.subscribe_all(
            [REMOTE_SUBSCRIBE_TOPIC, REMOTE_UNSUBSCRIBE_TOPIC, HEARTBEAT_TOPIC],
            &receiver,
        )?;

        let mut jobs = Vec::new();
        if let Some(max_age) = config.heartbeat_max_age {
            jobs.push(remote.spawn_sweep(max_age, max_age));
        }

        let storage = if config.cross_connections {
            let storage = Arc::new(
                CrossConnectionStorage::new(bus.downgrade()).with_remote_subscriptions(&remote),
            );
            let receiver: ReceiverRef = storage.clone();
            bus.subscribe_all([CROSS_NODE_TOPIC, CROSS_NODE_DOWN_TOPIC], &receiver)?;
            Some(storage)
        } else {
            None
        };

        Ok(Self {
            config,
            endpoint,
            remote: Some(remote),
            storage,
            client: None,
            init: None,
            jobs,
        })
    }

    /// Start the peer role: relay interests to the central node, send
    /// heartbeats, and announce offers and demands if any.
    ///
    /// # Errors
    ///
    /// As [`FederationNode::start`].
    pub async fn start_peer(
        bus: &MessageBus,
        config: FederationConfig,
        transport: Arc<dyn BridgeTransport>,
        types: Arc<TypeRegistry>,
    ) -> Result<Self, FederationError> {
        config.validate()?;
        let central_address = config
            .central_address
            .clone()
            .ok_or_else(|| FederationError::Config("peer without central address".to_string()))?;
        info!(
            address = %config.node_address,
            port = config.node_port,
            central = %central_address,
            central_port = config.central_port,
            "Starting peer node"
        );
        let endpoint = Self::wire_endpoint(bus, &config, &transport, &types)?;

        let link = BridgeLink::new(
            central_address,
            config.central_port,
            config.node_port,
            transport.clone(),
            types.clone(),
        );
        let client = ClientSender::new(link, bus.downgrade());
        client
            .attach(
                [SUBSCRIBE_TOPIC, UNSUBSCRIBE_TOPIC, HEARTBEAT_TOPIC]
                    .into_iter()
                    .map(str::to_string)
                    .chain(config.additional_subscriptions.iter().cloned()),
            )
            .map_err(|e| FederationError::Setup(e.to_string()))?;

        let init = if config.announces_cross_node() {
            client
                .attach([CROSS_NODE_TOPIC])
                .map_err(|e| FederationError::Setup(e.to_string()))?;
            let init = Arc::new(CrossConnectionInit::new(
                bus.downgrade(),
                config.demands.clone(),
                config.node_port,
                config.break_threshold,
                transport,
                types,
            ));
            let receiver: ReceiverRef = init.clone();
            bus.subscribe_all(
                [
                    cross_node_up_topic(&config.node_address, config.node_port),
                    CROSS_NODE_DOWN_TOPIC.to_string(),
                ],
                &receiver,
            )?;
            Some(init)
        } else {
            None
        };

        client.relay_existing().await;

        if init.is_some() {
            let mut node = CrossNode::new(config.node_address.clone(), config.node_port)
                .offering(config.offers.iter())
                .demanding(config.demands.iter());
            if let Some(tag) = &config.tag {
                node = node.with_tag(tag.clone());
            }
            let options = DeliveryOptions::builder().asynchronous().broadcast().build()?;
            bus.fire(CROSS_NODE_TOPIC, Some(Payload::new(node)), options)
                .await?;
        }

        let mut jobs = Vec::new();
        if let Some(rate) = config.heartbeat_rate {
            jobs.push(client.spawn_heartbeat(rate));
        }

        Ok(Self {
            config,
            endpoint,
            remote: None,
            storage: None,
            client: Some(client),
            init,
            jobs,
        })
    }

    /// Endpoint reporting sync call outcomes, plus the receiver applying
    /// outcomes reported to this node.
    fn wire_endpoint(
        bus: &MessageBus,
        config: &FederationConfig,
        transport: &Arc<dyn BridgeTransport>,
        types: &Arc<TypeRegistry>,
    ) -> Result<Arc<BridgeEndpoint>, FederationError> {
        let receiver: ReceiverRef = Arc::new(SyncStatusReceiver::new(bus.downgrade()));
        bus.subscribe(SYNC_STATUS_TOPIC, receiver)?;
        Ok(Arc::new(
            BridgeEndpoint::new(bus.downgrade(), types.clone())
                .with_status_reports(transport.clone(), config.node_port),
        ))
    }

    #[must_use]
    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Inbound side to bind on a transport at `node_address:node_port`.
    /// Endpoints hold no state of their own, so a peer that must be
    /// reachable before it announces itself can bind a
    /// [`BridgeEndpoint`] built for the same bus ahead of `start`, with
    /// [`BridgeEndpoint::with_status_reports`] for sync call outcomes.
    #[must_use]
    pub fn endpoint(&self) -> Arc<BridgeEndpoint> {
        self.endpoint.clone()
    }

    #[must_use]
    pub fn remote_subscriptions(&self) -> Option<&Arc<RemoteSubscriptionReceiver>> {
        self.remote.as_ref()
    }

    #[must_use]
    pub fn cross_connections(&self) -> Option<&Arc<CrossConnectionStorage>> {
        self.storage.as_ref()
    }

    #[must_use]
    pub fn client(&self) -> Option<&Arc<ClientSender>> {
        self.client.as_ref()
    }

    #[must_use]
    pub fn cross_connection_init(&self) -> Option<&Arc<CrossConnectionInit>> {
        self.init.as_ref()
    }

    /// Stop the background jobs.
    pub fn shutdown(&mut self) {
        for job in self.jobs.drain(..) {
            job.abort();
        }
    }
}

impl Drop for FederationNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}
