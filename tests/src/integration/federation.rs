//! # Federation Scenarios
//!
//! Central and peer nodes wired over an in-process loopback network:
//! subscription relay, remote calls, remote outcome sync, heartbeat
//! eviction, cross connection discovery and the cross connection breaker.

#[cfg(test)]
mod tests {
    use crate::integration::{eventually, init_test_logging, Tally};
    use bus_federation::topics::SYNC_CALL_HEADER;
    use bus_federation::{
        BridgeEndpoint, FederationConfig, FederationNode, LoopbackNetwork, TypeRegistry,
    };
    use bus_storage::{install_storage, open_in_memory, StorageConfig, StorageHandle};
    use bus_types::{DeliveryOptions, Envelope, MessageStatus, Payload};
    use message_bus::{receiver_fn, MessageBus, MessageStorage};
    use std::sync::Arc;
    use std::time::Duration;

    const CENTRAL: (&str, u16) = ("10.0.0.1", 9000);

    struct Node {
        bus: MessageBus,
        node: FederationNode,
    }

    fn central_config(max_age: Option<Duration>) -> FederationConfig {
        FederationConfig {
            node_address: CENTRAL.0.to_string(),
            node_port: CENTRAL.1,
            cross_connections: true,
            heartbeat_max_age: max_age,
            ..FederationConfig::default()
        }
    }

    fn peer_config(address: &str, port: u16) -> FederationConfig {
        FederationConfig {
            node_address: address.to_string(),
            node_port: port,
            central_address: Some(CENTRAL.0.to_string()),
            central_port: CENTRAL.1,
            heartbeat_rate: None,
            ..FederationConfig::default()
        }
    }

    /// Bind the node's endpoint first, so anything the central node sends
    /// back while the node is still starting finds it.
    async fn start(
        network: &Arc<LoopbackNetwork>,
        types: &Arc<TypeRegistry>,
        config: FederationConfig,
    ) -> Node {
        init_test_logging();
        let bus = MessageBus::with_defaults().unwrap();
        let transport = network.transport(&config.node_address);
        let endpoint = Arc::new(
            BridgeEndpoint::new(bus.downgrade(), types.clone())
                .with_status_reports(transport.clone(), config.node_port),
        );
        network.bind(&config.node_address, config.node_port, endpoint);
        let node = FederationNode::start(&bus, config, transport, types.clone())
            .await
            .unwrap();
        Node { bus, node }
    }

    fn fixture() -> (Arc<LoopbackNetwork>, Arc<TypeRegistry>) {
        let types = TypeRegistry::with_builtins();
        // The scenarios send `u32` payloads across the bridge.
        types.register::<u32>("U32");
        (LoopbackNetwork::new(), Arc::new(types))
    }

    // =============================================================================
    // SUBSCRIPTION RELAY
    // =============================================================================

    /// A peer's local subscription makes the central node route the topic to
    /// it.
    #[tokio::test]
    async fn test_central_routes_to_peer_subscriber() {
        let (network, types) = fixture();
        let central = start(&network, &types, central_config(None)).await;
        let peer = start(&network, &types, peer_config("10.0.0.2", 9002)).await;

        let tally = Tally::new();
        peer.bus
            .subscribe("Orders.Created", tally.receiver("orders"))
            .unwrap();
        assert!(eventually(|| central.bus.is_subscribed("Orders.Created")).await);

        central
            .bus
            .fire("Orders.Created", Some(Payload::new(7u32)), DeliveryOptions::default())
            .await
            .unwrap();

        assert!(eventually(|| tally.hits() == 1).await);
        assert_eq!(tally.topics(), vec!["Orders.Created"]);
    }

    /// A CALL crosses the bridge in callback mode and the caller gets the
    /// remote receiver's response.
    #[tokio::test]
    async fn test_remote_call_returns_peer_response() {
        let (network, types) = fixture();
        let central = start(&network, &types, central_config(None)).await;
        let peer = start(&network, &types, peer_config("10.0.0.2", 9002)).await;

        peer.bus
            .subscribe(
                "Echo.Ping",
                receiver_fn("echo", |envelope: &mut Envelope| {
                    envelope.response_mut().content = Some(Payload::new("pong".to_string()));
                    Ok(())
                }),
            )
            .unwrap();
        assert!(eventually(|| central.bus.is_subscribed("Echo.Ping")).await);

        let response = central
            .bus
            .fire_call("Echo.Ping", None, DeliveryOptions::default())
            .await
            .unwrap();

        assert!(response.is_successful());
        let content = response
            .content
            .as_ref()
            .and_then(|c| c.downcast_ref::<String>())
            .cloned();
        assert_eq!(content.as_deref(), Some("pong"));
    }

    /// Unsubscribing the last local receiver withdraws the route on the
    /// central node.
    #[tokio::test]
    async fn test_peer_unsubscribe_withdraws_route() {
        let (network, types) = fixture();
        let central = start(&network, &types, central_config(None)).await;
        let peer = start(&network, &types, peer_config("10.0.0.2", 9002)).await;

        let tally = Tally::new();
        let receiver = tally.receiver("orders");
        peer.bus.subscribe("Orders.Created", receiver.clone()).unwrap();
        assert!(eventually(|| central.bus.is_subscribed("Orders.Created")).await);

        assert!(peer.bus.unsubscribe("Orders.Created", &receiver));
        assert!(eventually(|| !central.bus.is_subscribed("Orders.Created")).await);
    }

    // =============================================================================
    // REMOTE OUTCOME SYNC
    // =============================================================================

    fn with_storage(node: &Node) -> StorageHandle {
        let config = StorageConfig {
            redelivery_period: Duration::from_secs(3600),
            ..StorageConfig::default()
        };
        install_storage(&node.bus, config, open_in_memory)
    }

    fn sync_call() -> DeliveryOptions {
        DeliveryOptions::builder()
            .notification()
            .header(SYNC_CALL_HEADER, "true")
            .build()
            .unwrap()
    }

    /// A sync call handed to a peer stays in storage as remote processing
    /// until the peer reports it finished, then it is removed.
    #[tokio::test]
    async fn test_remote_finish_clears_stored_message() {
        let (network, types) = fixture();
        let central = start(&network, &types, central_config(None)).await;
        let storage = with_storage(&central);
        let held = storage.storage().unwrap().clone();
        let peer = start(&network, &types, peer_config("10.0.0.2", 9002)).await;

        let tally = Tally::new();
        peer.bus
            .subscribe("Ledger.Entry", tally.receiver("ledger"))
            .unwrap();
        assert!(eventually(|| central.bus.is_subscribed("Ledger.Entry")).await);

        let envelope = Envelope::new("Ledger.Entry", Some(Payload::new(5u32)), sync_call());
        let id = envelope.id();
        let processed = central.bus.fire_envelope(envelope).await.unwrap().unwrap();

        assert_eq!(processed.status(), MessageStatus::RemoteProcessing);
        assert!(eventually(|| tally.hits() == 1).await);
        assert!(eventually(|| held.get_message_by_id(id).unwrap().is_none()).await);
    }

    /// A remote failure is reported back and the message stays eligible for
    /// redelivery.
    #[tokio::test]
    async fn test_remote_failure_keeps_message_for_redelivery() {
        let (network, types) = fixture();
        let central = start(&network, &types, central_config(None)).await;
        let storage = with_storage(&central);
        let held = storage.storage().unwrap().clone();
        let peer = start(&network, &types, peer_config("10.0.0.2", 9002)).await;

        let tally = Tally::new();
        peer.bus
            .subscribe("Ledger.Entry", tally.flaky("ledger", usize::MAX))
            .unwrap();
        assert!(eventually(|| central.bus.is_subscribed("Ledger.Entry")).await);

        let envelope = Envelope::new("Ledger.Entry", None, sync_call());
        let id = envelope.id();
        central.bus.fire_envelope(envelope).await.unwrap();

        let status = || {
            held.get_message_by_id(id)
                .unwrap()
                .map(|e| e.status())
        };
        assert!(eventually(|| status() == Some(MessageStatus::Error)).await);
        assert_eq!(held.get_unprocessed_messages().unwrap().len(), 1);
    }

    // =============================================================================
    // HEARTBEAT
    // =============================================================================

    /// A silent peer is evicted together with its subscriptions.
    #[tokio::test]
    async fn test_silent_peer_evicted() {
        let (network, types) = fixture();
        let central = start(
            &network,
            &types,
            central_config(Some(Duration::from_millis(100))),
        )
        .await;
        let peer = start(&network, &types, peer_config("10.0.0.2", 9002)).await;

        let tally = Tally::new();
        peer.bus
            .subscribe("Orders.Created", tally.receiver("orders"))
            .unwrap();
        let remote = central.node.remote_subscriptions().unwrap().clone();
        assert!(eventually(|| remote.sender("10.0.0.2", 9002).is_some()).await);

        assert!(eventually(|| remote.sender("10.0.0.2", 9002).is_none()).await);
        assert!(!central.bus.is_subscribed("Orders.Created"));
        assert_eq!(remote.node_count(), 0);
    }

    /// Regular heartbeats keep the peer registered well past max age.
    #[tokio::test]
    async fn test_heartbeats_keep_peer_alive() {
        let (network, types) = fixture();
        let central = start(
            &network,
            &types,
            central_config(Some(Duration::from_millis(150))),
        )
        .await;
        let config = FederationConfig {
            heartbeat_rate: Some(Duration::from_millis(20)),
            ..peer_config("10.0.0.2", 9002)
        };
        let peer = start(&network, &types, config).await;

        let tally = Tally::new();
        peer.bus
            .subscribe("Orders.Created", tally.receiver("orders"))
            .unwrap();
        let remote = central.node.remote_subscriptions().unwrap().clone();
        assert!(eventually(|| remote.sender("10.0.0.2", 9002).is_some()).await);

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(remote.sender("10.0.0.2", 9002).is_some());
        assert!(central.bus.is_subscribed("Orders.Created"));
    }

    // =============================================================================
    // CROSS CONNECTIONS
    // =============================================================================

    fn node_a() -> FederationConfig {
        FederationConfig {
            offers: vec!["Orders.Placed".to_string(), "Orders.Cancelled".to_string()],
            demands: vec!["Stock.Reserved".to_string()],
            ..peer_config("10.0.0.2", 9002)
        }
    }

    fn node_b() -> FederationConfig {
        FederationConfig {
            offers: vec!["Stock.Reserved".to_string()],
            demands: vec!["Orders.Placed".to_string()],
            ..peer_config("10.0.0.3", 9003)
        }
    }

    /// Central, A and B all started, with both directions of the cross
    /// connection open.
    async fn cross_connected() -> (Arc<LoopbackNetwork>, Node, Node, Node) {
        let (network, types) = fixture();
        let central = start(&network, &types, central_config(None)).await;
        let storage = central.node.cross_connections().unwrap().clone();

        let a = start(&network, &types, node_a()).await;
        assert!(eventually(|| storage.nodes().len() == 1).await);
        let b = start(&network, &types, node_b()).await;
        assert!(eventually(|| storage.nodes().len() == 2).await);

        let a_init = a.node.cross_connection_init().unwrap().clone();
        let b_init = b.node.cross_connection_init().unwrap().clone();
        assert!(eventually(|| b_init.sender("10.0.0.2", 9002).is_some()).await);
        assert!(eventually(|| a_init.sender("10.0.0.3", 9003).is_some()).await);
        (network, central, a, b)
    }

    /// Each side connects to the other for exactly the intersecting topics,
    /// and traffic flows directly.
    #[tokio::test]
    async fn test_cross_connection_opened_for_intersection() {
        let (_network, _central, a, b) = cross_connected().await;

        let to_a = b
            .node
            .cross_connection_init()
            .unwrap()
            .sender("10.0.0.2", 9002)
            .unwrap();
        assert_eq!(to_a.peer().subscriptions(), vec!["Orders.Placed"]);
        let to_b = a
            .node
            .cross_connection_init()
            .unwrap()
            .sender("10.0.0.3", 9003)
            .unwrap();
        assert_eq!(to_b.peer().subscriptions(), vec!["Stock.Reserved"]);
        assert!(b.bus.is_subscribed("Orders.Placed"));
        assert!(!b.bus.is_subscribed("Orders.Cancelled"));

        let tally = Tally::new();
        a.bus
            .subscribe("Orders.Placed", tally.receiver("placed"))
            .unwrap();
        b.bus
            .fire("Orders.Placed", Some(Payload::new(1u32)), DeliveryOptions::default())
            .await
            .unwrap();

        assert!(eventually(|| tally.hits() == 1).await);
    }

    /// With A unreachable, three consecutive failures open the breaker and
    /// B stops routing the topic.
    #[tokio::test]
    async fn test_cross_connection_breaks_after_failures() {
        let (network, _central, _a, b) = cross_connected().await;
        let to_a = b
            .node
            .cross_connection_init()
            .unwrap()
            .sender("10.0.0.2", 9002)
            .unwrap();

        assert!(network.unbind("10.0.0.2", 9002));
        for _ in 0..3 {
            let _ = b
                .bus
                .fire("Orders.Placed", None, DeliveryOptions::default())
                .await;
        }

        assert!(eventually(|| to_a.is_open()).await);
        assert!(!b.bus.is_subscribed("Orders.Placed"));
        assert!(to_a.peer().is_empty());
    }
}
