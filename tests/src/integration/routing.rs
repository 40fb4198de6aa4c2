//! # Routing Scenarios
//!
//! Exact and pattern routing, round-robin fairness and the
//! no-subscription rules, driven through the public `MessageBus` API.

#[cfg(test)]
mod tests {
    use crate::integration::{eventually, Tally};
    use bus_types::{BusError, DeliveryOptions, Payload};
    use message_bus::MessageBus;
    use std::time::Duration;

    // =============================================================================
    // EXACT AND PATTERN ROUTING
    // =============================================================================

    /// An exact receiver gets each fire once, even with an overlapping pattern.
    #[tokio::test]
    async fn test_exact_routing_unaffected_by_patterns() {
        let bus = MessageBus::with_defaults().unwrap();
        let exact = Tally::new();
        let pattern = Tally::new();
        bus.subscribe("Orders.Created", exact.receiver("exact")).unwrap();
        bus.subscribe("Orders\\..*", pattern.receiver("pattern")).unwrap();

        for i in 0..3u32 {
            bus.fire("Orders.Created", Some(Payload::new(i)), DeliveryOptions::default())
                .await
                .unwrap();
        }

        assert_eq!(exact.hits(), 3);
        assert!(eventually(|| pattern.hits() == 3).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(exact.hits(), 3);
    }

    /// Pattern receivers see full matches only, and every one of them gets a
    /// copy: no round robin among patterns.
    #[tokio::test]
    async fn test_pattern_routing_full_match_only() {
        let bus = MessageBus::with_defaults().unwrap();
        let first = Tally::new();
        let second = Tally::new();
        bus.subscribe("Foo\\..*", first.receiver("first")).unwrap();
        bus.subscribe("Foo\\..*", second.receiver("second")).unwrap();

        for topic in ["Foo.Bar", "Foo.Baz.Qux", "FooBar", "Bar.Foo.Baz"] {
            bus.fire(topic, None, DeliveryOptions::default()).await.unwrap();
        }

        assert!(eventually(|| first.hits() == 2 && second.hits() == 2).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut seen = first.topics();
        seen.sort();
        assert_eq!(seen, vec!["Foo.Bar", "Foo.Baz.Qux"]);
        assert_eq!(second.hits(), 2);
    }

    // =============================================================================
    // ROUND ROBIN
    // =============================================================================

    /// Five receivers, six point-to-point fires: r1..r5 then back to r1.
    #[tokio::test]
    async fn test_round_robin_wraps_in_registration_order() {
        let bus = MessageBus::with_defaults().unwrap();
        let tallies: Vec<Tally> = (0..5).map(|_| Tally::new()).collect();
        for (i, tally) in tallies.iter().enumerate() {
            bus.subscribe("Work.Item", tally.receiver(&format!("r{}", i + 1)))
                .unwrap();
        }

        for step in 0..5 {
            bus.fire("Work.Item", None, DeliveryOptions::default()).await.unwrap();
            let counts: Vec<usize> = tallies.iter().map(Tally::hits).collect();
            let expected: Vec<usize> = (0..5).map(|i| usize::from(i <= step)).collect();
            assert_eq!(counts, expected, "after fire {}", step + 1);
        }

        bus.fire("Work.Item", None, DeliveryOptions::default()).await.unwrap();
        assert_eq!(tallies[0].hits(), 2);
        assert!(tallies[1..].iter().all(|p| p.hits() == 1));
    }

    /// A receiver subscribed twice holds two slots in the rotation until one
    /// registration is removed.
    #[tokio::test]
    async fn test_duplicate_subscription_weights_round_robin() {
        let bus = MessageBus::with_defaults().unwrap();
        let doubled = Tally::new();
        let single = Tally::new();
        let twice = doubled.receiver("doubled");
        bus.subscribe("Work.Item", twice.clone()).unwrap();
        bus.subscribe("Work.Item", twice.clone()).unwrap();
        bus.subscribe("Work.Item", single.receiver("single")).unwrap();

        for _ in 0..6 {
            bus.fire("Work.Item", None, DeliveryOptions::default()).await.unwrap();
        }
        assert_eq!((doubled.hits(), single.hits()), (4, 2));

        assert!(bus.unsubscribe("Work.Item", &twice));
        for _ in 0..4 {
            bus.fire("Work.Item", None, DeliveryOptions::default()).await.unwrap();
        }
        assert_eq!((doubled.hits(), single.hits()), (6, 4));
    }

    /// Broadcast reaches every receiver and leaves the rotation alone.
    #[tokio::test]
    async fn test_broadcast_reaches_every_receiver() {
        let bus = MessageBus::with_defaults().unwrap();
        let tallies: Vec<Tally> = (0..3).map(|_| Tally::new()).collect();
        for tally in &tallies {
            bus.subscribe("Work.Item", tally.receiver("r")).unwrap();
        }

        let options = DeliveryOptions::builder().broadcast().build().unwrap();
        bus.fire("Work.Item", None, options).await.unwrap();

        assert!(tallies.iter().all(|p| p.hits() == 1));
    }

    // =============================================================================
    // NO SUBSCRIPTION
    // =============================================================================

    /// VOID on an empty topic is silent; CALL fails.
    #[tokio::test]
    async fn test_no_subscription_semantics() {
        let bus = MessageBus::with_defaults().unwrap();

        let void = bus.fire("Nobody.Home", None, DeliveryOptions::default()).await;
        assert!(void.is_ok());

        let call = bus
            .fire_call("Nobody.Home", None, DeliveryOptions::default())
            .await;
        assert!(matches!(call, Err(BusError::NoSubscription { topic }) if topic == "Nobody.Home"));
        assert_eq!(bus.metrics().snapshot().no_subscription, 2);
    }

    /// After the last receiver leaves, CALL fails again.
    #[tokio::test]
    async fn test_unsubscribe_restores_no_subscription() {
        let bus = MessageBus::with_defaults().unwrap();
        let tally = Tally::new();
        let receiver = tally.receiver("echo");
        bus.subscribe("Echo", receiver.clone()).unwrap();

        assert!(bus.fire_call("Echo", None, DeliveryOptions::default()).await.is_ok());
        assert!(bus.unsubscribe("Echo", &receiver));

        let call = bus.fire_call("Echo", None, DeliveryOptions::default()).await;
        assert!(matches!(call, Err(BusError::NoSubscription { .. })));
        assert_eq!(tally.hits(), 1);
    }
}
