//! # Storage Scenarios
//!
//! STORE duplicate suppression, scheduled redelivery and message grouping
//! with storage installed on a live bus.

#[cfg(test)]
mod tests {
    use crate::integration::{eventually, Tally};
    use bus_storage::{install_storage, open_in_memory, RedeliveryScheduler, StorageConfig};
    use bus_types::{DeliveryOptions, Envelope, GroupEntry, MessageStatus, Payload};
    use message_bus::{receiver_fn, MessageBus, MessageStorage, StorageError};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn quiet_config() -> StorageConfig {
        StorageConfig {
            redelivery_period: Duration::from_secs(3600),
            ..StorageConfig::default()
        }
    }

    fn store_options() -> DeliveryOptions {
        DeliveryOptions::builder().notification().build().unwrap()
    }

    // =============================================================================
    // STORE IDEMPOTENCE
    // =============================================================================

    /// A failed STORE envelope stays in storage; resubmitting the same id is
    /// skipped unless it carries the redelivery marker.
    #[tokio::test]
    async fn test_store_duplicate_skipped_unless_redelivery() {
        let bus = MessageBus::with_defaults().unwrap();
        let handle = install_storage(&bus, quiet_config(), open_in_memory);
        let storage = handle.storage().unwrap().clone();
        let tally = Tally::new();
        bus.subscribe("Invoice.Issued", tally.flaky("invoices", 1)).unwrap();

        let envelope = Envelope::new("Invoice.Issued", Some(Payload::new(42u32)), store_options());
        let id = envelope.id();

        bus.fire_envelope(envelope.clone()).await.unwrap();
        assert_eq!(tally.hits(), 1);
        let held = storage.get_message_by_id(id).unwrap().unwrap();
        assert_eq!(held.status(), MessageStatus::Error);

        bus.fire_envelope(envelope.clone()).await.unwrap();
        assert_eq!(tally.hits(), 1);
        assert_eq!(bus.metrics().snapshot().duplicates_skipped, 1);

        let processed = bus.redeliver(envelope).await.unwrap().unwrap();
        assert_eq!(tally.hits(), 2);
        assert_eq!(processed.status(), MessageStatus::Finished);
        assert!(storage.get_message_by_id(id).unwrap().is_none());
    }

    // =============================================================================
    // REDELIVERY
    // =============================================================================

    /// STORE without a subscriber is parked, then delivered by the scheduler
    /// once someone subscribes.
    #[tokio::test]
    async fn test_parked_message_redelivered_after_subscribe() {
        let bus = MessageBus::with_defaults().unwrap();
        let handle = install_storage(&bus, quiet_config(), open_in_memory);
        let interceptor = handle.interceptor().unwrap().clone();
        let scheduler = RedeliveryScheduler::new(bus.downgrade(), interceptor, Duration::from_secs(1), true);

        bus.fire("Invoice.Issued", None, store_options()).await.unwrap();
        let report = scheduler.tick().await;
        assert_eq!((report.resubmitted, report.skipped), (0, 1));

        let tally = Tally::new();
        bus.subscribe("Invoice.Issued", tally.receiver("invoices")).unwrap();
        let report = scheduler.tick().await;

        assert_eq!(report.resubmitted, 1);
        assert_eq!(tally.hits(), 1);
        assert!(handle.storage().unwrap().get_unprocessed_messages().unwrap().is_empty());
    }

    /// A receiver that never succeeds exhausts the counter and the message
    /// leaves the redelivery queue.
    #[tokio::test]
    async fn test_redelivery_exhaustion() {
        let bus = MessageBus::with_defaults().unwrap();
        let handle = install_storage(&bus, quiet_config(), open_in_memory);
        let scheduler = RedeliveryScheduler::new(
            bus.downgrade(),
            handle.interceptor().unwrap().clone(),
            Duration::from_secs(1),
            true,
        );
        let tally = Tally::new();
        bus.subscribe("Invoice.Issued", tally.flaky("invoices", usize::MAX)).unwrap();

        let options = DeliveryOptions::builder()
            .notification()
            .redelivery_counter(2)
            .build()
            .unwrap();
        bus.fire("Invoice.Issued", None, options).await.unwrap();

        let mut exhausted = 0;
        for _ in 0..4 {
            exhausted += scheduler.tick().await.exhausted;
        }

        assert_eq!(exhausted, 1);
        assert_eq!(tally.hits(), 3);
        assert_eq!(bus.metrics().snapshot().exhausted, 1);
        assert!(handle.storage().unwrap().get_unprocessed_messages().unwrap().is_empty());
    }

    /// Storage that fails to open leaves a working bus without persistence.
    #[tokio::test]
    async fn test_storage_failure_falls_back_to_noop() {
        let bus = MessageBus::with_defaults().unwrap();
        let handle = install_storage(&bus, quiet_config(), |_| -> Result<Arc<dyn MessageStorage>, StorageError> {
            Err(StorageError::Unavailable("disk gone".to_string()))
        });
        let tally = Tally::new();
        bus.subscribe("Invoice.Issued", tally.receiver("invoices")).unwrap();

        bus.fire("Invoice.Issued", None, store_options()).await.unwrap();

        assert!(handle.is_fallback());
        assert!(handle.storage().is_none());
        assert_eq!(tally.hits(), 1);
    }

    // =============================================================================
    // GROUPING
    // =============================================================================

    fn batches(bus: &MessageBus, topic: &str) -> mpsc::UnboundedReceiver<Vec<u32>> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(
            topic,
            receiver_fn("batches", move |envelope: &mut Envelope| {
                let items = envelope
                    .content()
                    .and_then(|c| c.downcast_ref::<Vec<Payload>>())
                    .map(|list| list.iter().filter_map(|p| p.downcast_ref::<u32>().copied()).collect())
                    .unwrap_or_default();
                let _ = tx.send(items);
                Ok(())
            }),
        )
        .unwrap();
        rx
    }

    /// Max size 3: the fourth message flushes all four in order and the
    /// single topic is left empty in storage.
    #[tokio::test]
    async fn test_grouping_flushes_on_size() {
        let bus = MessageBus::with_defaults().unwrap();
        let config = quiet_config().with_grouping(GroupEntry::new(
            "Metric.Sample",
            "Metric.Batch",
            3,
            Duration::from_secs(60),
        ));
        let handle = install_storage(&bus, config, open_in_memory);
        let mut received = batches(&bus, "Metric.Batch");

        for i in 0..4u32 {
            bus.fire("Metric.Sample", Some(Payload::new(i)), store_options())
                .await
                .unwrap();
        }

        let batch = tokio::time::timeout(Duration::from_secs(1), received.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch, vec![0, 1, 2, 3]);
        let storage = handle.storage().unwrap();
        assert!(storage.get_grouping_messages_by_topic("Metric.Sample").unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(received.try_recv().is_err());
    }

    /// Below max size, the scan job flushes once the oldest message is
    /// older than max time in queue.
    #[tokio::test]
    async fn test_grouping_flushes_on_age() {
        let bus = MessageBus::with_defaults().unwrap();
        let config = StorageConfig {
            grouping_scan_period: Some(Duration::from_millis(20)),
            ..quiet_config()
        }
        .with_grouping(GroupEntry::new(
            "Metric.Sample",
            "Metric.Batch",
            10,
            Duration::from_millis(80),
        ));
        let handle = install_storage(&bus, config, open_in_memory);
        let mut received = batches(&bus, "Metric.Batch");

        for i in 0..2u32 {
            bus.fire("Metric.Sample", Some(Payload::new(i)), store_options())
                .await
                .unwrap();
        }
        assert!(received.try_recv().is_err());

        let batch = tokio::time::timeout(Duration::from_secs(2), received.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch, vec![0, 1]);
        let grouper = handle.groupers()[0].clone();
        assert!(eventually(|| grouper.first_message_at().is_none()).await);
    }
}
