//! # Delivery Policy Scenarios
//!
//! Broadcast failure isolation, STORE broadcast persistence and CALL
//! retry/exhaustion as seen by a producer.

#[cfg(test)]
mod tests {
    use crate::integration::Tally;
    use bus_storage::{install_storage, open_in_memory, StorageConfig};
    use bus_types::{DeliveryOptions, Envelope, MessageStatus, Response};
    use message_bus::{MessageBus, MessageStorage};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn capture() -> (Arc<Mutex<Vec<Response>>>, impl Fn(&Response) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |response: &Response| sink.lock().push(response.clone()))
    }

    // =============================================================================
    // BROADCAST ISOLATION
    // =============================================================================

    /// The second of three receivers fails; the first and third still run
    /// and the response records the failure.
    #[tokio::test]
    async fn test_broadcast_failure_does_not_stop_delivery() {
        let bus = MessageBus::with_defaults().unwrap();
        let first = Tally::new();
        let broken = Tally::new();
        let third = Tally::new();
        bus.subscribe("Audit.Event", first.receiver("first")).unwrap();
        bus.subscribe("Audit.Event", broken.flaky("broken", usize::MAX)).unwrap();
        bus.subscribe("Audit.Event", third.receiver("third")).unwrap();

        let options = DeliveryOptions::builder().broadcast().build().unwrap();
        let processed = bus
            .fire_envelope(Envelope::new("Audit.Event", None, options))
            .await
            .unwrap()
            .unwrap();

        assert_eq!((first.hits(), broken.hits(), third.hits()), (1, 1, 1));
        assert_eq!(processed.response().exception(), Some("Flaky"));
        assert!(!processed.response().is_successful());
        assert_eq!(processed.status(), MessageStatus::Error);
        assert_eq!(bus.metrics().snapshot().receiver_failures, 1);
    }

    /// A STORE broadcast that one receiver already finished is not parked
    /// again when a later receiver fails.
    #[tokio::test]
    async fn test_store_broadcast_late_failure_keeps_finished() {
        let bus = MessageBus::with_defaults().unwrap();
        let config = StorageConfig {
            redelivery_period: Duration::from_secs(3600),
            ..StorageConfig::default()
        };
        let handle = install_storage(&bus, config, open_in_memory);
        let storage = handle.storage().unwrap().clone();

        let first = Tally::new();
        let broken = Tally::new();
        bus.subscribe("Ledger.Posted", first.receiver("first")).unwrap();
        bus.subscribe("Ledger.Posted", broken.flaky("broken", usize::MAX)).unwrap();

        let options = DeliveryOptions::builder().notification().broadcast().build().unwrap();
        let envelope = Envelope::new("Ledger.Posted", None, options);
        let id = envelope.id();
        let processed = bus.fire_envelope(envelope).await.unwrap().unwrap();

        assert_eq!((first.hits(), broken.hits()), (1, 1));
        assert_eq!(processed.status(), MessageStatus::Finished);
        assert_eq!(processed.response().exception(), Some("Flaky"));
        assert!(storage.get_message_by_id(id).unwrap().is_none());
        assert!(storage.get_unprocessed_messages().unwrap().is_empty());
    }

    // =============================================================================
    // CALL RETRY AND EXHAUSTION
    // =============================================================================

    /// Two failures then success, with three attempts granted: finished, and
    /// the callback sees a clean response.
    #[tokio::test]
    async fn test_call_succeeds_within_redelivery_budget() {
        let bus = MessageBus::with_defaults().unwrap();
        let tally = Tally::new();
        bus.subscribe("Quote.Request", tally.flaky("quotes", 2)).unwrap();
        let (seen, callback) = capture();

        let options = DeliveryOptions::builder()
            .call()
            .redelivery_counter(3)
            .callback(callback)
            .build()
            .unwrap();
        let processed = bus
            .fire_envelope(Envelope::new("Quote.Request", None, options))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(tally.hits(), 3);
        assert_eq!(processed.status(), MessageStatus::Finished);
        let responses = seen.lock();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].is_successful());
    }

    /// Two failures with only two attempts: never finished, and the callback
    /// sees the exception headers.
    #[tokio::test]
    async fn test_call_exhaustion_reports_failure() {
        let bus = MessageBus::with_defaults().unwrap();
        let tally = Tally::new();
        bus.subscribe("Quote.Request", tally.flaky("quotes", 2)).unwrap();
        let (seen, callback) = capture();

        let options = DeliveryOptions::builder()
            .call()
            .redelivery_counter(2)
            .callback(callback)
            .build()
            .unwrap();
        let processed = bus
            .fire_envelope(Envelope::new("Quote.Request", None, options))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(tally.hits(), 2);
        assert_ne!(processed.status(), MessageStatus::Finished);
        assert_eq!(processed.redelivery_counter(), 0);
        let responses = seen.lock();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].exception(), Some("Flaky"));
        assert_eq!(responses[0].exception_message(), Some("attempt 1"));
    }

    /// `fire_call` hands back the response of an exhausted call instead of
    /// an error.
    #[tokio::test]
    async fn test_fire_call_returns_exhausted_response() {
        let bus = MessageBus::with_defaults().unwrap();
        let tally = Tally::new();
        bus.subscribe("Quote.Request", tally.flaky("quotes", usize::MAX)).unwrap();

        let options = DeliveryOptions::builder().redelivery_counter(4).build().unwrap();
        let response = bus.fire_call("Quote.Request", None, options).await.unwrap();

        assert_eq!(tally.hits(), 4);
        assert!(!response.is_successful());
    }
}
