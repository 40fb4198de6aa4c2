//! # Receiver Capability
//!
//! Anything that wants messages from the bus implements [`Receiver`].

use async_trait::async_trait;
use bus_types::{Envelope, ReceiverError};
use std::sync::Arc;

/// A message consumer.
///
/// A receiver may write response content and headers, and may move the
/// envelope to `Grouping` or `RemoteProcessing` to take over finalization.
/// Any returned error is captured into the response; it never reaches the
/// producer.
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn receive(&self, envelope: &mut Envelope) -> Result<(), ReceiverError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a receiver. Identity is the allocation, not the value.
pub type ReceiverRef = Arc<dyn Receiver>;

/// True if both handles point at the same receiver instance.
#[must_use]
pub fn same_receiver(a: &ReceiverRef, b: &ReceiverRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Adapts a synchronous closure into a receiver.
pub struct FnReceiver<F> {
    name: String,
    handler: F,
}

#[async_trait]
impl<F> Receiver for FnReceiver<F>
where
    F: Fn(&mut Envelope) -> Result<(), ReceiverError> + Send + Sync,
{
    async fn receive(&self, envelope: &mut Envelope) -> Result<(), ReceiverError> {
        (self.handler)(envelope)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build a receiver from a closure.
pub fn receiver_fn<F>(name: impl Into<String>, handler: F) -> ReceiverRef
where
    F: Fn(&mut Envelope) -> Result<(), ReceiverError> + Send + Sync + 'static,
{
    Arc::new(FnReceiver {
        name: name.into(),
        handler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_types::DeliveryOptions;

    #[test]
    fn test_identity_by_allocation() {
        let a = receiver_fn("a", |_| Ok(()));
        let b = receiver_fn("a", |_| Ok(()));
        let a2 = a.clone();

        assert!(same_receiver(&a, &a2));
        assert!(!same_receiver(&a, &b));
    }

    #[tokio::test]
    async fn test_fn_receiver_writes_response() {
        let receiver = receiver_fn("echo", |envelope: &mut Envelope| {
            let topic = envelope.topic().to_string();
            envelope
                .response_mut()
                .headers
                .insert("echo".to_string(), topic);
            Ok(())
        });
        let mut envelope = Envelope::new("Echo.Me", None, DeliveryOptions::default());

        receiver.receive(&mut envelope).await.unwrap();

        assert_eq!(receiver.name(), "echo");
        assert_eq!(
            envelope.response().headers.get("echo").map(String::as_str),
            Some("Echo.Me")
        );
    }
}
