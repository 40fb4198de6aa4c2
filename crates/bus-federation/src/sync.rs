//! # Remote Outcome Sync
//!
//! A message sent over the bridge with the sync call header gets no reply
//! on the spot. The sender parks it as `RemoteProcessing` and the remote
//! node reports the outcome later:
//!
//! ```text
//!   caller                                     remote
//!   ──────                                     ──────
//!   send (SyncCall header) ──────────────────→ endpoint: sync dispatch
//!   RemoteProcessing, kept in storage                 │
//!   SyncStatusReceiver ←── Local.Http.Message.SyncStatus { id, status }
//!   storage: Finished removes, Error keeps for redelivery
//! ```

use crate::link::BridgeLink;
use crate::topics::SYNC_STATUS_TOPIC;
use async_trait::async_trait;
use bus_types::{DeliveryOptions, Envelope, MessageStatus, Payload, ReceiverError};
use message_bus::{Receiver, WeakMessageBus};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of a remotely processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub id: Uuid,
    pub status: MessageStatus,
}

impl SyncStatus {
    /// Outcome to report for an envelope after local dispatch. Anything not
    /// delivered, including a topic nobody serves, is an error.
    #[must_use]
    pub fn of(processed: &Envelope) -> Self {
        let status = match processed.status() {
            MessageStatus::Finished | MessageStatus::Grouping | MessageStatus::RemoteProcessing => {
                MessageStatus::Finished
            }
            _ => MessageStatus::Error,
        };
        Self {
            id: processed.id(),
            status,
        }
    }
}

/// Send `outcome` back to the caller behind `link`. Failures are logged.
pub async fn report(link: &BridgeLink, outcome: SyncStatus) {
    let options = match DeliveryOptions::builder().asynchronous().build() {
        Ok(options) => options,
        Err(err) => {
            warn!(error = %err, "Could not build sync status options");
            return;
        }
    };
    let mut envelope = Envelope::new(SYNC_STATUS_TOPIC, Some(Payload::new(outcome)), options);
    debug!(id = %outcome.id, status = %outcome.status, node = %link.key(), "Reporting remote outcome");
    if let Err(err) = link.forward(&mut envelope).await {
        warn!(
            id = %outcome.id,
            node = %link.key(),
            error = %err,
            "Could not report remote outcome"
        );
    }
}

/// Applies reported outcomes to the local storage.
pub struct SyncStatusReceiver {
    bus: WeakMessageBus,
}

impl SyncStatusReceiver {
    #[must_use]
    pub fn new(bus: WeakMessageBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Receiver for SyncStatusReceiver {
    async fn receive(&self, envelope: &mut Envelope) -> Result<(), ReceiverError> {
        let outcome = envelope
            .content()
            .and_then(|c| c.downcast_ref::<SyncStatus>())
            .copied()
            .ok_or_else(|| ReceiverError::new("MissingContent", "sync status without outcome"))?;
        let Some(bus) = self.bus.upgrade() else {
            return Ok(());
        };
        if !bus.storage_interceptor().settle_remote(outcome.id, outcome.status) {
            debug!(id = %outcome.id, status = %outcome.status, "Remote outcome not applied yet");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "sync-status"
    }
}
