//! # Bridge Endpoint
//!
//! Inbound side of the bridge. A transport hands it the raw bytes it
//! received together with the sender's address; the endpoint decodes them
//! and fires the envelope on the local bus according to its mode:
//!
//! | Mode      | Local dispatch                 | Reply            |
//! |-----------|--------------------------------|------------------|
//! | ASYNC     | async, point-to-point          | none             |
//! | BROADCAST | async, broadcast               | none             |
//! | CALLBACK  | sync CALL                      | encoded response |
//!
//! An ASYNC or BROADCAST message carrying the sync call header is dispatched
//! synchronously in the background instead, and its outcome is reported to
//! the sender as a [`SyncStatus`]. That needs an endpoint built
//! [`with_status_reports`](BridgeEndpoint::with_status_reports).

use crate::error::TransportError;
use crate::link::BridgeLink;
use crate::sync::{self, SyncStatus};
use crate::topics::{BridgeMode, MODE_HEADER, NODE_IP_HEADER, NODE_PORT_HEADER, SYNC_CALL_HEADER};
use crate::transport::BridgeTransport;
use crate::wire::{TypeRegistry, WireEnvelope};
use bus_types::{BusError, DeliveryOptions, Envelope, MessageStatus, ReceiverError};
use message_bus::{MessageBus, WeakMessageBus};
use std::sync::Arc;
use tracing::{debug, warn};

/// How this node reaches back to a caller.
struct StatusReports {
    transport: Arc<dyn BridgeTransport>,
    local_port: u16,
}

/// Receives wire messages for one local bus.
pub struct BridgeEndpoint {
    bus: WeakMessageBus,
    types: Arc<TypeRegistry>,
    reports: Option<StatusReports>,
}

impl BridgeEndpoint {
    #[must_use]
    pub fn new(bus: WeakMessageBus, types: Arc<TypeRegistry>) -> Self {
        Self {
            bus,
            types,
            reports: None,
        }
    }

    /// Report outcomes of sync call messages back to their senders over
    /// `transport`. `local_port` is this node's own bridge port.
    #[must_use]
    pub fn with_status_reports(mut self, transport: Arc<dyn BridgeTransport>, local_port: u16) -> Self {
        self.reports = Some(StatusReports {
            transport,
            local_port,
        });
        self
    }

    /// Link back to the sender of `envelope`, if it asked for an outcome
    /// and this endpoint can report one.
    fn report_link(&self, remote_address: &str, envelope: &Envelope) -> Option<BridgeLink> {
        envelope.header(SYNC_CALL_HEADER)?;
        let reports = self.reports.as_ref()?;
        let Some(port) = envelope
            .header(NODE_PORT_HEADER)
            .and_then(|raw| raw.parse::<u16>().ok())
        else {
            warn!(id = %envelope.id(), from = remote_address, "Sync call without a usable sender port");
            return None;
        };
        Some(BridgeLink::new(
            remote_address,
            port,
            reports.local_port,
            reports.transport.clone(),
            self.types.clone(),
        ))
    }

    /// Dispatch synchronously in the background, then report the outcome.
    fn spawn_sync_call(bus: MessageBus, mut envelope: Envelope, broadcast: bool, link: BridgeLink) {
        tokio::spawn(async move {
            let mut builder = DeliveryOptions::builder().sync();
            if broadcast {
                builder = builder.broadcast();
            }
            let outcome = match builder.build() {
                Ok(options) => {
                    envelope.set_options(options);
                    let id = envelope.id();
                    match bus.fire_envelope(envelope).await {
                        Ok(Some(processed)) => SyncStatus::of(&processed),
                        Ok(None) | Err(_) => SyncStatus {
                            id,
                            status: MessageStatus::Error,
                        },
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Could not build sync call options");
                    SyncStatus {
                        id: envelope.id(),
                        status: MessageStatus::Error,
                    }
                }
            };
            sync::report(&link, outcome).await;
        });
    }

    /// Handle one inbound message from `remote_address`.
    ///
    /// # Errors
    ///
    /// `TransportError::Rejected` if the local bus is gone or the message
    /// cannot be decoded; `TransportError::Codec` if a reply cannot be
    /// encoded.
    pub async fn accept(
        &self,
        remote_address: &str,
        body: &[u8],
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let bus = self
            .bus
            .upgrade()
            .ok_or_else(|| TransportError::Rejected("bus is shut down".to_string()))?;
        let wire = WireEnvelope::from_bytes(body)
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        let mode = match wire.header(MODE_HEADER) {
            Some(raw) => raw.parse::<BridgeMode>().map_err(TransportError::Rejected)?,
            None => BridgeMode::Async,
        };
        let mut envelope = self
            .types
            .decode_envelope(wire)
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        envelope.set_header(NODE_IP_HEADER, remote_address);

        debug!(
            id = %envelope.id(),
            topic = %envelope.topic(),
            from = remote_address,
            mode = %mode,
            "Inbound bridge message"
        );

        if mode != BridgeMode::Callback {
            if let Some(link) = self.report_link(remote_address, &envelope) {
                Self::spawn_sync_call(bus, envelope, mode == BridgeMode::Broadcast, link);
                return Ok(None);
            }
        }

        let options = match mode {
            BridgeMode::Async => DeliveryOptions::builder().asynchronous().build(),
            BridgeMode::Broadcast => DeliveryOptions::builder().asynchronous().broadcast().build(),
            BridgeMode::Callback => DeliveryOptions::builder().sync().call().build(),
        }
        .map_err(|e| TransportError::Rejected(e.to_string()))?;
        envelope.set_options(options);

        match bus.fire_envelope(envelope.clone()).await {
            Ok(processed) if mode == BridgeMode::Callback => {
                let processed = processed.unwrap_or(envelope);
                let reply = self.types.encode_response(&processed)?;
                Ok(Some(reply.to_bytes()?))
            }
            Ok(_) => Ok(None),
            Err(BusError::NoSubscription { topic }) if mode == BridgeMode::Callback => {
                warn!(topic = %topic, from = remote_address, "Remote call for a topic nobody serves");
                envelope
                    .response_mut()
                    .record_failure(&ReceiverError::new("NoSubscription", format!("No subscribers for message {topic}")));
                let reply = self.types.encode_response(&envelope)?;
                Ok(Some(reply.to_bytes()?))
            }
            Err(err) => Err(TransportError::Rejected(err.to_string())),
        }
    }
}
