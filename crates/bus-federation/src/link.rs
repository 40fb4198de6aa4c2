//! # Bridge Link
//!
//! Outbound half shared by every sender: encode, stamp the bridge headers,
//! hand to the transport, and fold a reply back into the envelope's
//! response.

use crate::topics::{
    node_key, BridgeMode, MODE_HEADER, NODE_IP_HEADER, NODE_PORT_HEADER, SYNC_CALL_HEADER,
};
use crate::transport::BridgeTransport;
use crate::wire::{TypeRegistry, WireEnvelope};
use bus_types::{DeliveryPolicy, Envelope, MessageStatus, ReceiverError};
use std::sync::Arc;
use tracing::debug;

/// Connection to one remote node.
pub struct BridgeLink {
    address: String,
    port: u16,
    local_port: u16,
    transport: Arc<dyn BridgeTransport>,
    types: Arc<TypeRegistry>,
}

impl BridgeLink {
    /// `local_port` is this node's own bridge port, sent along so the
    /// remote side can reach back.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        port: u16,
        local_port: u16,
        transport: Arc<dyn BridgeTransport>,
        types: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            address: address.into(),
            port,
            local_port,
            transport,
            types,
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn key(&self) -> String {
        node_key(&self.address, self.port)
    }

    #[must_use]
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// True if `envelope` came over the bridge from this link's node.
    #[must_use]
    pub fn originated_from(&self, envelope: &Envelope) -> bool {
        envelope.header(NODE_IP_HEADER) == Some(self.address.as_str())
            && envelope.header(NODE_PORT_HEADER) == Some(self.port.to_string().as_str())
    }

    /// Bridge mode implied by an envelope's options.
    #[must_use]
    pub fn mode_for(envelope: &Envelope) -> BridgeMode {
        let options = envelope.options();
        if options.is_broadcast() {
            BridgeMode::Broadcast
        } else if options.callback().is_some() || options.policy() == DeliveryPolicy::Call {
            BridgeMode::Callback
        } else {
            BridgeMode::Async
        }
    }

    /// Forward `envelope` as is.
    ///
    /// # Errors
    ///
    /// Encoding or transport failures, a missing reply to a CALLBACK-mode
    /// message, or a remote reply carrying a captured failure.
    pub async fn forward(&self, envelope: &mut Envelope) -> Result<(), ReceiverError> {
        let wire = self.types.encode_envelope(envelope)?;
        let mode = Self::mode_for(envelope);
        self.send(envelope, wire, mode).await
    }

    /// Send a prepared wire envelope on behalf of `envelope`, whose response
    /// receives the reply.
    ///
    /// # Errors
    ///
    /// As [`BridgeLink::forward`].
    pub async fn send(
        &self,
        envelope: &mut Envelope,
        mut wire: WireEnvelope,
        mode: BridgeMode,
    ) -> Result<(), ReceiverError> {
        wire.headers.insert(MODE_HEADER.to_string(), mode.as_str().to_string());
        wire.headers
            .insert(NODE_PORT_HEADER.to_string(), self.local_port.to_string());
        wire.headers.remove(NODE_IP_HEADER);

        debug!(
            id = %envelope.id(),
            topic = %wire.topic,
            node = %self.key(),
            mode = %mode,
            "Sending message over bridge"
        );
        let reply = self
            .transport
            .deliver(&self.address, self.port, wire.to_bytes()?)
            .await?;

        match reply {
            Some(bytes) => {
                let response = self.types.decode_response(WireEnvelope::from_bytes(&bytes)?)?;
                let failure = response
                    .exception()
                    .map(|kind| ReceiverError::new(kind, response.exception_message().unwrap_or_default()));
                *envelope.response_mut() = response;
                match failure {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
            None if mode == BridgeMode::Callback => Err(ReceiverError::new(
                "MissingResponse",
                format!("Node {} did not answer message {}", self.key(), envelope.id()),
            )),
            None => {
                if envelope.header(SYNC_CALL_HEADER).is_some() {
                    envelope.set_status(MessageStatus::RemoteProcessing);
                }
                Ok(())
            }
        }
    }
}
