//! # Bridge Transport
//!
//! The byte-moving capability the bridge is built on. A real deployment
//! plugs in a network client; [`LoopbackNetwork`] connects several buses in
//! one process, which is what the test suites use.

use crate::endpoint::BridgeEndpoint;
use crate::error::TransportError;
use crate::topics::node_key;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Delivers an encoded envelope to a node.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    /// Send `body` to the node at `address:port`. Returns the encoded reply
    /// for CALLBACK-mode messages, `None` otherwise.
    async fn deliver(
        &self,
        address: &str,
        port: u16,
        body: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, TransportError>;
}

/// In-process "network" of bridge endpoints keyed by address and port.
#[derive(Default)]
pub struct LoopbackNetwork {
    endpoints: DashMap<String, Arc<BridgeEndpoint>>,
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `endpoint` reachable at `address:port`.
    pub fn bind(&self, address: &str, port: u16, endpoint: Arc<BridgeEndpoint>) {
        info!(address = address, port = port, "Loopback endpoint bound");
        self.endpoints.insert(node_key(address, port), endpoint);
    }

    /// Take a node off the network. Returns false if nothing was bound.
    pub fn unbind(&self, address: &str, port: u16) -> bool {
        let removed = self.endpoints.remove(&node_key(address, port)).is_some();
        if removed {
            info!(address = address, port = port, "Loopback endpoint unbound");
        }
        removed
    }

    #[must_use]
    pub fn is_bound(&self, address: &str, port: u16) -> bool {
        self.endpoints.contains_key(&node_key(address, port))
    }

    /// A transport whose messages appear to come from `local_address`.
    #[must_use]
    pub fn transport(self: &Arc<Self>, local_address: &str) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            network: self.clone(),
            local_address: local_address.to_string(),
        })
    }
}

/// One node's view of a [`LoopbackNetwork`].
pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
    local_address: String,
}

#[async_trait]
impl BridgeTransport for LoopbackTransport {
    async fn deliver(
        &self,
        address: &str,
        port: u16,
        body: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        // Clone out of the map so no shard lock is held across the await.
        let endpoint = self
            .network
            .endpoints
            .get(&node_key(address, port))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::Unreachable {
                address: address.to_string(),
                port,
            })?;
        debug!(to = %node_key(address, port), bytes = body.len(), "Loopback delivery");
        endpoint.accept(&self.local_address, &body).await
    }
}
