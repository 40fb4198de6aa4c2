//! # Bridge Topics and Headers
//!
//! Names used on the wire between nodes. Every topic here is exact
//! (letters, digits and dots only).

use std::fmt;
use std::str::FromStr;

/// Peer to central: subscribe me to a topic.
pub const REMOTE_SUBSCRIBE_TOPIC: &str = "Local.Http.Message.Subscribe";

/// Peer to central: drop one of my subscriptions.
pub const REMOTE_UNSUBSCRIBE_TOPIC: &str = "Local.Http.Message.Unsubscribe";

/// Peer to central liveness signal, carrying the peer's relayed topics.
pub const HEARTBEAT_TOPIC: &str = "Local.Http.Message.HeartBeat";

/// Peer announcing its offered and demanded topics.
pub const CROSS_NODE_TOPIC: &str = "Local.Http.Message.CrossNode";

/// Prefix of the per-node "cross node up" topic.
pub const CROSS_NODE_UP_PREFIX: &str = "Local.Http.Message.CrossNodeUp";

/// Central broadcast when a peer is evicted.
pub const CROSS_NODE_DOWN_TOPIC: &str = "Local.Http.Message.CrossNodeDown";

/// Remote to caller: final status of a message sent with the sync call
/// header.
pub const SYNC_STATUS_TOPIC: &str = "Local.Http.Message.SyncStatus";

/// Bridge mode of a wire message, see [`BridgeMode`].
pub const MODE_HEADER: &str = "Local.Http.Header.Mode";

/// Address of the node a message came from. Stamped by the receiving endpoint.
pub const NODE_IP_HEADER: &str = "Local.Http.Header.NodeIP";

/// Bridge port of the node a message came from. Stamped by the sender.
pub const NODE_PORT_HEADER: &str = "Local.Http.Header.NodePort";

/// Caller expects the remote node to report the outcome later.
pub const SYNC_CALL_HEADER: &str = "Local.Http.Header.SyncCall";

/// The "cross node up" topic of one node.
///
/// Every non-alphanumeric character of the address becomes a `.` so the
/// result is an exact topic: `127.0.0.1:9001` gives
/// `Local.Http.Message.CrossNodeUp.127.0.0.1.9001`.
#[must_use]
pub fn cross_node_up_topic(address: &str, port: u16) -> String {
    let address: String = address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '.' })
        .collect();
    format!("{CROSS_NODE_UP_PREFIX}.{address}.{port}")
}

/// Map key identifying a node.
#[must_use]
pub fn node_key(address: &str, port: u16) -> String {
    format!("{address}:{port}")
}

/// How the receiving endpoint dispatches a wire message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BridgeMode {
    /// Async point-to-point, no response.
    #[default]
    Async,
    /// Synchronous CALL; the response travels back.
    Callback,
    /// Async broadcast, no response.
    Broadcast,
}

impl BridgeMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BridgeMode::Async => "ASYNC",
            BridgeMode::Callback => "CALLBACK",
            BridgeMode::Broadcast => "BROADCAST",
        }
    }
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASYNC" | "SIMPLE" => Ok(BridgeMode::Async),
            "CALLBACK" => Ok(BridgeMode::Callback),
            "BROADCAST" => Ok(BridgeMode::Broadcast),
            other => Err(format!("unknown bridge mode {other}")),
        }
    }
}
