//! # Bus Federation
//!
//! Links message bus instances running in different processes.
//!
//! ## Roles
//!
//! - **Central node**: keeps a [`PeerSender`] per remote node, subscribed
//!   locally to whatever that node asked for, and evicts nodes whose
//!   heartbeat stops. Optionally computes direct routes between peers.
//! - **Peer node**: a [`ClientSender`] relays its local subscriptions to
//!   the central node and sends heartbeats. A peer announcing offered and
//!   demanded topics gets told about matching peers and opens a
//!   [`CrossConnectionSender`] straight to each of them.
//!
//! A message sent with the sync call header is parked as
//! `RemoteProcessing` by the sender until the remote node reports its
//! outcome back as a [`SyncStatus`].
//!
//! ## Wire
//!
//! Envelopes cross the bridge as JSON [`WireEnvelope`]s, content tagged via
//! the [`TypeRegistry`]. A [`BridgeTransport`] moves the bytes; the
//! in-process [`LoopbackNetwork`] is provided.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod config;
pub mod cross_sender;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod node;
pub mod peer;
pub mod remote;
pub mod sync;
pub mod topics;
pub mod topology;
pub mod transport;
pub mod wire;

pub use client::ClientSender;
pub use config::FederationConfig;
pub use cross_sender::{CrossConnectionSender, DEFAULT_BREAK_THRESHOLD};
pub use endpoint::BridgeEndpoint;
pub use error::{CodecError, FederationError, TransportError};
pub use link::BridgeLink;
pub use node::FederationNode;
pub use peer::PeerSender;
pub use remote::RemoteSubscriptionReceiver;
pub use sync::{SyncStatus, SyncStatusReceiver};
pub use topics::{cross_node_up_topic, node_key, BridgeMode};
pub use topology::{CrossConnectionInit, CrossConnectionStorage, CrossNodeUp};
pub use transport::{BridgeTransport, LoopbackNetwork, LoopbackTransport};
pub use wire::{TypeRegistry, WireEnvelope};
