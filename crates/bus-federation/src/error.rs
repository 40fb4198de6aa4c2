//! # Federation Errors

use thiserror::Error;

/// Wire encoding and decoding failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Content of a Rust type with no registered type tag.
    #[error("No type tag registered for {0}")]
    UnregisteredType(String),

    /// Wire content tagged with a tag nobody registered.
    #[error("Unknown type tag {0}")]
    UnknownTag(String),

    #[error("Malformed wire data: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures delivering bytes to another node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing listens at the address.
    #[error("Node {address}:{port} is unreachable")]
    Unreachable { address: String, port: u16 },

    /// The remote endpoint refused the request.
    #[error("Node rejected message: {0}")]
    Rejected(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Failures starting a federated node.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("Invalid federation config: {0}")]
    Config(String),

    /// The local bus refused a subscription.
    #[error("Federation setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Bus(#[from] bus_types::BusError),
}
