//! # Error Types
//!
//! Defines the error taxonomy shared across the bus crates.

use std::fmt;
use thiserror::Error;

/// Errors raised to callers of the bus.
///
/// Receiver failures are absent: they are captured into the
/// envelope's response and never escape an executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// Subscribe called with an empty topic or an unusable pattern.
    #[error("Registration failed: {0}")]
    Registration(String),

    /// CALL policy dispatched to a topic nobody listens to.
    #[error("No subscribers for message {topic}")]
    NoSubscription { topic: String },

    /// Delivery options violate an invariant (broadcast with callback).
    #[error("Invalid delivery options: {0}")]
    InvalidOptions(String),

    /// The bus was built outside a tokio runtime.
    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    /// Pluggable storage could not be initialized.
    #[error("Storage init failed: {0}")]
    StorageInit(String),
}

/// A failure raised inside a receiver.
///
/// Only the error's type identifier and message survive; both end up as
/// strings in the response headers. Any `std::error::Error` converts into it,
/// so receivers can use `?` freely.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceiverError {
    kind: String,
    message: String,
}

impl ReceiverError {
    /// Build a failure from an explicit kind and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Build a failure with a generic kind.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new("ReceiverError", message)
    }

    /// Type identifier of the original failure.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Human-readable message of the original failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl<E> From<E> for ReceiverError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::new(std::any::type_name::<E>(), err.to_string())
    }
}

impl fmt::Display for ReceiverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl fmt::Debug for ReceiverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}
