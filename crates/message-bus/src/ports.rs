//! # Storage Ports
//!
//! The dispatcher persists through a [`StorageInterceptor`], which decides
//! what to keep, and which in turn writes to a [`MessageStorage`].
//! Both are synchronous: implementations are expected to be in-memory or to
//! buffer internally.
//!
//! Receiver failures can additionally be observed through a
//! [`ReceiverErrorHook`].

use bus_types::{Envelope, MessageStatus, ReceiverError};
use thiserror::Error;
use uuid::Uuid;

/// Storage backend failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend failure: {0}")]
    Backend(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store of envelopes, keyed by envelope id.
///
/// "Unprocessed" means status `Error` and a policy other than `Call`.
pub trait MessageStorage: Send + Sync {
    fn save_message(&self, envelope: &Envelope) -> Result<(), StorageError>;

    fn remove_message(&self, id: Uuid) -> Result<Option<Envelope>, StorageError>;

    fn get_message_by_id(&self, id: Uuid) -> Result<Option<Envelope>, StorageError>;

    fn get_unprocessed_messages(&self) -> Result<Vec<Envelope>, StorageError>;

    fn get_unprocessed_messages_by_topic(&self, topic: &str) -> Result<Vec<Envelope>, StorageError>;

    /// Envelopes on `topic` in status `Grouping`.
    fn get_grouping_messages_by_topic(&self, topic: &str) -> Result<Vec<Envelope>, StorageError>;
}

/// Persistence hook called by the delivery executors.
///
/// Best effort: implementations log storage failures instead of returning
/// them, so a broken store never fails a dispatch.
pub trait StorageInterceptor: Send + Sync {
    /// Persist an envelope that is about to be, or failed to be, delivered.
    fn store_message(&self, envelope: &Envelope);

    /// Persist an envelope after a receiver handled it.
    fn store_processed_message(&self, envelope: &Envelope);

    /// True if an envelope with this id is held in storage.
    fn contains(&self, id: Uuid) -> bool;

    /// Apply the final status a remote node reported for an envelope held
    /// in `RemoteProcessing`. Returns true if a held envelope was settled.
    fn settle_remote(&self, id: Uuid, status: MessageStatus) -> bool {
        let _ = (id, status);
        false
    }
}

/// Interceptor that keeps nothing. Installed until real storage is
/// configured, and as the fallback when storage fails to initialize.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorageInterceptor;

impl StorageInterceptor for NoopStorageInterceptor {
    fn store_message(&self, _: &Envelope) {}
    fn store_processed_message(&self, _: &Envelope) {}
    fn contains(&self, _: Uuid) -> bool {
        false
    }
}

/// Observer for receiver failures. Runs inline on the dispatching task after
/// the failure is logged and recorded in the response, so keep it short.
pub trait ReceiverErrorHook: Send + Sync {
    fn on_receiver_error(&self, receiver: &str, envelope: &Envelope, error: &ReceiverError);
}

impl<F> ReceiverErrorHook for F
where
    F: Fn(&str, &Envelope, &ReceiverError) + Send + Sync,
{
    fn on_receiver_error(&self, receiver: &str, envelope: &Envelope, error: &ReceiverError) {
        self(receiver, envelope, error);
    }
}
