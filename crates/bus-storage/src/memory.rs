//! In-memory envelope storage backed by a concurrent map.

use crate::config::StorageConfig;
use bus_types::{DeliveryPolicy, Envelope, MessageStatus};
use dashmap::DashMap;
use message_bus::{MessageStorage, StorageError};
use std::sync::Arc;
use uuid::Uuid;

/// Storage opener for [`crate::install_storage`] using in-memory storage.
///
/// # Errors
///
/// Never fails; the signature matches fallible openers.
pub fn open_in_memory(_config: &StorageConfig) -> Result<Arc<dyn MessageStorage>, StorageError> {
    Ok(Arc::new(InMemoryMessageStorage::new()))
}

/// Envelopes keyed by id. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryMessageStorage {
    messages: DashMap<Uuid, Envelope>,
}

impl InMemoryMessageStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn collect<F>(&self, filter: F) -> Vec<Envelope>
    where
        F: Fn(&Envelope) -> bool,
    {
        self.messages
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn is_unprocessed(envelope: &Envelope) -> bool {
    envelope.status() == MessageStatus::Error && envelope.options().policy() != DeliveryPolicy::Call
}

impl MessageStorage for InMemoryMessageStorage {
    fn save_message(&self, envelope: &Envelope) -> Result<(), StorageError> {
        self.messages.insert(envelope.id(), envelope.clone());
        Ok(())
    }

    fn remove_message(&self, id: Uuid) -> Result<Option<Envelope>, StorageError> {
        Ok(self.messages.remove(&id).map(|(_, envelope)| envelope))
    }

    fn get_message_by_id(&self, id: Uuid) -> Result<Option<Envelope>, StorageError> {
        Ok(self.messages.get(&id).map(|entry| entry.value().clone()))
    }

    fn get_unprocessed_messages(&self) -> Result<Vec<Envelope>, StorageError> {
        Ok(self.collect(is_unprocessed))
    }

    fn get_unprocessed_messages_by_topic(&self, topic: &str) -> Result<Vec<Envelope>, StorageError> {
        Ok(self.collect(|e| e.topic() == topic && is_unprocessed(e)))
    }

    fn get_grouping_messages_by_topic(&self, topic: &str) -> Result<Vec<Envelope>, StorageError> {
        Ok(self.collect(|e| e.topic() == topic && e.status() == MessageStatus::Grouping))
    }
}
