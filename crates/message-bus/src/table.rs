//! # Receiver Table
//!
//! Startup code lists its receivers and their topics once, then applies the
//! whole table to a bus.
//!
//! ```ignore
//! ReceiverTable::new()
//!     .register(["Orders.Created", "Orders.Cancelled"], orders_receiver)
//!     .register(["Audit\\..*"], audit_receiver)
//!     .apply(&bus)?;
//! ```

use crate::dispatcher::MessageBus;
use crate::receiver::ReceiverRef;
use bus_types::BusError;
use tracing::info;

struct TableEntry {
    topics: Vec<String>,
    receiver: ReceiverRef,
}

/// Declarative list of `(topics, receiver)` registrations.
#[derive(Default)]
pub struct ReceiverTable {
    entries: Vec<TableEntry>,
}

impl ReceiverTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register<I, S>(mut self, topics: I, receiver: ReceiverRef) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.push(TableEntry {
            topics: topics.into_iter().map(Into::into).collect(),
            receiver,
        });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribe every entry. Returns the number of subscriptions made.
    ///
    /// # Errors
    ///
    /// The first `BusError::Registration` encountered; earlier entries stay
    /// subscribed.
    pub fn apply(&self, bus: &MessageBus) -> Result<usize, BusError> {
        let mut subscribed = 0;
        for entry in &self.entries {
            bus.subscribe_all(&entry.topics, &entry.receiver)?;
            subscribed += entry.topics.len();
            info!(
                receiver = entry.receiver.name(),
                topics = ?entry.topics,
                "Receiver registered from table"
            );
        }
        Ok(subscribed)
    }
}
