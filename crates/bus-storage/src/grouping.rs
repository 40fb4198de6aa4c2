//! # Message Grouping
//!
//! A [`GroupingReceiver`] listens on a group's single-item topic and parks
//! every arrival in storage with status `Grouping`. The batch is flushed as
//! one `Vec<Payload>` to the list topic when:
//!
//! - more than `max_size` messages are buffered (checked on arrival), or
//! - the oldest buffered message is older than `max_time_in_queue`
//!   (checked by [`GroupScanJob`]).
//!
//! Flushed envelopes are taken out of storage by removal, so two concurrent
//! flushes never deliver the same message twice.

use async_trait::async_trait;
use bus_types::{DeliveryOptions, Envelope, GroupEntry, MessageStatus, Payload, ReceiverError};
use chrono::{DateTime, Utc};
use message_bus::{MessageStorage, Receiver, WeakMessageBus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Buffers one group's messages and flushes them as a list.
pub struct GroupingReceiver {
    name: String,
    entry: GroupEntry,
    storage: Arc<dyn MessageStorage>,
    bus: WeakMessageBus,
    first_message: Mutex<Option<DateTime<Utc>>>,
}

impl GroupingReceiver {
    #[must_use]
    pub fn new(entry: GroupEntry, storage: Arc<dyn MessageStorage>, bus: WeakMessageBus) -> Self {
        Self {
            name: format!("grouping:{}", entry.topic_single),
            entry,
            storage,
            bus,
            first_message: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn entry(&self) -> &GroupEntry {
        &self.entry
    }

    /// Creation time of the oldest message in the current batch.
    #[must_use]
    pub fn first_message_at(&self) -> Option<DateTime<Utc>> {
        *self.first_message.lock()
    }

    /// Flush if the current batch has waited longer than `max_time_in_queue`.
    /// Returns the number of messages flushed.
    pub async fn scan(&self) -> usize {
        let Some(first) = self.first_message_at() else {
            return 0;
        };
        let age = Utc::now()
            .signed_duration_since(first)
            .to_std()
            .unwrap_or_default();
        if age <= self.entry.max_time_in_queue {
            return 0;
        }
        let buffered = match self.storage.get_grouping_messages_by_topic(&self.entry.topic_single) {
            Ok(buffered) => buffered,
            Err(err) => {
                error!(topic = %self.entry.topic_single, error = %err, "Could not load grouped messages");
                return 0;
            }
        };
        info!(
            topic = %self.entry.topic_list,
            age_ms = age.as_millis() as u64,
            "Max time in queue passed, sending grouped messages"
        );
        self.flush(buffered).await
    }

    async fn flush(&self, buffered: Vec<Envelope>) -> usize {
        let mut taken: Vec<Envelope> = buffered
            .into_iter()
            .filter_map(|envelope| match self.storage.remove_message(envelope.id()) {
                Ok(removed) => removed,
                Err(err) => {
                    error!(id = %envelope.id(), error = %err, "Could not take grouped message");
                    None
                }
            })
            .collect();
        *self.first_message.lock() = None;

        if taken.is_empty() {
            return 0;
        }
        taken.sort_by_key(Envelope::created);
        let contents: Vec<Payload> = taken.iter().filter_map(|e| e.content().cloned()).collect();
        let count = taken.len();

        let Some(bus) = self.bus.upgrade() else {
            warn!(topic = %self.entry.topic_list, dropped = count, "Bus gone, dropping grouped messages");
            return 0;
        };
        let options = match DeliveryOptions::builder()
            .asynchronous()
            .broadcast()
            .notification()
            .build()
        {
            Ok(options) => options,
            Err(err) => {
                error!(error = %err, "Could not build group delivery options");
                return 0;
            }
        };
        if let Err(err) = bus
            .fire(&self.entry.topic_list, Some(Payload::new(contents)), options)
            .await
        {
            error!(topic = %self.entry.topic_list, error = %err, "Group delivery failed");
            return 0;
        }
        info!(topic = %self.entry.topic_list, messages = count, "Group sent, state reset");
        count
    }
}

#[async_trait]
impl Receiver for GroupingReceiver {
    async fn receive(&self, envelope: &mut Envelope) -> Result<(), ReceiverError> {
        {
            let mut first = self.first_message.lock();
            if first.is_none() {
                *first = Some(envelope.created());
            }
        }
        envelope.set_status(MessageStatus::Grouping);
        self.storage.save_message(envelope)?;

        let buffered = self
            .storage
            .get_grouping_messages_by_topic(&self.entry.topic_single)?;
        debug!(topic = %self.entry.topic_single, buffered = buffered.len(), "Message grouped");

        if buffered.len() > self.entry.max_size {
            info!(
                topic = %self.entry.topic_list,
                max_size = self.entry.max_size,
                "Max size exceeded, sending grouped messages"
            );
            if self.flush(buffered).await > 0 {
                envelope.set_status(MessageStatus::Finished);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Periodic time-based flush of every group.
pub struct GroupScanJob {
    groupers: Vec<Arc<GroupingReceiver>>,
    period: Duration,
    bus: WeakMessageBus,
}

impl GroupScanJob {
    #[must_use]
    pub fn new(groupers: Vec<Arc<GroupingReceiver>>, period: Duration, bus: WeakMessageBus) -> Self {
        Self {
            groupers,
            period,
            bus,
        }
    }

    /// Scan every group once. Returns the number of messages flushed.
    pub async fn run_once(&self) -> usize {
        let mut flushed = 0;
        for grouper in &self.groupers {
            flushed += grouper.scan().await;
        }
        flushed
    }

    /// Start the loop; it ends once the bus is gone.
    pub fn spawn(self) -> JoinHandle<()> {
        let job = Arc::new(self);
        tokio::spawn(async move {
            info!(period_ms = job.period.as_millis() as u64, "Grouping scan job started");
            let mut interval = tokio::time::interval(job.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if job.bus.upgrade().is_none() {
                    info!("Bus dropped, grouping scan job stopping");
                    break;
                }
                let tick = job.clone();
                if let Err(err) = tokio::spawn(async move { tick.run_once().await }).await {
                    error!(error = %err, "Grouping scan tick failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMessageStorage;
    use message_bus::{receiver_fn, MessageBus};
    use tokio::sync::mpsc;

    fn setup(max_size: usize, max_time: Duration) -> (MessageBus, Arc<InMemoryMessageStorage>, Arc<GroupingReceiver>) {
        let bus = MessageBus::with_defaults().unwrap();
        let storage = Arc::new(InMemoryMessageStorage::new());
        let grouper = Arc::new(GroupingReceiver::new(
            GroupEntry::new("Item.Single", "Item.List", max_size, max_time),
            storage.clone(),
            bus.downgrade(),
        ));
        bus.subscribe("Item.Single", grouper.clone()).unwrap();
        (bus, storage, grouper)
    }

    fn list_listener(bus: &MessageBus) -> mpsc::UnboundedReceiver<Vec<u32>> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(
            "Item.List",
            receiver_fn("list", move |envelope: &mut Envelope| {
                let items = envelope
                    .content()
                    .and_then(|c| c.downcast_ref::<Vec<Payload>>())
                    .map(|list| {
                        list.iter()
                            .filter_map(|p| p.downcast_ref::<u32>().copied())
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                let _ = tx.send(items);
                Ok(())
            }),
        )
        .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_flush_on_size() {
        let (bus, storage, _grouper) = setup(3, Duration::from_secs(60));
        let mut lists = list_listener(&bus);

        for i in 0..4u32 {
            bus.fire("Item.Single", Some(Payload::new(i)), DeliveryOptions::default())
                .await
                .unwrap();
        }

        let list = tokio::time::timeout(Duration::from_secs(1), lists.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(list, vec![0, 1, 2, 3]);
        assert!(storage.get_grouping_messages_by_topic("Item.Single").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_below_size_waits() {
        let (bus, storage, grouper) = setup(3, Duration::from_secs(60));

        for i in 0..3u32 {
            bus.fire("Item.Single", Some(Payload::new(i)), DeliveryOptions::default())
                .await
                .unwrap();
        }

        assert_eq!(storage.get_grouping_messages_by_topic("Item.Single").unwrap().len(), 3);
        assert!(grouper.first_message_at().is_some());
        assert_eq!(grouper.scan().await, 0);
    }

    #[tokio::test]
    async fn test_scan_flushes_after_timeout() {
        let (bus, storage, grouper) = setup(10, Duration::from_millis(30));
        let mut lists = list_listener(&bus);

        bus.fire("Item.Single", Some(Payload::new(7u32)), DeliveryOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let job = GroupScanJob::new(vec![grouper.clone()], Duration::from_millis(10), bus.downgrade());
        assert_eq!(job.run_once().await, 1);

        let list = tokio::time::timeout(Duration::from_secs(1), lists.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(list, vec![7]);
        assert!(storage.is_empty());
        assert!(grouper.first_message_at().is_none());
    }
}
