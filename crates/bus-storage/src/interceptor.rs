//! # Storage Interceptor
//!
//! Decides which envelopes reach storage and wires storage into a bus:
//!
//! - only topics fully matching `topic_pattern` are kept
//! - VOID is never kept; CALL only with `store_calls`
//! - processed envelopes are removed with `remove_processed`, otherwise
//!   re-saved; `Grouping` and `RemoteProcessing` are always re-saved
//! - a `RemoteProcessing` envelope is finalized once the remote node reports
//!   its outcome: removed on `Finished`, kept for redelivery on `Error`

use crate::config::StorageConfig;
use crate::grouping::{GroupScanJob, GroupingReceiver};
use crate::redelivery::RedeliveryScheduler;
use bus_types::{BusError, DeliveryPolicy, Envelope, MessageStatus};
use dashmap::DashMap;
use message_bus::{
    MessageBus, MessageStorage, NoopStorageInterceptor, ReceiverRef, StorageError,
    StorageInterceptor,
};
use regex::Regex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Interceptor writing through to a [`MessageStorage`].
pub struct DefaultStorageInterceptor {
    config: StorageConfig,
    topic_filter: Regex,
    storage: Arc<dyn MessageStorage>,
    /// Remote outcomes that arrived before the sender re-saved the envelope
    /// as `RemoteProcessing`.
    early_outcomes: DashMap<Uuid, MessageStatus>,
}

impl DefaultStorageInterceptor {
    /// # Errors
    ///
    /// `BusError::StorageInit` if the configuration does not validate.
    pub fn new(config: StorageConfig, storage: Arc<dyn MessageStorage>) -> Result<Self, BusError> {
        config.validate()?;
        let topic_filter = Regex::new(&format!("^(?:{})$", config.topic_pattern))
            .map_err(|e| BusError::StorageInit(e.to_string()))?;
        Ok(Self {
            config,
            topic_filter,
            storage,
            early_outcomes: DashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn MessageStorage> {
        &self.storage
    }

    fn should_store(&self, envelope: &Envelope) -> bool {
        if !self.topic_filter.is_match(envelope.topic()) {
            return false;
        }
        match envelope.options().policy() {
            DeliveryPolicy::Void => false,
            DeliveryPolicy::Call => self.config.store_calls,
            DeliveryPolicy::Store => true,
        }
    }

    fn finish_remote(&self, mut envelope: Envelope, status: MessageStatus) {
        if !envelope.set_status(status) {
            return;
        }
        info!(id = %envelope.id(), status = %status, "Remote outcome applied");
        if status == MessageStatus::Error {
            self.store_message(&envelope);
        } else {
            self.store_processed_message(&envelope);
        }
    }

    fn save(&self, envelope: &Envelope) {
        if let Err(err) = self.storage.save_message(envelope) {
            error!(id = %envelope.id(), topic = %envelope.topic(), error = %err, "Failed to save message");
        }
    }
}

impl StorageInterceptor for DefaultStorageInterceptor {
    fn store_message(&self, envelope: &Envelope) {
        if self.should_store(envelope) {
            self.save(envelope);
        }
    }

    fn store_processed_message(&self, envelope: &Envelope) {
        if envelope.status() == MessageStatus::RemoteProcessing {
            if let Some((_, status)) = self.early_outcomes.remove(&envelope.id()) {
                self.finish_remote(envelope.clone(), status);
                return;
            }
        }
        if envelope.status().is_deferred() || !self.config.remove_processed {
            self.store_message(envelope);
            return;
        }
        if let Err(err) = self.storage.remove_message(envelope.id()) {
            error!(id = %envelope.id(), error = %err, "Failed to remove processed message");
        }
    }

    fn contains(&self, id: Uuid) -> bool {
        match self.storage.get_message_by_id(id) {
            Ok(found) => found.is_some(),
            Err(err) => {
                error!(id = %id, error = %err, "Storage lookup failed");
                false
            }
        }
    }

    fn settle_remote(&self, id: Uuid, status: MessageStatus) -> bool {
        let held = match self.storage.get_message_by_id(id) {
            Ok(held) => held,
            Err(err) => {
                error!(id = %id, error = %err, "Storage lookup failed");
                return false;
            }
        };
        match held {
            Some(envelope) if envelope.status() == MessageStatus::RemoteProcessing => {
                self.finish_remote(envelope, status);
                true
            }
            Some(_) => {
                debug!(id = %id, status = %status, "Remote outcome arrived first, holding it");
                self.early_outcomes.insert(id, status);
                false
            }
            None => {
                debug!(id = %id, "Remote outcome for a message not held in storage");
                false
            }
        }
    }
}

/// What `install_storage` set up on a bus.
pub struct StorageHandle {
    interceptor: Option<Arc<DefaultStorageInterceptor>>,
    groupers: Vec<Arc<GroupingReceiver>>,
    jobs: Vec<JoinHandle<()>>,
    fallback_reason: Option<BusError>,
}

impl StorageHandle {
    /// The active interceptor, unless storage fell back to no-op.
    #[must_use]
    pub fn interceptor(&self) -> Option<&Arc<DefaultStorageInterceptor>> {
        self.interceptor.as_ref()
    }

    #[must_use]
    pub fn storage(&self) -> Option<&Arc<dyn MessageStorage>> {
        self.interceptor.as_ref().map(|i| i.storage())
    }

    #[must_use]
    pub fn groupers(&self) -> &[Arc<GroupingReceiver>] {
        &self.groupers
    }

    /// Why storage is disabled, if it is.
    #[must_use]
    pub fn fallback_reason(&self) -> Option<&BusError> {
        self.fallback_reason.as_ref()
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }

    /// Stop the background jobs.
    pub fn shutdown(self) {
        for job in self.jobs {
            job.abort();
        }
        info!("Storage jobs stopped");
    }
}

/// Open storage, install the interceptor on `bus`, subscribe grouping
/// receivers and start the background jobs.
///
/// Any failure (invalid configuration, `open` returning an error) is logged
/// and leaves the no-op interceptor installed: the bus keeps working, without
/// persistence, redelivery or grouping.
pub fn install_storage<F>(bus: &MessageBus, config: StorageConfig, open: F) -> StorageHandle
where
    F: FnOnce(&StorageConfig) -> Result<Arc<dyn MessageStorage>, StorageError>,
{
    match try_install(bus, config, open) {
        Ok(handle) => handle,
        Err(err) => {
            warn!(error = %err, "Storage init failed, falling back to no-op storage");
            bus.set_storage_interceptor(Arc::new(NoopStorageInterceptor));
            StorageHandle {
                interceptor: None,
                groupers: Vec::new(),
                jobs: Vec::new(),
                fallback_reason: Some(err),
            }
        }
    }
}

fn try_install<F>(bus: &MessageBus, config: StorageConfig, open: F) -> Result<StorageHandle, BusError>
where
    F: FnOnce(&StorageConfig) -> Result<Arc<dyn MessageStorage>, StorageError>,
{
    config.validate()?;
    let storage = open(&config).map_err(|e| BusError::StorageInit(e.to_string()))?;
    let interceptor = Arc::new(DefaultStorageInterceptor::new(config.clone(), storage.clone())?);

    let groupers: Vec<Arc<GroupingReceiver>> = config
        .grouping
        .iter()
        .map(|entry| Arc::new(GroupingReceiver::new(entry.clone(), storage.clone(), bus.downgrade())))
        .collect();
    for grouper in &groupers {
        let receiver: ReceiverRef = grouper.clone();
        bus.subscribe(&grouper.entry().topic_single, receiver)?;
    }

    bus.set_storage_interceptor(interceptor.clone());

    let mut jobs = Vec::new();
    let scheduler = RedeliveryScheduler::new(
        bus.downgrade(),
        interceptor.clone(),
        config.redelivery_period,
        config.redelivery_only_if_receivers_exist,
    );
    jobs.push(Arc::new(scheduler).spawn());

    if let Some(period) = config.grouping_scan_period {
        if !groupers.is_empty() {
            jobs.push(GroupScanJob::new(groupers.clone(), period, bus.downgrade()).spawn());
        }
    }

    info!(
        topic_pattern = %config.topic_pattern,
        groups = groupers.len(),
        "Storage installed"
    );
    Ok(StorageHandle {
        interceptor: Some(interceptor),
        groupers,
        jobs,
        fallback_reason: None,
    })
}
