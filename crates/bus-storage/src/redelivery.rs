//! # Redelivery Scheduler
//!
//! Periodically resubmits failed STORE envelopes. Strictly periodic: no
//! backoff, no jitter. CALL failures are never redelivered.
//!
//! Per candidate:
//! - counter at zero: mark `Exhausted`, persist, drop
//! - otherwise: decrement, persist as `Processing` so an overlapping pass
//!   skips it, and resubmit under the same id

use crate::interceptor::DefaultStorageInterceptor;
use bus_types::MessageStatus;
use message_bus::{StorageInterceptor, WeakMessageBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedeliveryReport {
    pub resubmitted: usize,
    pub exhausted: usize,
    /// Left alone because nobody listens on the topic
    pub skipped: usize,
}

/// Background redelivery of failed envelopes.
pub struct RedeliveryScheduler {
    bus: WeakMessageBus,
    interceptor: Arc<DefaultStorageInterceptor>,
    period: Duration,
    only_if_receivers_exist: bool,
}

impl RedeliveryScheduler {
    #[must_use]
    pub fn new(
        bus: WeakMessageBus,
        interceptor: Arc<DefaultStorageInterceptor>,
        period: Duration,
        only_if_receivers_exist: bool,
    ) -> Self {
        Self {
            bus,
            interceptor,
            period,
            only_if_receivers_exist,
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one redelivery pass.
    pub async fn tick(&self) -> RedeliveryReport {
        let mut report = RedeliveryReport::default();
        let Some(bus) = self.bus.upgrade() else {
            return report;
        };
        let candidates = match self.interceptor.storage().get_unprocessed_messages() {
            Ok(candidates) => candidates,
            Err(err) => {
                error!(error = %err, "Could not load unprocessed messages");
                return report;
            }
        };
        debug!(batch = candidates.len(), "Redelivery batch loaded");

        for mut envelope in candidates {
            if self.only_if_receivers_exist && !bus.is_subscribed(envelope.topic()) {
                report.skipped += 1;
                continue;
            }
            if envelope.redelivery_counter() == 0 {
                warn!(
                    id = %envelope.id(),
                    topic = %envelope.topic(),
                    "Message exhausted redelivery attempts, dropping"
                );
                envelope.set_status(MessageStatus::Exhausted);
                self.interceptor.store_processed_message(&envelope);
                bus.metrics().record_exhausted();
                report.exhausted += 1;
                continue;
            }

            envelope.decrement_redelivery_counter();
            envelope.set_status(MessageStatus::Processing);
            if let Err(err) = self.interceptor.storage().save_message(&envelope) {
                error!(id = %envelope.id(), error = %err, "Could not claim message for redelivery");
                continue;
            }
            info!(
                id = %envelope.id(),
                topic = %envelope.topic(),
                attempts_left = envelope.redelivery_counter(),
                "Redelivering message"
            );
            let (id, topic) = (envelope.id(), envelope.topic().to_string());
            if let Err(err) = bus.redeliver(envelope).await {
                warn!(id = %id, topic = %topic, error = %err, "Redelivery dispatch failed");
            }
            report.resubmitted += 1;
        }
        report
    }

    /// Start the loop. The first pass runs one period from now. Each tick
    /// runs as its own task, so a panicking tick is logged and the loop
    /// carries on. The loop ends once the bus is gone.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(period_ms = self.period.as_millis() as u64, "Redelivery job started");
            let start = tokio::time::Instant::now() + self.period;
            let mut interval = tokio::time::interval_at(start, self.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if self.bus.upgrade().is_none() {
                    info!("Bus dropped, redelivery job stopping");
                    break;
                }
                let job = self.clone();
                match tokio::spawn(async move { job.tick().await }).await {
                    Ok(report) if report != RedeliveryReport::default() => {
                        debug!(?report, "Redelivery tick complete");
                    }
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "Redelivery tick failed"),
                }
            }
        })
    }
}
