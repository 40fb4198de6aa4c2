//! # Message Bus
//!
//! The dispatch entry point. One `MessageBus` owns its registry, worker pool,
//! storage interceptor and counters; clones share the same instance.
//!
//! ```text
//! fire(topic) ──→ Envelope ──┬──→ pattern receivers (async, best effort)
//!                            │
//!                            └──→ exact subscription ──→ executor[policy]
//!                                                         (inline or pooled)
//! ```

use crate::config::BusConfig;
use crate::executor::{self, ExecutionContext};
use crate::metrics::BusMetrics;
use crate::pool::WorkerPool;
use crate::ports::{NoopStorageInterceptor, ReceiverErrorHook, StorageInterceptor};
use crate::receiver::ReceiverRef;
use crate::registry::{Subscription, TopicRegistry};
use bus_types::headers::{SUBSCRIBE_TOPIC, SUBSCRIPTION_TOPIC_HEADER, UNSUBSCRIBE_TOPIC};
use bus_types::{BusError, DeliveryOptions, DeliveryPolicy, Envelope, Payload, Response};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

struct BusInner {
    registry: TopicRegistry,
    pool: WorkerPool,
    interceptor: RwLock<Arc<dyn StorageInterceptor>>,
    error_hook: RwLock<Option<Arc<dyn ReceiverErrorHook>>>,
    metrics: BusMetrics,
    config: BusConfig,
}

/// Handle to one bus instance.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

/// Non-owning handle, for receivers that live inside the bus they fire on.
#[derive(Clone)]
pub struct WeakMessageBus {
    inner: Weak<BusInner>,
}

impl WeakMessageBus {
    #[must_use]
    pub fn upgrade(&self) -> Option<MessageBus> {
        self.inner.upgrade().map(|inner| MessageBus { inner })
    }
}

impl MessageBus {
    /// Build a bus on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// `BusError::NoRuntime` outside a runtime.
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        let pool = WorkerPool::new(config.worker_pool_size)?;
        info!(worker_pool_size = pool.size(), "Message bus started");
        Ok(Self {
            inner: Arc::new(BusInner {
                registry: TopicRegistry::new(),
                pool,
                interceptor: RwLock::new(Arc::new(NoopStorageInterceptor)),
                error_hook: RwLock::new(None),
                metrics: BusMetrics::new(),
                config,
            }),
        })
    }

    /// Build a bus with [`BusConfig::default`].
    ///
    /// # Errors
    ///
    /// `BusError::NoRuntime` outside a runtime.
    pub fn with_defaults() -> Result<Self, BusError> {
        Self::new(BusConfig::default())
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakMessageBus {
        WeakMessageBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn metrics(&self) -> &BusMetrics {
        &self.inner.metrics
    }

    #[must_use]
    pub fn registry(&self) -> &TopicRegistry {
        &self.inner.registry
    }

    /// Replace the storage interceptor used by every later dispatch.
    pub fn set_storage_interceptor(&self, interceptor: Arc<dyn StorageInterceptor>) {
        *self.inner.interceptor.write() = interceptor;
    }

    #[must_use]
    pub fn storage_interceptor(&self) -> Arc<dyn StorageInterceptor> {
        self.inner.interceptor.read().clone()
    }

    /// Install an observer called for every failed receiver invocation,
    /// pattern receivers included. Replaces any previous hook.
    pub fn set_error_hook(&self, hook: Arc<dyn ReceiverErrorHook>) {
        *self.inner.error_hook.write() = Some(hook);
    }

    pub fn clear_error_hook(&self) {
        *self.inner.error_hook.write() = None;
    }

    /// Register `receiver` on a topic or pattern and announce it on
    /// `Global.Subscribe`.
    ///
    /// # Errors
    ///
    /// `BusError::Registration` for an empty topic or a bad pattern.
    pub fn subscribe(&self, topic: &str, receiver: ReceiverRef) -> Result<(), BusError> {
        self.inner.registry.subscribe(topic, receiver)?;
        self.announce(SUBSCRIBE_TOPIC, topic);
        Ok(())
    }

    /// Register `receiver` on each of `topics`, stopping at the first error.
    ///
    /// # Errors
    ///
    /// `BusError::Registration` for an empty topic or a bad pattern.
    pub fn subscribe_all<I, S>(&self, topics: I, receiver: &ReceiverRef) -> Result<(), BusError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for topic in topics {
            self.subscribe(topic.as_ref(), receiver.clone())?;
        }
        Ok(())
    }

    /// Remove one registration of `receiver` from `topic` and announce it on
    /// `Global.Unsubscribe`. Returns false if it was not registered.
    pub fn unsubscribe(&self, topic: &str, receiver: &ReceiverRef) -> bool {
        let removed = self.inner.registry.unsubscribe(topic, receiver);
        if removed {
            self.announce(UNSUBSCRIBE_TOPIC, topic);
        }
        removed
    }

    pub fn unsubscribe_all<I, S>(&self, topics: I, receiver: &ReceiverRef)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for topic in topics {
            self.unsubscribe(topic.as_ref(), receiver);
        }
    }

    /// Drop every subscription without announcements.
    pub fn clear(&self) {
        self.inner.registry.clear();
    }

    /// True if `topic` has an exact subscription.
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.registry.is_subscribed(topic)
    }

    /// Publish a message.
    ///
    /// # Errors
    ///
    /// `BusError::NoSubscription` for a synchronous CALL on a topic nobody
    /// listens to. Async dispatch never fails here.
    pub async fn fire(
        &self,
        topic: &str,
        content: Option<Payload>,
        options: DeliveryOptions,
    ) -> Result<(), BusError> {
        let envelope = Envelope::new(topic, content, options);
        self.fire_envelope(envelope).await.map(|_| ())
    }

    /// Synchronous CALL; returns the receiver's response.
    ///
    /// The policy is forced to CALL and the dispatch runs inline whatever
    /// `options` say. A response carrying exception headers means every
    /// attempt failed.
    ///
    /// # Errors
    ///
    /// `BusError::NoSubscription` if nobody listens on `topic`.
    pub async fn fire_call(
        &self,
        topic: &str,
        content: Option<Payload>,
        options: DeliveryOptions,
    ) -> Result<Response, BusError> {
        let options = options.with_policy(DeliveryPolicy::Call).into_sync();
        let envelope = Envelope::new(topic, content, options);
        let processed = self.fire_envelope(envelope).await?;
        Ok(processed.map(|e| e.response().clone()).unwrap_or_default())
    }

    /// Dispatch a caller-built envelope without minting a new id.
    ///
    /// Sync dispatch returns the processed envelope; async dispatch returns
    /// `None` once the work is queued.
    ///
    /// # Errors
    ///
    /// `BusError::NoSubscription` for a synchronous CALL without subscribers.
    pub async fn fire_envelope(&self, mut envelope: Envelope) -> Result<Option<Envelope>, BusError> {
        self.inner.metrics.record_fired();
        debug!(
            id = %envelope.id(),
            topic = %envelope.topic(),
            policy = %envelope.options().policy(),
            "Message fired"
        );
        self.dispatch_patterns(&envelope);
        let subscription = self.inner.registry.lookup_exact(envelope.topic());

        if envelope.options().is_async() {
            let bus = self.clone();
            self.inner.pool.spawn(async move {
                let (id, topic) = (envelope.id(), envelope.topic().to_string());
                if let Err(err) = bus.run_executor(&mut envelope, subscription).await {
                    warn!(id = %id, topic = %topic, error = %err, "Async dispatch failed");
                }
            });
            return Ok(None);
        }

        self.run_executor(&mut envelope, subscription).await?;
        Ok(Some(envelope))
    }

    /// Resubmit a stored envelope, flagged so STORE duplicate suppression
    /// lets it through.
    ///
    /// # Errors
    ///
    /// As [`MessageBus::fire_envelope`].
    pub async fn redeliver(&self, mut envelope: Envelope) -> Result<Option<Envelope>, BusError> {
        envelope.mark_redelivery();
        self.inner.metrics.record_redelivered();
        self.fire_envelope(envelope).await
    }

    async fn run_executor(
        &self,
        envelope: &mut Envelope,
        subscription: Option<Arc<Subscription>>,
    ) -> Result<(), BusError> {
        let interceptor = self.storage_interceptor();
        let error_hook = self.inner.error_hook.read().clone();
        let ctx = ExecutionContext {
            interceptor: interceptor.as_ref(),
            metrics: &self.inner.metrics,
            error_hook: error_hook.as_deref(),
        };
        executor::execute(envelope, subscription.as_deref(), &ctx).await
    }

    /// Hand a copy of the envelope to every matching pattern receiver.
    /// Outcomes never touch the primary envelope.
    fn dispatch_patterns(&self, envelope: &Envelope) {
        for receiver in self.inner.registry.lookup_pattern_receivers(envelope.topic()) {
            let mut copy = envelope.clone();
            let error_hook = self.inner.error_hook.read().clone();
            self.inner.pool.spawn(async move {
                if let Err(err) = receiver.receive(&mut copy).await {
                    error!(
                        receiver = receiver.name(),
                        topic = %copy.topic(),
                        error = %err,
                        "Pattern receiver failed"
                    );
                    if let Some(hook) = error_hook {
                        hook.on_receiver_error(receiver.name(), &copy, &err);
                    }
                }
            });
        }
    }

    /// Broadcast a subscribe/unsubscribe notification through the normal
    /// dispatch path.
    fn announce(&self, notification: &'static str, topic: &str) {
        let options = match DeliveryOptions::builder()
            .asynchronous()
            .broadcast()
            .header(SUBSCRIPTION_TOPIC_HEADER, topic)
            .build()
        {
            Ok(options) => options,
            Err(err) => {
                error!(error = %err, "Could not build subscription notification");
                return;
            }
        };
        let envelope = Envelope::new(notification, Some(Payload::new(topic.to_string())), options);
        let bus = self.clone();
        self.inner.pool.spawn(async move {
            if let Err(err) = bus.fire_envelope(envelope).await {
                warn!(topic = notification, error = %err, "Subscription notification failed");
            }
        });
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("topics", &self.inner.registry.topics().len())
            .field("patterns", &self.inner.registry.patterns().len())
            .field("worker_pool_size", &self.inner.pool.size())
            .finish()
    }
}
