//! # Delivery Options
//!
//! How a single `fire` should be processed: sync or async, broadcast or
//! point-to-point, and under which delivery policy.

use crate::envelope::Response;
use crate::errors::BusError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Default number of delivery attempts.
pub const DEFAULT_REDELIVERY_COUNTER: u32 = 3;

/// Invoked with the response once a point-to-point dispatch completes.
pub type Callback = Arc<dyn Fn(&Response) + Send + Sync>;

/// Delivery policy of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryPolicy {
    /// Fire-and-forget. No persistence, no retry.
    #[default]
    Void,
    /// Synchronous point-to-point call with bounded retry.
    Call,
    /// Durable notification with scheduled redelivery.
    Store,
}

impl fmt::Display for DeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryPolicy::Void => write!(f, "VOID"),
            DeliveryPolicy::Call => write!(f, "CALL"),
            DeliveryPolicy::Store => write!(f, "STORE"),
        }
    }
}

/// Options supplied with a message.
///
/// Invariant: `broadcast` and `callback` are mutually exclusive. The builder
/// enforces it; there is no other way to construct options with both.
#[derive(Clone)]
pub struct DeliveryOptions {
    asynchronous: bool,
    broadcast: bool,
    policy: DeliveryPolicy,
    callback: Option<Callback>,
    headers: HashMap<String, String>,
    redelivery_counter: u32,
    correlation_id: Option<Uuid>,
}

impl DeliveryOptions {
    /// Start building options from the defaults.
    #[must_use]
    pub fn builder() -> DeliveryOptionsBuilder {
        DeliveryOptionsBuilder::default()
    }

    /// Run on the worker pool instead of the calling task.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.asynchronous
    }

    /// Deliver to every receiver instead of one chosen by round robin.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    #[must_use]
    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    #[must_use]
    pub fn callback(&self) -> Option<&Callback> {
        self.callback.as_ref()
    }

    /// Headers copied onto the envelope at creation.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Attempts granted to CALL and STORE delivery.
    #[must_use]
    pub fn redelivery_counter(&self) -> u32 {
        self.redelivery_counter
    }

    /// Correlation id to reuse instead of minting a new one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    /// Same options with the policy replaced.
    #[must_use]
    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Same options forced to run on the calling task.
    #[must_use]
    pub fn into_sync(mut self) -> Self {
        self.asynchronous = false;
        self
    }
}

impl Default for DeliveryOptions {
    /// Sync point-to-point VOID message without callback.
    fn default() -> Self {
        Self {
            asynchronous: false,
            broadcast: false,
            policy: DeliveryPolicy::Void,
            callback: None,
            headers: HashMap::new(),
            redelivery_counter: DEFAULT_REDELIVERY_COUNTER,
            correlation_id: None,
        }
    }
}

impl fmt::Debug for DeliveryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryOptions")
            .field("async", &self.asynchronous)
            .field("broadcast", &self.broadcast)
            .field("policy", &self.policy)
            .field("callback", &self.callback.is_some())
            .field("headers", &self.headers)
            .field("redelivery_counter", &self.redelivery_counter)
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

/// Builder for [`DeliveryOptions`].
#[derive(Default)]
pub struct DeliveryOptionsBuilder {
    options: DeliveryOptions,
}

impl DeliveryOptionsBuilder {
    #[must_use]
    pub fn sync(mut self) -> Self {
        self.options.asynchronous = false;
        self
    }

    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.options.asynchronous = true;
        self
    }

    #[must_use]
    pub fn point_to_point(mut self) -> Self {
        self.options.broadcast = false;
        self
    }

    #[must_use]
    pub fn broadcast(mut self) -> Self {
        self.options.broadcast = true;
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: DeliveryPolicy) -> Self {
        self.options.policy = policy;
        self
    }

    /// Shorthand for `policy(DeliveryPolicy::Call)`.
    #[must_use]
    pub fn call(self) -> Self {
        self.policy(DeliveryPolicy::Call)
    }

    /// Shorthand for `policy(DeliveryPolicy::Store)`.
    #[must_use]
    pub fn notification(self) -> Self {
        self.policy(DeliveryPolicy::Store)
    }

    #[must_use]
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.options.callback = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn redelivery_counter(mut self, counter: u32) -> Self {
        self.options.redelivery_counter = counter;
        self
    }

    #[must_use]
    pub fn correlated_with(mut self, trx_id: Uuid) -> Self {
        self.options.correlation_id = Some(trx_id);
        self
    }

    /// Finish building.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidOptions` if both broadcast and a callback were set.
    pub fn build(self) -> Result<DeliveryOptions, BusError> {
        if self.options.broadcast && self.options.callback.is_some() {
            return Err(BusError::InvalidOptions(
                "can't broadcast message with callback".to_string(),
            ));
        }
        Ok(self.options)
    }
}
