//! # Header and Topic Names
//!
//! Well-known topics and header keys used by the bus itself.

/// Broadcast after every successful `subscribe`.
pub const SUBSCRIBE_TOPIC: &str = "Global.Subscribe";

/// Broadcast after every `unsubscribe`.
pub const UNSUBSCRIBE_TOPIC: &str = "Global.Unsubscribe";

/// Carries the topic named by a subscribe/unsubscribe notification.
pub const SUBSCRIPTION_TOPIC_HEADER: &str = "Global.Headers.SubscriptionTopic";

/// Type identifier of the last receiver failure.
/// May be overwritten by a later failing receiver.
pub const EXCEPTION_HEADER: &str = "Global.Headers.Exception";

/// Message of the last receiver failure.
pub const EXCEPTION_MESSAGE_HEADER: &str = "Global.Headers.ExceptionMessage";

/// Marks an envelope resubmitted by the redelivery scheduler.
pub const REDELIVERY_MODE_HEADER: &str = "Global.Headers.RedeliveryMode";

/// Headers starting with this prefix never leave the node.
pub const TRANSIENT_HEADER_PREFIX: &str = "Trans";
