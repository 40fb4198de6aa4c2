//! # Delivery Executors
//!
//! One function per delivery policy. Each mutates the envelope's status and
//! response in place. Receiver failures are captured into the response and
//! never returned; the only error that escapes is CALL without a
//! subscription.

use crate::metrics::BusMetrics;
use crate::ports::{ReceiverErrorHook, StorageInterceptor};
use crate::receiver::ReceiverRef;
use crate::registry::Subscription;
use bus_types::{BusError, DeliveryPolicy, Envelope, MessageStatus, ReceiverError};
use tracing::{debug, error, info, warn};

/// What an executor needs from the bus.
pub struct ExecutionContext<'a> {
    pub interceptor: &'a dyn StorageInterceptor,
    pub metrics: &'a BusMetrics,
    pub error_hook: Option<&'a dyn ReceiverErrorHook>,
}

/// Run the executor matching the envelope's policy.
///
/// # Errors
///
/// `BusError::NoSubscription` for a CALL envelope on a topic without an exact
/// subscription.
pub async fn execute(
    envelope: &mut Envelope,
    subscription: Option<&Subscription>,
    ctx: &ExecutionContext<'_>,
) -> Result<(), BusError> {
    match envelope.options().policy() {
        DeliveryPolicy::Void => {
            exec_void(envelope, subscription, ctx).await;
            Ok(())
        }
        DeliveryPolicy::Call => exec_call(envelope, subscription, ctx).await,
        DeliveryPolicy::Store => {
            exec_store(envelope, subscription, ctx).await;
            Ok(())
        }
    }
}

/// Invoke one receiver, recording the outcome in metrics and, on failure,
/// in the response.
async fn deliver(
    receiver: &ReceiverRef,
    envelope: &mut Envelope,
    ctx: &ExecutionContext<'_>,
) -> Result<(), ReceiverError> {
    match receiver.receive(envelope).await {
        Ok(()) => {
            ctx.metrics.record_delivered();
            Ok(())
        }
        Err(err) => {
            error!(
                receiver = receiver.name(),
                topic = %envelope.topic(),
                id = %envelope.id(),
                error = %err,
                "Receiver failed"
            );
            ctx.metrics.record_receiver_failure();
            envelope.response_mut().record_failure(&err);
            if let Some(hook) = ctx.error_hook {
                hook.on_receiver_error(receiver.name(), envelope, &err);
            }
            Err(err)
        }
    }
}

/// Fire-and-forget: no persistence, no retry.
async fn exec_void(
    envelope: &mut Envelope,
    subscription: Option<&Subscription>,
    ctx: &ExecutionContext<'_>,
) {
    let Some(subscription) = subscription else {
        debug!(topic = %envelope.topic(), "No subscription, dropping VOID message");
        ctx.metrics.record_no_subscription();
        return;
    };
    envelope.set_status(MessageStatus::Processing);

    let mut failed = false;
    for receiver in subscription.receivers_by_mode(envelope.options().is_broadcast()) {
        failed |= deliver(&receiver, envelope, ctx).await.is_err();
    }

    if !envelope.status().is_deferred() {
        envelope.set_status(if failed {
            MessageStatus::Error
        } else {
            MessageStatus::Finished
        });
    }
}

/// Synchronous point-to-point with bounded retry.
///
/// Each attempt goes to the next round-robin receiver. On success the
/// callback sees the response; on exhaustion it sees the captured failure.
async fn exec_call(
    envelope: &mut Envelope,
    subscription: Option<&Subscription>,
    ctx: &ExecutionContext<'_>,
) -> Result<(), BusError> {
    ctx.interceptor.store_message(envelope);
    let Some(subscription) = subscription else {
        envelope.set_status(MessageStatus::Error);
        ctx.interceptor.store_message(envelope);
        ctx.metrics.record_no_subscription();
        return Err(BusError::NoSubscription {
            topic: envelope.topic().to_string(),
        });
    };

    let callback = envelope.options().callback().cloned();
    let mut finished = false;

    while envelope.redelivery_counter() > 0 {
        let Some(receiver) = subscription.next_receiver() else {
            break;
        };
        envelope.set_status(MessageStatus::Processing);

        if deliver(&receiver, envelope, ctx).await.is_ok() {
            envelope.response_mut().clear_failure();
            if let Some(callback) = &callback {
                if !envelope.status().is_deferred() {
                    envelope.set_status(MessageStatus::Callback);
                }
                callback(envelope.response());
            }
            if envelope.status() != MessageStatus::RemoteProcessing {
                envelope.set_status(MessageStatus::Finished);
            }
            ctx.interceptor.store_processed_message(envelope);
            finished = true;
            break;
        }

        envelope.decrement_redelivery_counter();
        envelope.set_status(MessageStatus::Error);
        ctx.interceptor.store_message(envelope);
    }

    if !finished {
        warn!(
            id = %envelope.id(),
            topic = %envelope.topic(),
            "Message exhausted redelivery attempts, dropping"
        );
        if let Some(callback) = &callback {
            callback(envelope.response());
        }
    }
    Ok(())
}

/// At-least-once notification.
///
/// An envelope already held in storage is a duplicate unless it carries the
/// redelivery marker.
async fn exec_store(
    envelope: &mut Envelope,
    subscription: Option<&Subscription>,
    ctx: &ExecutionContext<'_>,
) {
    if !envelope.is_redelivery() && ctx.interceptor.contains(envelope.id()) {
        info!(
            id = %envelope.id(),
            topic = %envelope.topic(),
            "Message already present in storage, skipping"
        );
        ctx.metrics.record_duplicate_skipped();
        return;
    }
    ctx.interceptor.store_message(envelope);

    let Some(subscription) = subscription else {
        debug!(topic = %envelope.topic(), "No subscription, parking STORE message for redelivery");
        ctx.metrics.record_no_subscription();
        envelope.set_status(MessageStatus::Error);
        ctx.interceptor.store_message(envelope);
        return;
    };
    envelope.set_status(MessageStatus::Processing);

    for receiver in subscription.receivers_by_mode(envelope.options().is_broadcast()) {
        match deliver(&receiver, envelope, ctx).await {
            Ok(()) => {
                if !envelope.status().is_deferred() {
                    envelope.set_status(MessageStatus::Finished);
                }
                ctx.interceptor.store_processed_message(envelope);
            }
            Err(_) => {
                if envelope.status() != MessageStatus::Finished {
                    envelope.set_status(MessageStatus::Error);
                    ctx.interceptor.store_message(envelope);
                }
            }
        }
    }
}
