//! # Envelope
//!
//! The message in transit: identity, routing topic, delivery options, headers,
//! content, the receiver's response and the status state machine.
//!
//! ```text
//! NEW ──→ PROCESSING ──→ CALLBACK ──→ FINISHED
//!              │   │                      ↑
//!              │   ├──→ GROUPING ─────────┤
//!              │   └──→ REMOTE_PROCESSING ┘
//!              ↓
//!            ERROR ──→ PROCESSING (redelivery)
//!              └─────→ EXHAUSTED
//! ```

use crate::errors::ReceiverError;
use crate::headers::{EXCEPTION_HEADER, EXCEPTION_MESSAGE_HEADER, REDELIVERY_MODE_HEADER};
use crate::options::DeliveryOptions;
use crate::payload::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Lifecycle state of an envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    #[default]
    New,
    Processing,
    Callback,
    Finished,
    Error,
    /// Delegated across a bridge; the remote node reports the outcome.
    RemoteProcessing,
    /// Redelivery counter ran out. Terminal.
    Exhausted,
    /// Buffered for batch aggregation.
    Grouping,
}

impl MessageStatus {
    /// Whether `self → next` is a legal transition. Staying put is always legal.
    #[must_use]
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (New, Processing | Error)
                | (Processing, Callback | Finished | Error | RemoteProcessing | Grouping)
                | (Callback, Finished | RemoteProcessing | Error)
                | (Error, Processing | Finished | Exhausted)
                | (RemoteProcessing, Finished | Error)
                | (Grouping, Finished | Error)
        )
    }

    /// FINISHED or EXHAUSTED.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Finished | MessageStatus::Exhausted)
    }

    /// GROUPING or REMOTE_PROCESSING: a receiver took over finalization.
    #[must_use]
    pub fn is_deferred(self) -> bool {
        matches!(
            self,
            MessageStatus::Grouping | MessageStatus::RemoteProcessing
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageStatus::New => "NEW",
            MessageStatus::Processing => "PROCESSING",
            MessageStatus::Callback => "CALLBACK",
            MessageStatus::Finished => "FINISHED",
            MessageStatus::Error => "ERROR",
            MessageStatus::RemoteProcessing => "REMOTE_PROCESSING",
            MessageStatus::Exhausted => "EXHAUSTED",
            MessageStatus::Grouping => "GROUPING",
        };
        f.write_str(name)
    }
}

/// What the receiver handed back, plus captured failure metadata.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub headers: HashMap<String, String>,
    pub content: Option<Payload>,
}

impl Response {
    /// Record a receiver failure. A later failure overwrites an earlier one.
    pub fn record_failure(&mut self, err: &ReceiverError) {
        self.headers
            .insert(EXCEPTION_HEADER.to_string(), err.kind().to_string());
        self.headers
            .insert(EXCEPTION_MESSAGE_HEADER.to_string(), err.message().to_string());
    }

    /// Forget a previously recorded failure.
    pub fn clear_failure(&mut self) {
        self.headers.remove(EXCEPTION_HEADER);
        self.headers.remove(EXCEPTION_MESSAGE_HEADER);
    }

    /// True if no receiver failure was recorded.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        !self.headers.contains_key(EXCEPTION_HEADER)
    }

    #[must_use]
    pub fn exception(&self) -> Option<&str> {
        self.headers.get(EXCEPTION_HEADER).map(String::as_str)
    }

    #[must_use]
    pub fn exception_message(&self) -> Option<&str> {
        self.headers.get(EXCEPTION_MESSAGE_HEADER).map(String::as_str)
    }
}

/// A message in transit.
#[derive(Clone)]
pub struct Envelope {
    id: Uuid,
    trx_id: Uuid,
    created: DateTime<Utc>,
    updated: Option<DateTime<Utc>>,
    status: MessageStatus,
    topic: String,
    options: DeliveryOptions,
    headers: HashMap<String, String>,
    content: Option<Payload>,
    response: Response,
    redelivery_counter: u32,
}

impl Envelope {
    /// Create a fresh envelope. The correlation id is taken from the options
    /// when present, otherwise minted.
    pub fn new(topic: impl Into<String>, content: Option<Payload>, options: DeliveryOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            trx_id: options.correlation_id().unwrap_or_else(Uuid::new_v4),
            created: Utc::now(),
            updated: None,
            status: MessageStatus::New,
            topic: topic.into(),
            headers: options.headers().clone(),
            content,
            response: Response::default(),
            redelivery_counter: options.redelivery_counter(),
            options,
        }
    }

    /// Rebuild an envelope that already has an identity, e.g. one decoded
    /// from the wire.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Uuid,
        trx_id: Uuid,
        created: DateTime<Utc>,
        updated: Option<DateTime<Utc>>,
        status: MessageStatus,
        topic: String,
        headers: HashMap<String, String>,
        content: Option<Payload>,
    ) -> Self {
        let options = DeliveryOptions::default();
        Self {
            id,
            trx_id,
            created,
            updated,
            status,
            topic,
            headers,
            content,
            response: Response::default(),
            redelivery_counter: options.redelivery_counter(),
            options,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn trx_id(&self) -> Uuid {
        self.trx_id
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    #[must_use]
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    #[must_use]
    pub fn status(&self) -> MessageStatus {
        self.status
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Returns false (and leaves the status untouched) on an illegal
    /// transition.
    pub fn set_status(&mut self, next: MessageStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                id = %self.id,
                topic = %self.topic,
                from = %self.status,
                to = %next,
                "Rejected illegal status transition"
            );
            return false;
        }
        if self.status != next {
            self.status = next;
            self.updated = Some(Utc::now());
        }
        true
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn options(&self) -> &DeliveryOptions {
        &self.options
    }

    /// Replace the delivery options. Does not reset the redelivery counter.
    pub fn set_options(&mut self, options: DeliveryOptions) {
        self.options = options;
    }

    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.headers
    }

    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn content(&self) -> Option<&Payload> {
        self.content.as_ref()
    }

    pub fn set_content(&mut self, content: Option<Payload>) {
        self.content = content;
    }

    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    #[must_use]
    pub fn redelivery_counter(&self) -> u32 {
        self.redelivery_counter
    }

    pub fn set_redelivery_counter(&mut self, counter: u32) {
        self.redelivery_counter = counter;
    }

    /// Consume one attempt. Saturates at zero.
    pub fn decrement_redelivery_counter(&mut self) {
        self.redelivery_counter = self.redelivery_counter.saturating_sub(1);
    }

    /// True if the redelivery scheduler resubmitted this envelope.
    #[must_use]
    pub fn is_redelivery(&self) -> bool {
        self.headers.contains_key(REDELIVERY_MODE_HEADER)
    }

    pub fn mark_redelivery(&mut self) {
        self.headers
            .insert(REDELIVERY_MODE_HEADER.to_string(), "true".to_string());
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("trx_id", &self.trx_id)
            .field("status", &self.status)
            .field("topic", &self.topic)
            .field("policy", &self.options.policy())
            .field("headers", &self.headers)
            .field("content", &self.content)
            .field("redelivery_counter", &self.redelivery_counter)
            .finish()
    }
}
