//! # Bus Storage
//!
//! Persistence for STORE (and optionally CALL) envelopes, plus the two
//! background jobs built on it:
//!
//! - [`RedeliveryScheduler`]: periodically resubmits envelopes left in
//!   `Error`, decrementing their redelivery counter until exhausted
//! - [`GroupingReceiver`] / [`GroupScanJob`]: batch single messages into
//!   one list message by size or by age
//!
//! [`install_storage`] wires all of it into a [`message_bus::MessageBus`].
//! If storage cannot be opened the bus keeps running with the no-op
//! interceptor.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod grouping;
pub mod interceptor;
pub mod memory;
pub mod redelivery;

pub use config::StorageConfig;
pub use grouping::{GroupScanJob, GroupingReceiver};
pub use interceptor::{install_storage, DefaultStorageInterceptor, StorageHandle};
pub use memory::{open_in_memory, InMemoryMessageStorage};
pub use redelivery::{RedeliveryReport, RedeliveryScheduler};
