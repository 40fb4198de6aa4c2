//! # Message Bus
//!
//! Topic-addressed publish/subscribe dispatcher.
//!
//! ## Delivery Policies
//!
//! | Policy | Persistence | Retry | Receivers |
//! |--------|-------------|-------|-----------|
//! | VOID   | none        | none  | broadcast or round robin |
//! | CALL   | optional    | immediate, bounded by the redelivery counter | round robin |
//! | STORE  | yes         | scheduled redelivery (see `bus-storage`) | broadcast or round robin |
//!
//! Pattern subscribers always get an async, best-effort copy of every
//! matching message, whatever the policy.
//!
//! ## Notifications
//!
//! Every `subscribe`/`unsubscribe` is itself broadcast on `Global.Subscribe`
//! or `Global.Unsubscribe`, carrying the topic in the
//! `Global.Headers.SubscriptionTopic` header. The federation layer listens
//! there instead of hooking into the registry.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod ports;
pub mod receiver;
pub mod registry;
pub mod round_robin;
pub mod table;

pub use config::BusConfig;
pub use dispatcher::{MessageBus, WeakMessageBus};
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use ports::{
    MessageStorage, NoopStorageInterceptor, ReceiverErrorHook, StorageError, StorageInterceptor,
};
pub use receiver::{receiver_fn, same_receiver, Receiver, ReceiverRef};
pub use registry::{Subscription, TopicKind, TopicRegistry};
pub use round_robin::RoundRobinSelector;
pub use table::ReceiverTable;
