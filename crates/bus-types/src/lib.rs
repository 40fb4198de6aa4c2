//! # Bus Types Crate
//!
//! This crate contains the message-in-transit value and everything that
//! travels with it: delivery options, the status state machine, the response
//! holder, header and topic names, and the error taxonomy.
//!
//! ## Design Principles
//!
//! - **One envelope per fire**: an `Envelope` is created once per dispatch and
//!   keeps its id for its whole life, including redelivery.
//! - **Explicit correlation**: the correlation id (`trx_id`) travels inside the
//!   envelope instead of ambient per-thread state.
//! - **Opaque content**: payloads are type-erased; only the bridge needs to know
//!   how to encode them.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod headers;
pub mod options;
pub mod payload;

pub use entities::{CrossNode, GroupEntry};
pub use envelope::{Envelope, MessageStatus, Response};
pub use errors::{BusError, ReceiverError};
pub use options::{Callback, DeliveryOptions, DeliveryOptionsBuilder, DeliveryPolicy};
pub use payload::Payload;
