//! # Topic Bus Test Suite
//!
//! Cross-crate scenarios. Unit tests live next to the code in each crate;
//! this crate exercises the crates together.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── routing.rs      # exact, pattern and round-robin routing, no-subscription
//!     ├── delivery.rs     # broadcast isolation, CALL retry and exhaustion
//!     ├── storage.rs      # STORE idempotence, redelivery, grouping
//!     └── federation.rs   # cross-node discovery, breaker, liveness
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bus-tests
//! cargo test -p bus-tests integration::federation::
//! ```

#![allow(dead_code)]

pub mod integration;
