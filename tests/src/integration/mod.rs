//! # Integration Scenarios
//!
//! Shared fixtures for the scenario modules.

pub mod delivery;
pub mod federation;
pub mod routing;
pub mod storage;

use bus_telemetry::{init_logging, TelemetryConfig};
use bus_types::{Envelope, ReceiverError};
use message_bus::{receiver_fn, ReceiverRef};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

/// Receiver counting its invocations and recording topics seen.
#[derive(Clone, Default)]
pub struct Tally {
    pub hits: Arc<AtomicUsize>,
    pub topics: Arc<Mutex<Vec<String>>>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receiver(&self, name: &str) -> ReceiverRef {
        let tally = self.clone();
        receiver_fn(name.to_string(), move |envelope: &mut Envelope| {
            tally.hits.fetch_add(1, Ordering::SeqCst);
            tally.topics.lock().push(envelope.topic().to_string());
            Ok(())
        })
    }

    /// A receiver that fails its first `failures` invocations.
    pub fn flaky(&self, name: &str, failures: usize) -> ReceiverRef {
        let tally = self.clone();
        receiver_fn(name.to_string(), move |envelope: &mut Envelope| {
            let n = tally.hits.fetch_add(1, Ordering::SeqCst);
            tally.topics.lock().push(envelope.topic().to_string());
            if n < failures {
                return Err(ReceiverError::new("Flaky", format!("attempt {n}")));
            }
            Ok(())
        })
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().clone()
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

static LOGGING: Once = Once::new();

/// Install the process-wide subscriber once. Honors `BUS_LOG_LEVEL` and
/// falls back to `warn` so scenario output stays readable.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let mut config = TelemetryConfig::from_env();
        if std::env::var("BUS_LOG_LEVEL").is_err() {
            config = config.with_log_level("warn");
        }
        let _ = init_logging(&config);
    });
}
