//! # Round Robin Selection
//!
//! One shared cursor per subscription. Fairness is only guaranteed while the
//! underlying list does not change; an add or remove mid-cycle may skip or
//! repeat an entry.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Cyclic cursor over a list owned elsewhere.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `items[cursor]` and advance the cursor, wrapping at `len`.
    ///
    /// Returns `None` for an empty list.
    pub fn next<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        let len = items.len();
        if len == 0 {
            return None;
        }
        let previous = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current % len + 1) % len)
            })
            .unwrap_or_else(|current| current);
        items.get(previous % len)
    }

    /// Current cursor position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}
