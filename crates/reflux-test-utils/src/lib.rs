//! Test utilities and fixtures for Reflux development.
//!
//! Provides a small combat domain ([`fixtures`]) plus helpers for
//! observing what the engine did: a shared [`CallLog`] that recording
//! handlers append to, and a [`DropCounter`] whose payloads count their
//! own destruction.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared, append-only log of handler invocations.
///
/// Cloning shares the underlying log.
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    /// Copy of every entry so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries that start with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

/// Counts how many [`Tracked`] payloads have been dropped.
#[derive(Clone, Debug, Default)]
pub struct DropCounter {
    dropped: Arc<AtomicUsize>,
    issued: Arc<AtomicUsize>,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new payload tagged with `value`.
    pub fn track(&self, value: u64) -> Tracked {
        self.issued.fetch_add(1, Ordering::SeqCst);
        Tracked {
            value,
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Payloads dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Payloads created so far.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Payloads created but not yet dropped.
    pub fn live(&self) -> usize {
        self.issued() - self.dropped()
    }
}

/// An action payload that reports its own drop to a [`DropCounter`].
#[derive(Debug)]
pub struct Tracked {
    pub value: u64,
    dropped: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_log_is_shared_between_clones() {
        let log = CallLog::new();
        let other = log.clone();
        other.push("a:1");
        log.push("b:2");
        assert_eq!(log.entries(), ["a:1", "b:2"]);
        assert_eq!(other.matching("b:"), ["b:2"]);
    }

    #[test]
    fn drop_counter_tracks_live_payloads() {
        let counter = DropCounter::new();
        let a = counter.track(1);
        let b = counter.track(2);
        assert_eq!(counter.live(), 2);
        drop(a);
        assert_eq!(counter.dropped(), 1);
        drop(b);
        assert_eq!(counter.live(), 0);
        assert_eq!(counter.issued(), 2);
    }
}
