//! The published (configuration, limiter bank) pair.
//!
//! Readers take a lock-free `Arc` of the current snapshot with `ArcSwapOption`;
//! the reconfiguration path publishes a complete replacement. A reader holding
//! a snapshot keeps using it even if a newer one is published meanwhile.

use arc_swap::ArcSwapOption;
use std::sync::Arc;

use super::limiter::LimiterBank;
use super::rules::Configuration;

/// A descriptor tree together with the bank built from it.
#[derive(Debug)]
pub struct Snapshot {
    pub config: Configuration,
    pub bank: LimiterBank,
    /// Replica count the limits were divided by.
    pub replicas: u32,
}

/// Shared handle to the current snapshot. Cloning shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    inner: Arc<ArcSwapOption<Snapshot>>,
}

impl SnapshotHandle {
    /// A handle with nothing published yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot, or `None` if nothing was ever published.
    pub fn load(&self) -> Option<Arc<Snapshot>> {
        self.inner.load_full()
    }

    /// Replace the current snapshot.
    pub fn publish(&self, snapshot: Snapshot) {
        self.inner.store(Some(Arc::new(snapshot)));
    }

    pub fn is_published(&self) -> bool {
        self.inner.load().is_some()
    }
}
