use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lifecycle counters for one registry
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    /// Endpoints built on an acquire miss
    created: AtomicU64,

    /// Acquire hits served from an existing endpoint
    reused: AtomicU64,

    /// Releases against a registered endpoint
    released: AtomicU64,

    /// Endpoints whose inner teardown ran
    torn_down: AtomicU64,

    /// Releases against a handle no longer registered under its address
    superseded: AtomicU64,

    construction_failures: AtomicU64,

    teardown_failures: AtomicU64,
}

/// Point-in-time copy of [`RegistryMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub created: u64,
    pub reused: u64,
    pub released: u64,
    pub torn_down: u64,
    pub superseded: u64,
    pub construction_failures: u64,
    pub teardown_failures: u64,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn endpoint_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn endpoint_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn endpoint_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn endpoint_torn_down(&self) {
        self.torn_down.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn endpoint_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn construction_failed(&self) {
        self.construction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn teardown_failed(&self) {
        self.teardown_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            torn_down: self.torn_down.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            teardown_failures: self.teardown_failures.load(Ordering::Relaxed),
        }
    }
}
