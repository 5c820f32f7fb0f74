//! Operation counters for the healing control plane.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe u64 counter backed by an atomic.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Atomic counters for the key control-plane operations. Shareable via
/// `Arc`; every counter is monotonic for the process lifetime.
#[derive(Debug, Default)]
pub struct HealingMetrics {
    /// Sessions started (all tiers).
    pub sessions_started: Counter,
    /// Sessions ending in success (including PR creation).
    pub sessions_succeeded: Counter,
    /// Sessions ending in failure.
    pub sessions_failed: Counter,
    /// Tier-1 knowledge-base selections.
    pub kb_hits: Counter,
    /// Tier-2 worker job submissions.
    pub worker_dispatches: Counter,
    /// Pull requests opened on the review path.
    pub prs_opened: Counter,
    /// Rollbacks performed.
    pub rollbacks: Counter,
    /// Kill-switch activations.
    pub kill_switch_activations: Counter,
}

impl HealingMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}
