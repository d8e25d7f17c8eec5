//! Error injection controller for store testing.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Controller for injecting errors during store testing.
///
/// This allows tests to force specific error conditions like operation failures, refused indexes and
/// slow queries or commits.
#[derive(Debug, Default)]
pub struct StoreErrorInjector {
    /// Fail the next N connect operations.
    fail_next_connects: AtomicUsize,
    /// Fail the next N query operations.
    fail_next_queries: AtomicUsize,
    /// Fail the next N distinct operations.
    fail_next_distincts: AtomicUsize,
    /// Fail the next N count operations.
    fail_next_counts: AtomicUsize,
    /// Fail the next N update operations.
    fail_next_updates: AtomicUsize,
    /// When set, ensure_index reports that the index could not be created.
    refuse_indexes: AtomicBool,
    /// Artificial query latency in milliseconds.
    query_latency_ms: AtomicU64,
    /// Artificial update latency in milliseconds.
    update_latency_ms: AtomicU64,
}

impl StoreErrorInjector {
    /// Create a new error injector with all errors disabled.
    pub fn new() -> Self {
        Self::default()
    }

    // === Failure injection setters ===

    /// Fail the next N connect operations.
    pub fn fail_connects(&self, count: usize) {
        self.fail_next_connects.store(count, Ordering::Relaxed);
    }

    /// Fail the next N query operations.
    pub fn fail_queries(&self, count: usize) {
        self.fail_next_queries.store(count, Ordering::Relaxed);
    }

    /// Fail the next N distinct operations.
    pub fn fail_distincts(&self, count: usize) {
        self.fail_next_distincts.store(count, Ordering::Relaxed);
    }

    /// Fail the next N count operations.
    pub fn fail_counts(&self, count: usize) {
        self.fail_next_counts.store(count, Ordering::Relaxed);
    }

    /// Fail the next N update operations.
    pub fn fail_updates(&self, count: usize) {
        self.fail_next_updates.store(count, Ordering::Relaxed);
    }

    /// Make ensure_index report a missing index.
    pub fn refuse_indexes(&self, refuse: bool) {
        self.refuse_indexes.store(refuse, Ordering::Relaxed);
    }

    // === Latency injection setters ===

    /// Set artificial query latency.
    pub fn set_query_latency(&self, ms: u64) {
        self.query_latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Set artificial update latency.
    pub fn set_update_latency(&self, ms: u64) {
        self.update_latency_ms.store(ms, Ordering::Relaxed);
    }

    // === Internal check methods ===

    pub(crate) fn should_fail_connect(&self) -> bool {
        Self::decrement_counter(&self.fail_next_connects)
    }

    pub(crate) fn should_fail_query(&self) -> bool {
        Self::decrement_counter(&self.fail_next_queries)
    }

    pub(crate) fn should_fail_distinct(&self) -> bool {
        Self::decrement_counter(&self.fail_next_distincts)
    }

    pub(crate) fn should_fail_count(&self) -> bool {
        Self::decrement_counter(&self.fail_next_counts)
    }

    pub(crate) fn should_fail_update(&self) -> bool {
        Self::decrement_counter(&self.fail_next_updates)
    }

    pub(crate) fn should_refuse_index(&self) -> bool {
        self.refuse_indexes.load(Ordering::Relaxed)
    }

    /// Helper to decrement a counter and return true if it was > 0.
    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1))
            .is_ok()
    }

    // === Latency application methods ===

    pub(crate) async fn apply_query_latency(&self) {
        Self::apply_latency(&self.query_latency_ms).await;
    }

    pub(crate) async fn apply_update_latency(&self) {
        Self::apply_latency(&self.update_latency_ms).await;
    }

    async fn apply_latency(latency_ms: &AtomicU64) {
        let ms = latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}
