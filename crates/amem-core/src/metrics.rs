//! Global atomic counters for the memory engine.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of an agent session).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters; no allocations, no locking.
pub struct Metrics {
    backend_calls: AtomicU64,
    backend_failures: AtomicU64,
    retries: AtomicU64,
    circuit_rejections: AtomicU64,
    circuit_opens: AtomicU64,
    memories_remembered: AtomicU64,
    recalls_served: AtomicU64,
    patterns_deduplicated: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            backend_calls: AtomicU64::new(0),
            backend_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            circuit_rejections: AtomicU64::new(0),
            circuit_opens: AtomicU64::new(0),
            memories_remembered: AtomicU64::new(0),
            recalls_served: AtomicU64::new(0),
            patterns_deduplicated: AtomicU64::new(0),
        }
    }

    pub fn inc_backend_calls(&self) {
        self.backend_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "backend_calls", "counter incremented");
    }

    pub fn inc_backend_failures(&self) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "backend_failures", "counter incremented");
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    /// A call refused because the circuit was open.
    pub fn inc_circuit_rejections(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "circuit_rejections", "counter incremented");
    }

    pub fn inc_circuit_opens(&self) {
        self.circuit_opens.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "circuit_opens", "counter incremented");
    }

    pub fn inc_remembered(&self) {
        self.memories_remembered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "memories_remembered", "counter incremented");
    }

    pub fn inc_recalls(&self) {
        self.recalls_served.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "recalls_served", "counter incremented");
    }

    /// A pattern occurrence that resolved to an existing signature.
    pub fn inc_patterns_deduplicated(&self) {
        self.patterns_deduplicated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "patterns_deduplicated", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a session, CLI exit)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            backend_calls = self.backend_calls(),
            backend_failures = self.backend_failures(),
            retries = self.retries(),
            circuit_rejections = self.circuit_rejections(),
            circuit_opens = self.circuit_opens(),
            memories_remembered = self.memories_remembered(),
            recalls_served = self.recalls_served(),
            patterns_deduplicated = self.patterns_deduplicated(),
        );
    }

    pub fn backend_calls(&self) -> u64 {
        self.backend_calls.load(Ordering::Relaxed)
    }

    pub fn backend_failures(&self) -> u64 {
        self.backend_failures.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn circuit_rejections(&self) -> u64 {
        self.circuit_rejections.load(Ordering::Relaxed)
    }

    pub fn circuit_opens(&self) -> u64 {
        self.circuit_opens.load(Ordering::Relaxed)
    }

    pub fn memories_remembered(&self) -> u64 {
        self.memories_remembered.load(Ordering::Relaxed)
    }

    pub fn recalls_served(&self) -> u64 {
        self.recalls_served.load(Ordering::Relaxed)
    }

    pub fn patterns_deduplicated(&self) -> u64 {
        self.patterns_deduplicated.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.backend_calls,
            &self.backend_failures,
            &self.retries,
            &self.circuit_rejections,
            &self.circuit_opens,
            &self.memories_remembered,
            &self.recalls_served,
            &self.patterns_deduplicated,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.backend_calls(), 0);
        m.inc_backend_calls();
        m.inc_backend_calls();
        assert_eq!(m.backend_calls(), 2);

        m.inc_circuit_rejections();
        assert_eq!(m.circuit_rejections(), 1);

        m.inc_remembered();
        m.inc_recalls();
        m.inc_recalls();
        assert_eq!(m.memories_remembered(), 1);
        assert_eq!(m.recalls_served(), 2);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_backend_failures();
        m.inc_retries();
        m.inc_circuit_opens();
        m.inc_patterns_deduplicated();
        m.reset();
        assert_eq!(m.backend_failures(), 0);
        assert_eq!(m.retries(), 0);
        assert_eq!(m.circuit_opens(), 0);
        assert_eq!(m.patterns_deduplicated(), 0);
    }
}
