//! Global atomic counters for pipeline outcomes.
//!
//! Incremented silently by the pipeline; [`Metrics::flush`] emits the current
//! values as one `info!` event (e.g. after a batch evaluation).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::Layer;

/// Process-wide counters.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    runs: AtomicU64,
    accepted: AtomicU64,
    rejected_layer1: AtomicU64,
    rejected_layer2: AtomicU64,
    rejected_layer3: AtomicU64,
    analyzer_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected_layer1: AtomicU64::new(0),
            rejected_layer2: AtomicU64::new(0),
            rejected_layer3: AtomicU64::new(0),
            analyzer_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_runs(&self) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs", "counter incremented");
    }

    pub fn inc_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "accepted", "counter incremented");
    }

    pub fn inc_rejected(&self, layer: Layer) {
        let counter = match layer {
            Layer::Detection => &self.rejected_layer1,
            Layer::Sanitization => &self.rejected_layer2,
            Layer::Validation => &self.rejected_layer3,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rejected", layer = layer.number(), "counter incremented");
    }

    pub fn add_analyzer_failures(&self, n: u64) {
        if n > 0 {
            self.analyzer_failures.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs = self.runs(),
            accepted = self.accepted(),
            rejected_layer1 = self.rejected(Layer::Detection),
            rejected_layer2 = self.rejected(Layer::Sanitization),
            rejected_layer3 = self.rejected(Layer::Validation),
            analyzer_failures = self.analyzer_failures(),
        );
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self, layer: Layer) -> u64 {
        match layer {
            Layer::Detection => self.rejected_layer1.load(Ordering::Relaxed),
            Layer::Sanitization => self.rejected_layer2.load(Ordering::Relaxed),
            Layer::Validation => self.rejected_layer3.load(Ordering::Relaxed),
        }
    }

    pub fn analyzer_failures(&self) -> u64 {
        self.analyzer_failures.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn reset(&self) {
        self.runs.store(0, Ordering::Relaxed);
        self.accepted.store(0, Ordering::Relaxed);
        self.rejected_layer1.store(0, Ordering::Relaxed);
        self.rejected_layer2.store(0, Ordering::Relaxed);
        self.rejected_layer3.store(0, Ordering::Relaxed);
        self.analyzer_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_runs();
        m.inc_runs();
        m.inc_accepted();
        m.inc_rejected(Layer::Sanitization);
        m.add_analyzer_failures(3);
        assert_eq!(m.runs(), 2);
        assert_eq!(m.accepted(), 1);
        assert_eq!(m.rejected(Layer::Sanitization), 1);
        assert_eq!(m.rejected(Layer::Detection), 0);
        assert_eq!(m.analyzer_failures(), 3);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_runs();
        m.inc_rejected(Layer::Validation);
        m.reset();
        assert_eq!(m.runs(), 0);
        assert_eq!(m.rejected(Layer::Validation), 0);
    }
}
