//! Split metrics
//!
//! Lightweight, Rust-native metrics via the `metrics` facade. Every recorder
//! call compiles to nothing unless the `metrics-prometheus` feature is
//! enabled, so instrumentation can stay in the hot path.

/// Split operation metrics
pub struct SplitMetrics;

impl SplitMetrics {
    // ---- Counters ----

    /// A split run loop was started (fresh or resumed)
    pub fn increment_started() {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("fission_splits_started_total").increment(1);
    }

    /// A split reached `Committed`
    pub fn increment_committed() {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("fission_splits_committed_total").increment(1);
    }

    /// A split reached `Aborted`
    pub fn increment_aborted() {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("fission_splits_aborted_total").increment(1);
    }

    /// A non-terminal run loop was interrupted (stepdown/shutdown)
    pub fn increment_interrupted() {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("fission_splits_interrupted_total").increment(1);
    }

    /// Non-terminal records resumed after leadership acquisition
    pub fn increment_resumed(count: u64) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("fission_splits_resumed_total").increment(count);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }

    // ---- Gauges ----

    /// Number of in-memory split machines
    pub fn set_active(active: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("fission_splits_active").set(active as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = active;
    }
}
