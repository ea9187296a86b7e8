//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (conversions started/finished)
//! - Dispatch (items accepted/rejected)
//! - Tracking (job outcomes, artifact bytes)
//! - Realtime channel (reconnects)

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts};

/// Conversions started total.
pub static CONVERSIONS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "markpress_conversions_started_total",
        "Total conversion runs started",
    )
    .unwrap()
});

/// Conversions finished total by result.
pub static CONVERSIONS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "markpress_conversions_finished_total",
            "Total conversion runs finished",
        ),
        &["result"], // "completed", "cancelled", "error"
    )
    .unwrap()
});

/// Items dispatched total by outcome.
pub static ITEMS_DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "markpress_items_dispatched_total",
            "Total items submitted to the conversion service",
        ),
        &["result"], // "accepted", "rejected"
    )
    .unwrap()
});

/// Jobs finished total by result.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "markpress_jobs_finished_total",
            "Total tracked jobs that reached a terminal state",
        ),
        &["result"], // "completed", "error"
    )
    .unwrap()
});

/// Artifact payload bytes fetched total.
pub static ARTIFACT_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "markpress_artifact_bytes_total",
        "Total artifact bytes retrieved",
    )
    .unwrap()
});

/// Realtime channel reconnects total.
pub static WS_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "markpress_ws_reconnects_total",
        "Total realtime channel reconnects",
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(CONVERSIONS_STARTED.clone()),
        Box::new(CONVERSIONS_FINISHED.clone()),
        Box::new(ITEMS_DISPATCHED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(ARTIFACT_BYTES.clone()),
        Box::new(WS_RECONNECTS.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_cleanly() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
    }
}
