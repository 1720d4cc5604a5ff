//! Proxy observability metrics
//!
//! Prometheus-compatible metrics for:
//! - Resolver decisions per pipeline and outcome
//! - Query jobs and parallel batches
//! - Async result store occupancy
//! - End-to-end search latency

use crate::resolver::Decision;
use std::time::{Duration, Instant};

/// Record one `resolve` outcome
pub fn record_decision(pipeline: &str, decision: &Decision) {
    let outcome = if decision.err.is_some() {
        "error"
    } else if decision.is_empty {
        "empty"
    } else if decision.is_closed {
        "closed"
    } else if decision.enable_ab_testing {
        "ab_testing"
    } else {
        "connectors"
    };
    metrics::counter!(
        "strata_resolver_decisions_total",
        "pipeline" => pipeline.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
}

/// Record a finished sub-query job
pub fn record_query_job(mode: &'static str, ok: bool) {
    metrics::counter!(
        "strata_query_jobs_total",
        "mode" => mode,
        "status" => if ok { "ok" } else { "error" },
    )
    .increment(1);
}

/// Record how a multi-job batch was scheduled
pub fn record_parallel_batch(mode: &'static str, jobs: usize) {
    metrics::counter!(
        "strata_parallel_batches_total",
        "mode" => mode,
    )
    .increment(1);
    metrics::histogram!("strata_parallel_batch_jobs").record(jobs as f64);
}

pub fn update_async_store(entries: usize, bytes: u64) {
    metrics::gauge!("strata_async_store_entries").set(entries as f64);
    metrics::gauge!("strata_async_store_bytes").set(bytes as f64);
}

pub fn record_search_duration(kind: &'static str, duration: Duration) {
    metrics::histogram!(
        "strata_search_duration_seconds",
        "kind" => kind,
    )
    .record(duration.as_secs_f64());
}

pub fn record_search_error(kind: &'static str, error_type: &'static str) {
    metrics::counter!(
        "strata_search_errors_total",
        "kind" => kind,
        "error_type" => error_type,
    )
    .increment(1);
}

/// Guard for timing one search request
pub struct SearchTimer {
    kind: &'static str,
    start: Instant,
}

impl SearchTimer {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            start: Instant::now(),
        }
    }

    /// Record success and duration
    pub fn success(self) {
        record_search_duration(self.kind, self.start.elapsed());
    }

    /// Record error and duration
    pub fn error(self, error_type: &'static str) {
        record_search_duration(self.kind, self.start.elapsed());
        record_search_error(self.kind, error_type);
    }
}
