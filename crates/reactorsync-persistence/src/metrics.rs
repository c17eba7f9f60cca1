//! ---
//! rs_section: "03-persistence-logging"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Prometheus metrics for store writes and journal growth."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, CounterVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::Result;

/// Metrics published by the persistence subsystem.
#[derive(Clone)]
pub struct PersistenceMetrics {
    writes: IntCounterVec,
    write_failures: IntCounterVec,
    journal_bytes: CounterVec,
    write_duration: HistogramVec,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let writes = IntCounterVec::new(
            Opts::new(
                "reactorsync_store_writes_total",
                "Store writes that completed, by operation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(writes.clone()))?;

        let write_failures = IntCounterVec::new(
            Opts::new(
                "reactorsync_store_write_failures_total",
                "Store writes that were rejected, by operation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(write_failures.clone()))?;

        let journal_bytes = CounterVec::new(
            Opts::new(
                "reactorsync_journal_bytes_total",
                "Bytes appended to the store journal",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(journal_bytes.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "reactorsync_store_write_seconds",
            "Time spent applying a store write",
        )
        .buckets(prometheus::exponential_buckets(0.00001, 2.0, 14)?);
        let write_duration = HistogramVec::new(histogram_opts, &["operation"])?;
        registry.register(Box::new(write_duration.clone()))?;

        Ok(Self {
            writes,
            write_failures,
            journal_bytes,
            write_duration,
        })
    }

    /// Record a completed write.
    pub fn record_write(&self, operation: &str, seconds: f64) {
        self.writes.with_label_values(&[operation]).inc();
        self.write_duration
            .with_label_values(&[operation])
            .observe(seconds);
    }

    /// Record a rejected write.
    pub fn record_failure(&self, operation: &str) {
        self.write_failures.with_label_values(&[operation]).inc();
    }

    /// Add to the total number of bytes written to the journal.
    pub fn record_journal_bytes(&self, operation: &str, bytes: usize) {
        self.journal_bytes
            .with_label_values(&[operation])
            .inc_by(bytes as f64);
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}
