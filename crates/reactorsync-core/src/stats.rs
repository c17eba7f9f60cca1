//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Running totals for the emission loop."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationStats {
    pub ticks: u64,
    pub current_tick: u64,
    pub readings_generated: u64,
    pub readings_published: u64,
    pub readings_persisted: u64,
    pub publish_failures: u64,
    pub persist_failures: u64,
    pub range_violations: u64,
    pub faults_raised: u64,
    pub faults_resolved: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Cloneable view onto the pipeline's counters.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle {
    inner: Arc<RwLock<GenerationStats>>,
}

impl StatsHandle {
    pub fn snapshot(&self) -> GenerationStats {
        self.inner.read().clone()
    }

    pub(crate) fn update(&self, apply: impl FnOnce(&mut GenerationStats)) {
        apply(&mut self.inner.write());
    }
}
