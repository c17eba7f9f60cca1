//! ---
//! rs_section: "03-persistence-logging"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Telemetry store trait and the in-memory backend."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use reactorsync_common::{
    Fault, NewFault, PersistedReading, Reactor, ReactorId, ReactorStatus, TelemetryReading,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::journal::{self, JournalRecord, JournalWriter};
use crate::metrics::PersistenceMetrics;
use crate::{Result, StoreError};

/// Fault listing filter; `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultFilter {
    /// Restrict to one reactor.
    pub reactor_id: Option<ReactorId>,
    /// Restrict to resolved (`true`) or open (`false`) faults.
    pub resolved: Option<bool>,
}

/// Row counts exposed by the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Registered reactors.
    pub reactors: usize,
    /// Stored readings across all reactors.
    pub readings: usize,
    /// Faults ever created.
    pub faults: usize,
    /// Faults not yet resolved.
    pub open_faults: usize,
    /// Timestamp of the newest reading.
    pub latest_reading: Option<DateTime<Utc>>,
}

/// Storage for the reactor registry, telemetry, and faults.
pub trait TelemetryStore: Send + Sync {
    /// All registered reactors ordered by id.
    fn list_reactors(&self) -> Result<Vec<Reactor>>;
    /// One reactor, or [`StoreError::UnknownReactor`].
    fn reactor(&self, id: ReactorId) -> Result<Reactor>;
    /// Register or replace a reactor.
    fn upsert_reactor(&self, reactor: Reactor) -> Result<Reactor>;
    /// Delete a reactor together with its readings and faults.
    fn delete_reactor(&self, id: ReactorId) -> Result<Reactor>;
    /// Append a reading for a registered reactor.
    fn insert_reading(&self, reading: &TelemetryReading) -> Result<PersistedReading>;
    /// Newest readings first, at most `limit`.
    fn readings(&self, id: ReactorId, limit: usize) -> Result<Vec<PersistedReading>>;
    /// Refresh the derived health columns of a reactor.
    fn update_health(
        &self,
        id: ReactorId,
        health_score: f64,
        status: ReactorStatus,
        at: DateTime<Utc>,
    ) -> Result<Reactor>;
    /// Persist a new fault.
    fn create_fault(&self, fault: NewFault) -> Result<Fault>;
    /// Newest unresolved fault of `fault_type` raised at or after `since`.
    fn open_fault(
        &self,
        id: ReactorId,
        fault_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Fault>>;
    /// Mark a fault resolved; resolving twice keeps the first resolution time.
    fn resolve_fault(&self, fault_id: u64, at: DateTime<Utc>) -> Result<Fault>;
    /// Faults matching the filter, newest first.
    fn faults(&self, filter: FaultFilter) -> Result<Vec<Fault>>;
    /// Row counts.
    fn stats(&self) -> Result<StoreStats>;
    /// Drop readings older than `before`, returning how many were removed.
    fn cleanup(&self, before: DateTime<Utc>) -> Result<usize>;
    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct State {
    reactors: BTreeMap<ReactorId, Reactor>,
    readings: BTreeMap<ReactorId, Vec<PersistedReading>>,
    faults: BTreeMap<u64, Fault>,
    next_reading_id: u64,
    next_fault_id: u64,
}

impl State {
    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::ReactorUpserted { reactor } => {
                self.reactors.insert(reactor.id, reactor);
            }
            JournalRecord::ReactorDeleted { reactor_id } => {
                self.remove_reactor(reactor_id);
            }
            JournalRecord::HealthUpdated {
                reactor_id,
                health_score,
                status,
                at,
            } => {
                if let Some(reactor) = self.reactors.get_mut(&reactor_id) {
                    reactor.health_score = health_score;
                    reactor.status = status;
                    reactor.updated_at = at;
                }
            }
            JournalRecord::Reading { reading } => {
                self.next_reading_id = self.next_reading_id.max(reading.id);
                self.readings
                    .entry(reading.reading.reactor_id)
                    .or_default()
                    .push(reading);
            }
            JournalRecord::FaultCreated { fault } => {
                self.next_fault_id = self.next_fault_id.max(fault.id);
                self.faults.insert(fault.id, fault);
            }
            JournalRecord::FaultResolved { fault_id, at } => {
                if let Some(fault) = self.faults.get_mut(&fault_id) {
                    mark_resolved(fault, at);
                }
            }
            JournalRecord::Cleanup { before } => {
                self.drop_readings_before(before);
            }
        }
    }

    fn remove_reactor(&mut self, id: ReactorId) -> Option<Reactor> {
        let reactor = self.reactors.remove(&id)?;
        self.readings.remove(&id);
        self.faults.retain(|_, fault| fault.reactor_id != id);
        Some(reactor)
    }

    fn drop_readings_before(&mut self, before: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for rows in self.readings.values_mut() {
            let len = rows.len();
            rows.retain(|row| row.reading.timestamp >= before);
            removed += len - rows.len();
        }
        removed
    }
}

fn mark_resolved(fault: &mut Fault, at: DateTime<Utc>) {
    if !fault.resolved {
        fault.resolved = true;
        fault.resolved_at = Some(at);
    }
}

/// Process-local [`TelemetryStore`] with an optional append-only journal.
///
/// Write operations can be made to fail on demand with [`InMemoryStore::fail_next`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    journal: Option<Mutex<JournalWriter>>,
    metrics: Option<PersistenceMetrics>,
    fail_next: AtomicUsize,
}

impl InMemoryStore {
    /// Empty store without a journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a journaled store, replaying any existing entries first.
    pub fn open_journaled(path: &Path) -> Result<Self> {
        let mut state = State::default();
        if path.exists() && std::fs::metadata(path)?.len() > 0 {
            let started = Instant::now();
            let count = journal::replay(path, |entry| {
                state.apply(entry.record);
                Ok(())
            })?;
            info!(
                path = %path.display(),
                entries = count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "journal replayed"
            );
        }
        Ok(Self {
            state: RwLock::new(state),
            journal: Some(Mutex::new(JournalWriter::open(path)?)),
            metrics: None,
            fail_next: AtomicUsize::new(0),
        })
    }

    /// Attach Prometheus metrics.
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Make the next `count` write operations fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    fn check_injected_failure(&self, operation: &'static str) -> Result<()> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            if let Some(metrics) = &self.metrics {
                metrics.record_failure(operation);
            }
            return Err(StoreError::Unavailable(format!(
                "injected failure during {operation}"
            )));
        }
        Ok(())
    }

    /// Journal a mutation, then apply it to memory.
    ///
    /// `prepare` validates against the current state and returns the record
    /// plus the caller's result; `None` means there is nothing to write. The
    /// state lock is held across the append, and a failed append leaves memory
    /// untouched.
    fn commit<T>(
        &self,
        operation: &'static str,
        started: Instant,
        prepare: impl FnOnce(&State) -> Result<(Option<JournalRecord>, T)>,
    ) -> Result<T> {
        let mut state = self.state.write();
        let (record, output) = prepare(&state)?;
        let Some(record) = record else {
            return Ok(output);
        };
        if let Some(journal) = &self.journal {
            match journal.lock().append(record.clone()) {
                Ok((sequence, bytes)) => {
                    debug!(operation, sequence, bytes, "journal append");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_journal_bytes(operation, bytes);
                    }
                }
                Err(err) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_failure(operation);
                    }
                    return Err(err);
                }
            }
        }
        state.apply(record);
        drop(state);
        if let Some(metrics) = &self.metrics {
            metrics.record_write(operation, started.elapsed().as_secs_f64());
        }
        Ok(output)
    }
}

impl TelemetryStore for InMemoryStore {
    fn list_reactors(&self) -> Result<Vec<Reactor>> {
        Ok(self.state.read().reactors.values().cloned().collect())
    }

    fn reactor(&self, id: ReactorId) -> Result<Reactor> {
        self.state
            .read()
            .reactors
            .get(&id)
            .cloned()
            .ok_or(StoreError::UnknownReactor(id))
    }

    fn upsert_reactor(&self, reactor: Reactor) -> Result<Reactor> {
        let started = Instant::now();
        self.check_injected_failure("upsert_reactor")?;
        self.commit("upsert_reactor", started, |_| {
            Ok((
                Some(JournalRecord::ReactorUpserted {
                    reactor: reactor.clone(),
                }),
                reactor,
            ))
        })
    }

    fn delete_reactor(&self, id: ReactorId) -> Result<Reactor> {
        let started = Instant::now();
        self.check_injected_failure("delete_reactor")?;
        let removed = self.commit("delete_reactor", started, |state| {
            let reactor = state
                .reactors
                .get(&id)
                .cloned()
                .ok_or(StoreError::UnknownReactor(id))?;
            Ok((Some(JournalRecord::ReactorDeleted { reactor_id: id }), reactor))
        })?;
        info!(reactor_id = id, "reactor deleted with readings and faults");
        Ok(removed)
    }

    fn insert_reading(&self, reading: &TelemetryReading) -> Result<PersistedReading> {
        let started = Instant::now();
        self.check_injected_failure("insert_reading")?;
        self.commit("insert_reading", started, |state| {
            if !state.reactors.contains_key(&reading.reactor_id) {
                return Err(StoreError::UnknownReactor(reading.reactor_id));
            }
            let row = PersistedReading {
                id: state.next_reading_id + 1,
                reading: *reading,
                created_at: Utc::now(),
            };
            Ok((Some(JournalRecord::Reading { reading: row }), row))
        })
    }

    fn readings(&self, id: ReactorId, limit: usize) -> Result<Vec<PersistedReading>> {
        let state = self.state.read();
        if !state.reactors.contains_key(&id) {
            return Err(StoreError::UnknownReactor(id));
        }
        Ok(state
            .readings
            .get(&id)
            .map(|rows| rows.iter().rev().take(limit).copied().collect())
            .unwrap_or_default())
    }

    fn update_health(
        &self,
        id: ReactorId,
        health_score: f64,
        status: ReactorStatus,
        at: DateTime<Utc>,
    ) -> Result<Reactor> {
        let started = Instant::now();
        self.check_injected_failure("update_health")?;
        self.commit("update_health", started, |state| {
            let mut reactor = state
                .reactors
                .get(&id)
                .cloned()
                .ok_or(StoreError::UnknownReactor(id))?;
            reactor.health_score = health_score;
            reactor.status = status;
            reactor.updated_at = at;
            let record = JournalRecord::HealthUpdated {
                reactor_id: id,
                health_score,
                status,
                at,
            };
            Ok((Some(record), reactor))
        })
    }

    fn create_fault(&self, fault: NewFault) -> Result<Fault> {
        let started = Instant::now();
        self.check_injected_failure("create_fault")?;
        self.commit("create_fault", started, |state| {
            if !state.reactors.contains_key(&fault.reactor_id) {
                return Err(StoreError::UnknownReactor(fault.reactor_id));
            }
            let fault = Fault {
                id: state.next_fault_id + 1,
                reactor_id: fault.reactor_id,
                fault_type: fault.fault_type,
                severity: fault.severity,
                description: fault.description,
                timestamp: fault.timestamp,
                resolved: false,
                resolved_at: None,
            };
            Ok((
                Some(JournalRecord::FaultCreated {
                    fault: fault.clone(),
                }),
                fault,
            ))
        })
    }

    fn open_fault(
        &self,
        id: ReactorId,
        fault_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Fault>> {
        Ok(self
            .state
            .read()
            .faults
            .values()
            .rev()
            .find(|fault| {
                fault.reactor_id == id
                    && !fault.resolved
                    && fault.fault_type == fault_type
                    && fault.timestamp >= since
            })
            .cloned())
    }

    fn resolve_fault(&self, fault_id: u64, at: DateTime<Utc>) -> Result<Fault> {
        let started = Instant::now();
        self.check_injected_failure("resolve_fault")?;
        self.commit("resolve_fault", started, |state| {
            let mut fault = state
                .faults
                .get(&fault_id)
                .cloned()
                .ok_or(StoreError::UnknownFault(fault_id))?;
            if fault.resolved {
                warn!(fault_id, "fault already resolved");
                return Ok((None, fault));
            }
            mark_resolved(&mut fault, at);
            Ok((Some(JournalRecord::FaultResolved { fault_id, at }), fault))
        })
    }

    fn faults(&self, filter: FaultFilter) -> Result<Vec<Fault>> {
        Ok(self
            .state
            .read()
            .faults
            .values()
            .rev()
            .filter(|fault| filter.reactor_id.map_or(true, |id| fault.reactor_id == id))
            .filter(|fault| filter.resolved.map_or(true, |r| fault.resolved == r))
            .cloned()
            .collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let state = self.state.read();
        Ok(StoreStats {
            reactors: state.reactors.len(),
            readings: state.readings.values().map(Vec::len).sum(),
            faults: state.faults.len(),
            open_faults: state.faults.values().filter(|f| !f.resolved).count(),
            latest_reading: state
                .readings
                .values()
                .filter_map(|rows| rows.last())
                .map(|row| row.reading.timestamp)
                .max(),
        })
    }

    fn cleanup(&self, before: DateTime<Utc>) -> Result<usize> {
        let started = Instant::now();
        self.check_injected_failure("cleanup")?;
        let removed = self.commit("cleanup", started, |state| {
            let removed = state
                .readings
                .values()
                .flatten()
                .filter(|row| row.reading.timestamp < before)
                .count();
            Ok((Some(JournalRecord::Cleanup { before }), removed))
        })?;
        info!(removed, before = %before, "retention cleanup");
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use reactorsync_common::{FaultSeverity, MetricSet, ReactorFamily};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn reading(reactor_id: ReactorId, minutes: i64) -> TelemetryReading {
        TelemetryReading {
            reactor_id,
            timestamp: at(minutes),
            metrics: MetricSet::default(),
        }
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .upsert_reactor(Reactor::new(1, "Pickering", ReactorFamily::Candu, 43.8, -79.1))
            .unwrap();
        store
            .upsert_reactor(Reactor::new(2, "Darlington SMR", ReactorFamily::Smr, 43.9, -78.7))
            .unwrap();
        store
    }

    fn new_fault(reactor_id: ReactorId, fault_type: &str, minutes: i64) -> NewFault {
        NewFault {
            reactor_id,
            fault_type: fault_type.into(),
            severity: FaultSeverity::Advisory,
            description: "test".into(),
            timestamp: at(minutes),
        }
    }

    #[test]
    fn readings_require_known_reactor() {
        let store = seeded();
        assert!(matches!(
            store.insert_reading(&reading(9999, 0)),
            Err(StoreError::UnknownReactor(9999))
        ));
        assert_eq!(store.stats().unwrap().readings, 0);
    }

    #[test]
    fn readings_are_newest_first_with_limit() {
        let store = seeded();
        for minute in 0..5 {
            store.insert_reading(&reading(1, minute)).unwrap();
        }
        let rows = store.readings(1, 3).unwrap();
        let minutes: Vec<_> = rows.iter().map(|r| r.reading.timestamp).collect();
        assert_eq!(minutes, vec![at(4), at(3), at(2)]);
        assert!(rows[0].id > rows[1].id);
        assert!(store.readings(2, 10).unwrap().is_empty());
    }

    #[test]
    fn delete_cascades() {
        let store = seeded();
        store.insert_reading(&reading(1, 0)).unwrap();
        store.create_fault(new_fault(1, "pressure_drop", 0)).unwrap();
        store.create_fault(new_fault(2, "pressure_drop", 0)).unwrap();
        store.delete_reactor(1).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.reactors, 1);
        assert_eq!(stats.readings, 0);
        assert_eq!(stats.faults, 1);
        assert!(matches!(store.reactor(1), Err(StoreError::UnknownReactor(1))));
        assert!(store.delete_reactor(1).is_err());
    }

    #[test]
    fn open_fault_respects_window_and_resolution() {
        let store = seeded();
        let fault = store.create_fault(new_fault(1, "temperature_spike", 10)).unwrap();
        assert!(store.open_fault(1, "temperature_spike", at(0)).unwrap().is_some());
        assert!(store.open_fault(1, "temperature_spike", at(11)).unwrap().is_none());
        assert!(store.open_fault(1, "pressure_drop", at(0)).unwrap().is_none());
        assert!(store.open_fault(2, "temperature_spike", at(0)).unwrap().is_none());

        let resolved = store.resolve_fault(fault.id, at(20)).unwrap();
        assert!(resolved.resolved);
        let again = store.resolve_fault(fault.id, at(30)).unwrap();
        assert_eq!(again.resolved_at, Some(at(20)));
        assert!(store.open_fault(1, "temperature_spike", at(0)).unwrap().is_none());
        assert!(matches!(
            store.resolve_fault(77, at(0)),
            Err(StoreError::UnknownFault(77))
        ));
    }

    #[test]
    fn fault_filter_combines() {
        let store = seeded();
        let first = store.create_fault(new_fault(1, "a", 0)).unwrap();
        store.create_fault(new_fault(1, "b", 1)).unwrap();
        store.create_fault(new_fault(2, "c", 2)).unwrap();
        store.resolve_fault(first.id, at(5)).unwrap();

        let open_for_one = store
            .faults(FaultFilter {
                reactor_id: Some(1),
                resolved: Some(false),
            })
            .unwrap();
        assert_eq!(open_for_one.len(), 1);
        assert_eq!(open_for_one[0].fault_type, "b");
        let all = store.faults(FaultFilter::default()).unwrap();
        assert_eq!(
            all.iter().map(|f| f.fault_type.as_str()).collect::<Vec<_>>(),
            vec!["c", "b", "a"]
        );
        assert_eq!(store.stats().unwrap().open_faults, 2);
    }

    #[test]
    fn injected_failures_do_not_mutate() {
        let store = seeded();
        store.fail_next(1);
        let err = store.insert_reading(&reading(1, 0)).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.stats().unwrap().readings, 0);
        store.insert_reading(&reading(1, 0)).unwrap();
        assert_eq!(store.stats().unwrap().readings, 1);
    }

    #[test]
    fn cleanup_drops_old_readings() {
        let store = seeded();
        for minute in 0..10 {
            store.insert_reading(&reading(1, minute)).unwrap();
        }
        assert_eq!(store.cleanup(at(4)).unwrap(), 4);
        let stats = store.stats().unwrap();
        assert_eq!(stats.readings, 6);
        assert_eq!(stats.latest_reading, Some(at(9)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_journal_append_leaves_state_untouched() {
        let mut store = seeded();
        let full = std::fs::OpenOptions::new()
            .write(true)
            .open("/dev/full")
            .unwrap();
        store.journal = Some(Mutex::new(JournalWriter::over_file(
            Path::new("/dev/full"),
            full,
        )));

        for _ in 0..3 {
            let err = store.insert_reading(&reading(1, 0)).unwrap_err();
            assert!(matches!(err, StoreError::Io(_)));
            assert!(err.is_transient());
        }
        assert!(store.create_fault(new_fault(1, "pump_failure", 0)).is_err());
        assert!(store
            .update_health(1, 42.0, ReactorStatus::Unhealthy, at(1))
            .is_err());
        assert!(store.delete_reactor(2).is_err());

        let stats = store.stats().unwrap();
        assert_eq!(stats.readings, 0);
        assert_eq!(stats.faults, 0);
        assert_eq!(stats.reactors, 2);
        assert_eq!(store.reactor(1).unwrap().health_score, 100.0);

        let dir = tempfile::tempdir().unwrap();
        store.journal = Some(Mutex::new(
            JournalWriter::open(&dir.path().join("store.journal")).unwrap(),
        ));
        assert_eq!(store.insert_reading(&reading(1, 0)).unwrap().id, 1);
        assert_eq!(store.create_fault(new_fault(1, "pump_failure", 0)).unwrap().id, 1);
    }
}
