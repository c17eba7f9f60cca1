//! ---
//! rs_section: "03-persistence-logging"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Journaled store recovery and metrics wiring."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use prometheus::Registry;
use reactorsync_common::{
    FaultSeverity, MetricSet, NewFault, Reactor, ReactorFamily, ReactorStatus, TelemetryReading,
};
use reactorsync_persistence::{
    replay_journal, FaultFilter, InMemoryStore, JournalRecord, PersistenceMetrics, TelemetryStore,
};
use tempfile::tempdir;

#[test]
fn journaled_store_recovers_after_restart() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("store.jsonl");
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    let fault_id = {
        let store = InMemoryStore::open_journaled(&path)?;
        store.upsert_reactor(Reactor::new(1, "Bruce B", ReactorFamily::Candu, 44.3, -81.6))?;
        store.upsert_reactor(Reactor::new(2, "Vogtle 3", ReactorFamily::Pwr, 33.1, -81.8))?;
        for tick in 0..3 {
            store.insert_reading(&TelemetryReading {
                reactor_id: 1,
                timestamp: base + Duration::minutes(tick),
                metrics: MetricSet::default(),
            })?;
        }
        store.update_health(1, 82.5, ReactorStatus::Warning, base)?;
        let fault = store.create_fault(NewFault {
            reactor_id: 1,
            fault_type: "temperature_spike".into(),
            severity: FaultSeverity::Critical,
            description: "core temperature above critical band".into(),
            timestamp: base,
        })?;
        store.resolve_fault(fault.id, base + Duration::minutes(5))?;
        store.delete_reactor(2)?;
        fault.id
    };

    let reopened = InMemoryStore::open_journaled(&path)?;
    let reactors = reopened.list_reactors()?;
    assert_eq!(reactors.len(), 1);
    assert_eq!(reactors[0].status, ReactorStatus::Warning);
    assert_eq!(reactors[0].health_score, 82.5);
    assert_eq!(reopened.readings(1, 10)?.len(), 3);

    let faults = reopened.faults(FaultFilter::default())?;
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].id, fault_id);
    assert!(faults[0].resolved);

    let next = reopened.insert_reading(&TelemetryReading {
        reactor_id: 1,
        timestamp: base + Duration::minutes(10),
        metrics: MetricSet::default(),
    })?;
    assert_eq!(next.id, 4);

    let mut ops = Vec::new();
    replay_journal(&path, |entry| {
        ops.push(entry.record);
        Ok(())
    })?;
    assert!(matches!(ops.last(), Some(JournalRecord::Reading { .. })));
    Ok(())
}

#[test]
fn metrics_track_writes_and_failures() -> Result<()> {
    let registry = Arc::new(Registry::new());
    let store = InMemoryStore::new().with_metrics(PersistenceMetrics::new(registry.clone())?);
    store.upsert_reactor(Reactor::new(5, "NuScale", ReactorFamily::Smr, 45.0, -123.0))?;
    store.fail_next(1);
    assert!(store.update_health(5, 99.0, ReactorStatus::Healthy, Utc::now()).is_err());

    let families = registry.gather();
    let failures = families
        .iter()
        .find(|f| f.get_name() == "reactorsync_store_write_failures_total")
        .expect("failure family registered");
    assert_eq!(failures.get_metric()[0].get_counter().get_value(), 1.0);
    Ok(())
}
