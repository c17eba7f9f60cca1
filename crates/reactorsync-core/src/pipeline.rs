//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Per-tick generate, publish, persist, and health loop."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
//! The emission pipeline owns one [`PhysicsModel`] per reactor and, on every
//! tick, walks the registry in id order: synthesize a reading with any active
//! anomaly offsets, publish it keyed by reactor, persist it, then refresh the
//! reactor's health and raise faults. Publish and persist go through the
//! retry policy; a reading that still fails is skipped and the loop carries on.
//!
//! Activations that expire at the end of a tick have their faults resolved at
//! the start of the next one, so a fault stays open for every tick its
//! anomaly perturbed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result as AnyResult;
use chrono::{DateTime, Utc};
use reactorsync_common::{
    Fault, GeneratorConfig, NewFault, PersistedReading, Reactor, ReactorId, ReactorStatus,
    StoreConfig, TelemetryReading,
};
use reactorsync_metrics::GeneratorMetrics;
use reactorsync_msg::{HealthUpdate, TelemetryPublisher};
use reactorsync_persistence::{StoreError, TelemetryStore};
use reactorsync_sim::{
    AnomalyController, AnomalyInjection, ClearTarget, FaultTrigger, HealthModel, PhysicsModel,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, Result};
use crate::retry::{Retrier, RetryPolicy};
use crate::scheduler::RateLimiter;
use crate::stats::{GenerationStats, StatsHandle};

const CLEANUP_EVERY_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub interval: Duration,
    pub seed: u64,
    pub start_tick: u64,
    pub healthy_threshold: f64,
    pub warning_threshold: f64,
    pub dedup_window: chrono::Duration,
    pub drain_timeout: Duration,
    /// Readings older than this are dropped; `None` keeps everything.
    pub retention: Option<chrono::Duration>,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&GeneratorConfig::default(), &StoreConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(generator: &GeneratorConfig, store: &StoreConfig) -> Self {
        Self {
            interval: generator.interval_ms,
            seed: generator.seed,
            start_tick: generator.start_tick,
            healthy_threshold: generator.healthy_threshold,
            warning_threshold: generator.warning_threshold,
            dedup_window: chrono::Duration::seconds(generator.fault_dedup_window.as_secs() as i64),
            drain_timeout: generator.drain_timeout,
            retention: (store.retention_days > 0)
                .then(|| chrono::Duration::days(i64::from(store.retention_days))),
            retry: RetryPolicy::from_config(&generator.retry),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmittedReading {
    pub reading: PersistedReading,
    pub health_score: f64,
    pub status: ReactorStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedReading {
    pub reactor_id: ReactorId,
    pub reason: String,
}

/// What one tick produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub emitted: Vec<EmittedReading>,
    pub skipped: Vec<SkippedReading>,
    pub raised: Vec<Fault>,
    pub resolved: Vec<Fault>,
}

impl TickReport {
    pub fn reading_for(&self, reactor_id: ReactorId) -> Option<&EmittedReading> {
        self.emitted
            .iter()
            .find(|emitted| emitted.reading.reading.reactor_id == reactor_id)
    }
}

pub struct EmissionPipeline {
    settings: PipelineSettings,
    store: Arc<dyn TelemetryStore>,
    publisher: Arc<TelemetryPublisher>,
    anomalies: AnomalyController,
    health: HealthModel,
    physics: BTreeMap<ReactorId, PhysicsModel>,
    last_timestamp: BTreeMap<ReactorId, DateTime<Utc>>,
    resolving: Vec<AnomalyInjection>,
    last_cleanup: Option<DateTime<Utc>>,
    tick: u64,
    retrier: Retrier,
    stats: StatsHandle,
    metrics: Option<GeneratorMetrics>,
}

impl EmissionPipeline {
    pub fn new(
        settings: PipelineSettings,
        store: Arc<dyn TelemetryStore>,
        publisher: Arc<TelemetryPublisher>,
        anomalies: AnomalyController,
    ) -> Self {
        Self {
            health: HealthModel::new(settings.healthy_threshold, settings.warning_threshold),
            retrier: Retrier::new(settings.retry).with_seed(settings.seed),
            tick: settings.start_tick,
            settings,
            store,
            publisher,
            anomalies,
            physics: BTreeMap::new(),
            last_timestamp: BTreeMap::new(),
            resolving: Vec::new(),
            last_cleanup: None,
            stats: StatsHandle::default(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: GeneratorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn stats(&self) -> StatsHandle {
        self.stats.clone()
    }

    pub fn health_model(&self) -> &HealthModel {
        &self.health
    }

    /// Tick number the next call to [`run_tick`](Self::run_tick) will use.
    pub fn next_tick(&self) -> u64 {
        self.tick
    }

    pub async fn run_tick(&mut self) -> TickReport {
        let started = Instant::now();
        let now = Utc::now();
        let tick = self.tick;
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        self.resolve_expired(now, &mut report);
        self.run_cleanup(now);

        let reactors = match self.store.list_reactors() {
            Ok(reactors) => reactors,
            Err(err) => {
                error!(tick, error = %err, "failed to snapshot reactor registry");
                Vec::new()
            }
        };

        for reactor in &reactors {
            if let Err(err) = self.emit(reactor, tick, now, &mut report).await {
                warn!(reactor_id = reactor.id, tick, error = %err, "reading skipped");
                report.skipped.push(SkippedReading {
                    reactor_id: reactor.id,
                    reason: err.to_string(),
                });
            }
        }

        self.resolving.extend(self.anomalies.advance());
        self.drop_orphaned_anomalies(&reactors);
        self.physics
            .retain(|id, _| reactors.iter().any(|reactor| reactor.id == *id));
        self.last_timestamp
            .retain(|id, _| reactors.iter().any(|reactor| reactor.id == *id));
        self.tick += 1;

        let elapsed = started.elapsed();
        self.stats.update(|stats| {
            stats.ticks += 1;
            stats.current_tick = tick;
            stats.started_at.get_or_insert(now);
            stats.last_tick_at = Some(now);
        });
        if let Some(metrics) = &self.metrics {
            metrics.set_active_anomalies(self.anomalies.len());
            metrics.observe_tick(elapsed.as_secs_f64());
        }
        debug!(
            tick,
            emitted = report.emitted.len(),
            skipped = report.skipped.len(),
            raised = report.raised.len(),
            resolved = report.resolved.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "tick complete"
        );
        report
    }

    /// Resolve faults of activations that expired on the last tick.
    pub fn flush(&mut self) -> Vec<Fault> {
        let mut report = TickReport::default();
        self.resolve_expired(Utc::now(), &mut report);
        report.resolved
    }

    async fn emit(
        &mut self,
        reactor: &Reactor,
        tick: u64,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        let reactor_id = reactor.id;
        let anomaly_active = self.anomalies.is_active(reactor_id);
        let perturbation = self.anomalies.perturbation(reactor_id);
        let seed = self.settings.seed;
        let physics = self
            .physics
            .entry(reactor_id)
            .or_insert_with(|| PhysicsModel::for_reactor(seed, reactor_id));
        let metrics = match physics.reading(reactor.family, tick, &perturbation) {
            Ok(metrics) => metrics,
            Err(violation) => {
                self.stats.update(|stats| stats.range_violations += 1);
                return Err(violation.into());
            }
        };

        let timestamp = match self.last_timestamp.get(&reactor_id) {
            Some(previous) if *previous > now => *previous,
            _ => now,
        };
        self.last_timestamp.insert(reactor_id, timestamp);
        let reading = TelemetryReading {
            reactor_id,
            timestamp,
            metrics,
        };
        self.stats.update(|stats| stats.readings_generated += 1);
        if let Some(gauges) = &self.metrics {
            gauges.record_reading(reactor.family.as_ref());
        }

        let publisher = self.publisher.clone();
        if let Err(exhausted) = self
            .retrier
            .run("publish", reactor_id, |_| publisher.publish_reading(reading))
            .await
        {
            self.stats.update(|stats| stats.publish_failures += 1);
            if let Some(gauges) = &self.metrics {
                gauges.record_publish_failure();
            }
            return Err(CoreError::TransientPublishFailure {
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            });
        }
        self.stats.update(|stats| stats.readings_published += 1);

        let store = self.store.clone();
        let persisted = match self
            .retrier
            .run("persist", reactor_id, |_| store.insert_reading(&reading))
            .await
        {
            Ok(row) => row,
            Err(exhausted) => {
                if let StoreError::UnknownReactor(id) = exhausted.last_error {
                    return Err(CoreError::UnknownReactor(id));
                }
                self.stats.update(|stats| stats.persist_failures += 1);
                if let Some(gauges) = &self.metrics {
                    gauges.record_persist_failure();
                }
                return Err(CoreError::TransientPersistFailure {
                    attempts: exhausted.attempts,
                    source: exhausted.last_error,
                });
            }
        };
        self.stats.update(|stats| stats.readings_persisted += 1);

        let health_score = self.health.score(&metrics);
        let status = self.health.status(health_score);
        if let Err(exhausted) = self
            .retrier
            .run("update_health", reactor_id, |_| {
                store.update_health(reactor_id, health_score, status, timestamp)
            })
            .await
        {
            warn!(reactor_id, tick, error = %exhausted.last_error, "health update dropped");
        } else if let Err(err) = self.publisher.publish_health(HealthUpdate {
            reactor_id,
            health_score,
            status,
            timestamp,
        }) {
            debug!(reactor_id, tick, error = %err, "health update not published");
        }
        report.emitted.push(EmittedReading {
            reading: persisted,
            health_score,
            status,
        });

        for trigger in self.anomalies.observe(reactor_id, &metrics, &self.health) {
            let fault = NewFault {
                reactor_id,
                fault_type: trigger.anomaly_type.to_string(),
                severity: trigger.severity,
                description: describe_trigger(&trigger),
                timestamp,
            };
            if let Some(fault) = self.raise_fault(fault).await {
                if !self.anomalies.attach_fault(&trigger, fault.id) {
                    self.resolve_detached(&trigger, &fault, timestamp);
                }
                report.raised.push(fault);
            }
        }

        if !anomaly_active {
            if let Some(fault) = self
                .threshold_fault(reactor_id, health_score, &reading)
                .await
            {
                report.raised.push(fault);
            }
        }
        Ok(())
    }

    async fn threshold_fault(
        &mut self,
        reactor_id: ReactorId,
        health_score: f64,
        reading: &TelemetryReading,
    ) -> Option<Fault> {
        let severity = self.health.fault_severity(health_score)?;
        let fault_type = self.health.determine_fault_type(&reading.metrics)?;
        let since = reading.timestamp - self.settings.dedup_window;
        match self.store.open_fault(reactor_id, fault_type, since) {
            Ok(Some(existing)) => {
                debug!(reactor_id, fault_type, fault_id = existing.id, "open fault within dedup window");
                None
            }
            Ok(None) => {
                let description = format!(
                    "health score {health_score:.1} below {:.0} with {fault_type}",
                    self.health.healthy_threshold()
                );
                self.raise_fault(NewFault {
                    reactor_id,
                    fault_type: fault_type.to_owned(),
                    severity,
                    description,
                    timestamp: reading.timestamp,
                })
                .await
            }
            Err(err) => {
                warn!(reactor_id, fault_type, error = %err, "dedup lookup failed");
                None
            }
        }
    }

    async fn raise_fault(&mut self, fault: NewFault) -> Option<Fault> {
        let reactor_id = fault.reactor_id;
        let store = self.store.clone();
        let created = match self
            .retrier
            .run("create_fault", reactor_id, |_| store.create_fault(fault.clone()))
            .await
        {
            Ok(created) => created,
            Err(exhausted) => {
                error!(reactor_id, fault_type = %fault.fault_type, error = %exhausted.last_error, "fault not stored");
                return None;
            }
        };
        info!(
            reactor_id,
            fault_id = created.id,
            fault_type = %created.fault_type,
            severity = %created.severity,
            "fault raised"
        );
        let publisher = self.publisher.clone();
        let alert = created.clone();
        if let Err(exhausted) = self
            .retrier
            .run("publish_alert", reactor_id, |_| publisher.publish_alert(alert.clone()))
            .await
        {
            warn!(reactor_id, fault_id = created.id, error = %exhausted.last_error, "alert not published");
        }
        self.stats.update(|stats| stats.faults_raised += 1);
        if let Some(gauges) = &self.metrics {
            gauges.record_fault(&created.fault_type, &created.severity.to_string());
        }
        Some(created)
    }

    /// The activation behind `trigger` was cleared or replaced while its
    /// fault was being stored, so nothing else will resolve it.
    fn resolve_detached(&mut self, trigger: &FaultTrigger, fault: &Fault, now: DateTime<Utc>) {
        match self.store.resolve_fault(fault.id, now) {
            Ok(_) => {
                info!(
                    reactor_id = trigger.reactor_id,
                    anomaly = %trigger.anomaly_type,
                    fault_id = fault.id,
                    "fault resolved; activation removed before attach"
                );
                self.stats.update(|stats| stats.faults_resolved += 1);
            }
            Err(err) => {
                warn!(reactor_id = trigger.reactor_id, fault_id = fault.id, error = %err, "failed to resolve detached fault");
            }
        }
    }

    /// Injections on reactors deleted from the registry never advance again.
    fn drop_orphaned_anomalies(&mut self, reactors: &[Reactor]) {
        let mut orphaned: Vec<ReactorId> = self
            .anomalies
            .active()
            .iter()
            .map(|injection| injection.reactor_id)
            .filter(|id| !reactors.iter().any(|reactor| reactor.id == *id))
            .collect();
        orphaned.dedup();
        for reactor_id in orphaned {
            if let Err(StoreError::UnknownReactor(_)) = self.store.reactor(reactor_id) {
                let dropped = self.anomalies.clear(reactor_id, ClearTarget::All);
                debug!(reactor_id, dropped = dropped.len(), "dropped anomalies of deleted reactor");
                self.resolving.extend(dropped);
            }
        }
    }

    fn resolve_expired(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        for injection in std::mem::take(&mut self.resolving) {
            let Some(fault_id) = injection.fault_id else {
                continue;
            };
            match self.store.resolve_fault(fault_id, now) {
                Ok(fault) => {
                    info!(
                        reactor_id = injection.reactor_id,
                        anomaly = %injection.anomaly_type,
                        fault_id,
                        "fault resolved after anomaly expiry"
                    );
                    self.stats.update(|stats| stats.faults_resolved += 1);
                    report.resolved.push(fault);
                }
                Err(err) => {
                    warn!(reactor_id = injection.reactor_id, fault_id, error = %err, "failed to resolve fault");
                }
            }
        }
    }

    fn run_cleanup(&mut self, now: DateTime<Utc>) {
        let Some(retention) = self.settings.retention else {
            return;
        };
        if matches!(self.last_cleanup, Some(last) if now - last < chrono::Duration::seconds(CLEANUP_EVERY_SECS)) {
            return;
        }
        self.last_cleanup = Some(now);
        match self.store.cleanup(now - retention) {
            Ok(removed) if removed > 0 => info!(removed, "expired readings removed"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "retention cleanup failed"),
        }
    }

    /// Run the loop on the tokio runtime until [`PipelineHandle::shutdown`].
    pub fn spawn(self) -> PipelineHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(4);
        let drain_timeout = self.settings.drain_timeout;
        let stats = self.stats.clone();
        let task = tokio::spawn(async move {
            let mut pipeline = self;
            let mut limiter = RateLimiter::new(pipeline.settings.interval);
            info!(
                interval_ms = pipeline.settings.interval.as_millis() as u64,
                start_tick = pipeline.tick,
                seed = pipeline.settings.seed,
                "emission loop started"
            );
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("emission loop shutdown signal received");
                        break;
                    }
                    _ = limiter.tick() => {
                        pipeline.run_tick().await;
                    }
                }
            }
            let resolved = pipeline.flush();
            info!(
                ticks = pipeline.stats.snapshot().ticks,
                resolved = resolved.len(),
                "emission loop stopped"
            );
            pipeline
        });
        PipelineHandle {
            shutdown: shutdown_tx,
            task,
            drain_timeout,
            stats,
        }
    }
}

fn describe_trigger(trigger: &FaultTrigger) -> String {
    format!(
        "{} {}: {} at {:.2} {}",
        trigger.severity,
        trigger.anomaly_type,
        trigger.metric,
        trigger.value,
        trigger.metric.unit()
    )
}

/// Handle to the spawned emission loop.
#[derive(Debug)]
pub struct PipelineHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<EmissionPipeline>,
    drain_timeout: Duration,
    stats: StatsHandle,
}

impl PipelineHandle {
    pub fn stats(&self) -> GenerationStats {
        self.stats.snapshot()
    }

    /// Stop scheduling, wait for the in-flight tick up to the drain timeout.
    ///
    /// Returns the pipeline when it stopped in time, `None` when it was aborted.
    pub async fn shutdown(mut self) -> AnyResult<Option<EmissionPipeline>> {
        let _ = self.shutdown.send(());
        match tokio::time::timeout(self.drain_timeout, &mut self.task).await {
            Ok(Ok(pipeline)) => Ok(Some(pipeline)),
            Ok(Err(join_err)) => Err(anyhow::Error::new(join_err)),
            Err(_) => {
                warn!(
                    drain_timeout_ms = self.drain_timeout.as_millis() as u64,
                    "emission loop did not drain in time; aborting"
                );
                self.task.abort();
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for EmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmissionPipeline")
            .field("tick", &self.tick)
            .field("reactors", &self.physics.len())
            .field("resolving", &self.resolving.len())
            .finish_non_exhaustive()
    }
}
