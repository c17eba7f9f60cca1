//! ---
//! rs_section: "11-simulation"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Per-reactor anomaly injection state machine shared by API and scheduler."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
//! Time-bounded anomaly injection.
//!
//! Entries are keyed by `(reactor, kind)`; injecting the same pair again
//! replaces the previous entry. Each entry perturbs the physics model until
//! its remaining tick budget reaches zero, at which point [`AnomalyController::advance`]
//! hands it back for fault resolution and drops it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::prelude::*;
use reactorsync_common::{FaultSeverity, Metric, MetricSet, ReactorId};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};
use tracing::{debug, info};

use crate::health::HealthModel;
use crate::physics::Perturbation;

/// Ticks over which an activation ramps from 80% to full magnitude.
const RAMP_TICKS: f64 = 3.0;
const RAMP_FLOOR: f64 = 0.8;
/// Relative amplitude of the per-tick noise on each offset.
const OFFSET_NOISE: f64 = 0.02;

/// Supported anomaly scenarios.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnomalyKind {
    TemperatureSpike,
    PressureDrop,
    VibrationIncrease,
    FluxInstability,
    CoolantLeak,
    PumpFailure,
}

impl AnomalyKind {
    /// Full-strength offsets for this kind at the given severity.
    ///
    /// Flux offsets are fractions of base flux; the rest are in channel units.
    pub fn offsets(&self, severity: FaultSeverity) -> &'static [(Metric, f64)] {
        use FaultSeverity::{Advisory, Critical};
        use Metric::*;
        match (self, severity) {
            (AnomalyKind::TemperatureSpike, Advisory) => {
                &[(CoreTemperature, 50.0), (Pressure, 0.25)]
            }
            (AnomalyKind::TemperatureSpike, Critical) => {
                &[(CoreTemperature, 95.0), (Pressure, 0.5)]
            }
            (AnomalyKind::PressureDrop, Advisory) => &[(Pressure, -3.0)],
            (AnomalyKind::PressureDrop, Critical) => &[(Pressure, -4.5)],
            (AnomalyKind::VibrationIncrease, Advisory) => &[(Vibration, 3.5)],
            (AnomalyKind::VibrationIncrease, Critical) => &[(Vibration, 7.0)],
            (AnomalyKind::FluxInstability, Advisory) => &[(NeutronFlux, 0.12)],
            (AnomalyKind::FluxInstability, Critical) => &[(NeutronFlux, 0.25)],
            (AnomalyKind::CoolantLeak, Advisory) => {
                &[(Pressure, -2.5), (CoreTemperature, 18.0), (Vibration, 0.7)]
            }
            (AnomalyKind::CoolantLeak, Critical) => {
                &[(Pressure, -4.0), (CoreTemperature, 35.0), (Vibration, 1.5)]
            }
            (AnomalyKind::PumpFailure, Advisory) => &[(Pressure, -2.0), (Vibration, 3.5)],
            (AnomalyKind::PumpFailure, Critical) => &[(Pressure, -5.0), (Vibration, 6.5)],
        }
    }

    pub fn affected_metrics(&self) -> impl Iterator<Item = Metric> {
        self.offsets(FaultSeverity::Critical)
            .iter()
            .map(|(metric, _)| *metric)
    }
}

/// Which injections a clear request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    Kind(AnomalyKind),
    All,
}

impl std::str::FromStr for ClearTarget {
    type Err = AnomalyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("all") {
            return Ok(ClearTarget::All);
        }
        value
            .parse::<AnomalyKind>()
            .map(ClearTarget::Kind)
            .map_err(|_| AnomalyError::UnknownKind(value.to_owned()))
    }
}

/// Lifecycle of an injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnomalyPhase {
    Inactive,
    Active,
    Resolving,
}

/// Request to perturb one reactor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRequest {
    pub reactor_id: ReactorId,
    pub anomaly_type: AnomalyKind,
    #[serde(default)]
    pub severity: FaultSeverity,
    pub duration_ticks: u32,
}

/// Live injection state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyInjection {
    /// Unique per activation; a re-injection of the same kind gets a new one.
    pub activation: u64,
    pub reactor_id: ReactorId,
    pub anomaly_type: AnomalyKind,
    pub severity: FaultSeverity,
    pub duration_ticks: u32,
    pub remaining_ticks: u32,
    pub elapsed_ticks: u32,
    pub started_at: DateTime<Utc>,
    pub phase: AnomalyPhase,
    /// Set once a fault has been stored for this activation.
    pub fault_id: Option<u64>,
    /// Set when the activation first crossed a band, so at most one fault is raised.
    pub fault_raised: bool,
    /// Offsets were handed out for the current tick.
    #[serde(skip)]
    applied: bool,
}

impl AnomalyInjection {
    fn ramp(&self) -> f64 {
        RAMP_FLOOR + (1.0 - RAMP_FLOOR) * (self.elapsed_ticks as f64 / RAMP_TICKS).min(1.0)
    }
}

/// Band crossing observed during an activation.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultTrigger {
    pub activation: u64,
    pub reactor_id: ReactorId,
    pub anomaly_type: AnomalyKind,
    pub severity: FaultSeverity,
    pub metric: Metric,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnomalyError {
    #[error("unknown anomaly type '{0}'")]
    UnknownKind(String),
    #[error("anomaly duration must be at least one tick")]
    ZeroDuration,
}

#[derive(Debug)]
struct Inner {
    entries: BTreeMap<(ReactorId, AnomalyKind), AnomalyInjection>,
    rng: StdRng,
    next_activation: u64,
}

/// Cloneable handle over the shared injection table.
#[derive(Debug, Clone)]
pub struct AnomalyController {
    inner: Arc<Mutex<Inner>>,
}

impl Default for AnomalyController {
    fn default() -> Self {
        Self::new(0xA70_u64)
    }
}

impl AnomalyController {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: BTreeMap::new(),
                rng: StdRng::seed_from_u64(seed),
                next_activation: 1,
            })),
        }
    }

    /// Start (or restart) an activation. Returns the entry it replaced, if any.
    pub fn inject(&self, request: AnomalyRequest) -> Result<Option<AnomalyInjection>, AnomalyError> {
        if request.duration_ticks == 0 {
            return Err(AnomalyError::ZeroDuration);
        }
        let mut guard = self.inner.lock();
        let activation = guard.next_activation;
        guard.next_activation += 1;
        let injection = AnomalyInjection {
            activation,
            reactor_id: request.reactor_id,
            anomaly_type: request.anomaly_type,
            severity: request.severity,
            duration_ticks: request.duration_ticks,
            remaining_ticks: request.duration_ticks,
            elapsed_ticks: 0,
            started_at: Utc::now(),
            phase: AnomalyPhase::Active,
            fault_id: None,
            fault_raised: false,
            applied: false,
        };
        let replaced = guard
            .entries
            .insert((request.reactor_id, request.anomaly_type), injection);
        drop(guard);
        info!(
            reactor_id = request.reactor_id,
            anomaly = %request.anomaly_type,
            severity = %request.severity,
            duration_ticks = request.duration_ticks,
            replaced = replaced.is_some(),
            "anomaly injected"
        );
        Ok(replaced)
    }

    /// Summed offsets of every active injection on a reactor.
    ///
    /// Marks each contributing injection as applied, so the next
    /// [`advance`](Self::advance) consumes one of its ticks.
    pub fn perturbation(&self, reactor_id: ReactorId) -> Perturbation {
        let mut guard = self.inner.lock();
        let Inner { entries, rng, .. } = &mut *guard;
        let mut perturbation = Perturbation::none();
        for injection in entries
            .range_mut((reactor_id, AnomalyKind::TemperatureSpike)..=(reactor_id, AnomalyKind::PumpFailure))
            .map(|(_, injection)| injection)
            .filter(|injection| injection.phase == AnomalyPhase::Active)
        {
            injection.applied = true;
            let ramp = injection.ramp();
            for (metric, magnitude) in injection.anomaly_type.offsets(injection.severity) {
                let jitter = rng.gen_range(-OFFSET_NOISE..=OFFSET_NOISE);
                perturbation.add(*metric, magnitude * ramp * (1.0 + jitter));
            }
        }
        perturbation
    }

    /// Check a reading against the bands of each active injection's channels.
    ///
    /// Returns at most one trigger per activation over its lifetime.
    pub fn observe(
        &self,
        reactor_id: ReactorId,
        metrics: &MetricSet,
        health: &HealthModel,
    ) -> Vec<FaultTrigger> {
        let mut guard = self.inner.lock();
        let mut triggers = Vec::new();
        for (_, injection) in guard
            .entries
            .range_mut((reactor_id, AnomalyKind::TemperatureSpike)..=(reactor_id, AnomalyKind::PumpFailure))
        {
            if injection.fault_raised || injection.phase != AnomalyPhase::Active {
                continue;
            }
            let worst = injection
                .anomaly_type
                .affected_metrics()
                .map(|metric| {
                    let value = metrics.get(metric);
                    (health.classify(metric, value), metric, value)
                })
                .max_by_key(|(band, _, _)| *band);
            if let Some((band, metric, value)) = worst {
                if let Some(severity) = band.severity() {
                    injection.fault_raised = true;
                    triggers.push(FaultTrigger {
                        activation: injection.activation,
                        reactor_id,
                        anomaly_type: injection.anomaly_type,
                        severity,
                        metric,
                        value,
                    });
                    debug!(reactor_id, anomaly = %injection.anomaly_type, metric = %metric, value, severity = %severity, "anomaly crossed band");
                }
            }
        }
        triggers
    }

    /// Record the stored fault for an activation so it can be resolved later.
    ///
    /// Returns `false` when that activation was cleared or replaced in the
    /// meantime; the caller then owns the fault.
    pub fn attach_fault(&self, trigger: &FaultTrigger, fault_id: u64) -> bool {
        match self
            .inner
            .lock()
            .entries
            .get_mut(&(trigger.reactor_id, trigger.anomaly_type))
        {
            Some(injection) if injection.activation == trigger.activation => {
                injection.fault_id = Some(fault_id);
                true
            }
            _ => false,
        }
    }

    /// Consume one tick from every injection that perturbed a reading since
    /// the last call and return the ones that expired.
    ///
    /// Injections added after their reactor was emitted keep their full duration.
    pub fn advance(&self) -> Vec<AnomalyInjection> {
        let mut guard = self.inner.lock();
        let mut expired_keys = Vec::new();
        for (key, injection) in guard.entries.iter_mut() {
            if !std::mem::take(&mut injection.applied) {
                continue;
            }
            injection.remaining_ticks = injection.remaining_ticks.saturating_sub(1);
            injection.elapsed_ticks = injection.elapsed_ticks.saturating_add(1);
            if injection.remaining_ticks == 0 {
                injection.phase = AnomalyPhase::Resolving;
                expired_keys.push(*key);
            }
        }
        expired_keys
            .into_iter()
            .filter_map(|key| guard.entries.remove(&key))
            .inspect(|injection| {
                info!(reactor_id = injection.reactor_id, anomaly = %injection.anomaly_type, "anomaly expired");
            })
            .collect()
    }

    /// Remove injections for a reactor. Returned entries may carry open faults.
    pub fn clear(&self, reactor_id: ReactorId, target: ClearTarget) -> Vec<AnomalyInjection> {
        let mut guard = self.inner.lock();
        let keys: Vec<_> = guard
            .entries
            .keys()
            .filter(|(reactor, kind)| {
                *reactor == reactor_id
                    && match target {
                        ClearTarget::All => true,
                        ClearTarget::Kind(wanted) => *kind == wanted,
                    }
            })
            .copied()
            .collect();
        let cleared: Vec<_> = keys
            .into_iter()
            .filter_map(|key| guard.entries.remove(&key))
            .map(|mut injection| {
                injection.phase = AnomalyPhase::Resolving;
                injection
            })
            .collect();
        if !cleared.is_empty() {
            info!(reactor_id, cleared = cleared.len(), "anomalies cleared");
        }
        cleared
    }

    pub fn phase(&self, reactor_id: ReactorId, kind: AnomalyKind) -> AnomalyPhase {
        self.inner
            .lock()
            .entries
            .get(&(reactor_id, kind))
            .map(|injection| injection.phase)
            .unwrap_or(AnomalyPhase::Inactive)
    }

    pub fn is_active(&self, reactor_id: ReactorId) -> bool {
        self.inner
            .lock()
            .entries
            .keys()
            .any(|(reactor, _)| *reactor == reactor_id)
    }

    pub fn get(&self, reactor_id: ReactorId, kind: AnomalyKind) -> Option<AnomalyInjection> {
        self.inner.lock().entries.get(&(reactor_id, kind)).cloned()
    }

    pub fn active(&self) -> Vec<AnomalyInjection> {
        self.inner.lock().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
