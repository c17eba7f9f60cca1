//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Admin-facing anomaly injection and clearing."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::Utc;
use reactorsync_common::{FaultSeverity, ReactorId};
use reactorsync_persistence::TelemetryStore;
use reactorsync_sim::{
    AnomalyController, AnomalyInjection, AnomalyKind, AnomalyRequest, ClearTarget,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};

/// Injection request as received from operators; validated by [`SimulationControl::inject`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionRequest {
    pub reactor_id: ReactorId,
    pub anomaly_type: String,
    #[serde(default)]
    pub severity: Option<String>,
    pub duration_ticks: i64,
}

impl InjectionRequest {
    pub fn new(
        reactor_id: ReactorId,
        anomaly_type: impl Into<String>,
        severity: FaultSeverity,
        duration_ticks: i64,
    ) -> Self {
        Self {
            reactor_id,
            anomaly_type: anomaly_type.into(),
            severity: Some(severity.to_string()),
            duration_ticks,
        }
    }

    fn validate(&self) -> Result<AnomalyRequest> {
        let anomaly_type = self.anomaly_type.trim().parse::<AnomalyKind>().map_err(|_| {
            CoreError::InvalidAnomalySpec(format!("unknown anomaly type '{}'", self.anomaly_type))
        })?;
        let severity = match self.severity.as_deref().map(str::trim) {
            None | Some("") => FaultSeverity::default(),
            Some(raw) => raw.parse::<FaultSeverity>().map_err(|_| {
                CoreError::InvalidAnomalySpec(format!("unknown severity '{raw}'"))
            })?,
        };
        if self.duration_ticks <= 0 {
            return Err(CoreError::InvalidAnomalySpec(format!(
                "duration_ticks must be positive, got {}",
                self.duration_ticks
            )));
        }
        let duration_ticks = u32::try_from(self.duration_ticks).map_err(|_| {
            CoreError::InvalidAnomalySpec(format!(
                "duration_ticks too large: {}",
                self.duration_ticks
            ))
        })?;
        Ok(AnomalyRequest {
            reactor_id: self.reactor_id,
            anomaly_type,
            severity,
            duration_ticks,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InjectionAck {
    pub injection: AnomalyInjection,
    /// An earlier activation of the same kind was replaced.
    pub replaced: bool,
}

/// Shared entry point for injecting and clearing anomalies.
#[derive(Clone)]
pub struct SimulationControl {
    store: Arc<dyn TelemetryStore>,
    anomalies: AnomalyController,
}

impl SimulationControl {
    pub fn new(store: Arc<dyn TelemetryStore>, anomalies: AnomalyController) -> Self {
        Self { store, anomalies }
    }

    pub fn anomalies(&self) -> &AnomalyController {
        &self.anomalies
    }

    /// Validate and start an activation. Nothing changes when validation fails.
    pub fn inject(&self, request: &InjectionRequest) -> Result<InjectionAck> {
        let request = request.validate()?;
        self.store.reactor(request.reactor_id)?;
        let replaced = self.anomalies.inject(request)?;
        if let Some(previous) = &replaced {
            self.resolve_open_fault(previous);
        }
        let injection = self
            .anomalies
            .get(request.reactor_id, request.anomaly_type)
            .ok_or_else(|| {
                CoreError::InvalidAnomalySpec("injection vanished before acknowledgement".into())
            })?;
        Ok(InjectionAck {
            injection,
            replaced: replaced.is_some(),
        })
    }

    /// Clear one kind or every kind on a reactor; returns the kinds removed.
    pub fn clear(&self, reactor_id: ReactorId, target: &str) -> Result<Vec<AnomalyKind>> {
        let target: ClearTarget = target.trim().parse()?;
        self.store.reactor(reactor_id)?;
        let cleared = self.anomalies.clear(reactor_id, target);
        for injection in &cleared {
            self.resolve_open_fault(injection);
        }
        info!(reactor_id, cleared = cleared.len(), "clear request handled");
        Ok(cleared.into_iter().map(|i| i.anomaly_type).collect())
    }

    pub fn active(&self) -> Vec<AnomalyInjection> {
        self.anomalies.active()
    }

    fn resolve_open_fault(&self, injection: &AnomalyInjection) {
        if let Some(fault_id) = injection.fault_id {
            if let Err(err) = self.store.resolve_fault(fault_id, Utc::now()) {
                warn!(
                    reactor_id = injection.reactor_id,
                    anomaly = %injection.anomaly_type,
                    fault_id,
                    error = %err,
                    "failed to resolve fault for removed injection"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactorsync_common::{Metric, NewFault, Reactor, ReactorFamily};
    use reactorsync_persistence::{FaultFilter, InMemoryStore};
    use reactorsync_sim::FaultTrigger;

    fn control() -> (SimulationControl, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_reactor(Reactor::new(1, "Bruce A", ReactorFamily::Candu, 44.3, -81.6))
            .unwrap();
        (
            SimulationControl::new(store.clone(), AnomalyController::new(3)),
            store,
        )
    }

    #[test]
    fn unknown_reactor_is_rejected_without_mutation() {
        let (control, _) = control();
        let err = control
            .inject(&InjectionRequest::new(9999, "temperature_spike", FaultSeverity::Critical, 5))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownReactor(9999)));
        assert!(control.active().is_empty());
        assert!(matches!(
            control.clear(9999, "all"),
            Err(CoreError::UnknownReactor(9999))
        ));
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let (control, _) = control();
        for request in [
            InjectionRequest::new(1, "meltdown", FaultSeverity::Critical, 5),
            InjectionRequest::new(1, "pressure_drop", FaultSeverity::Advisory, 0),
            InjectionRequest::new(1, "pressure_drop", FaultSeverity::Advisory, -3),
            InjectionRequest {
                reactor_id: 1,
                anomaly_type: "pressure_drop".into(),
                severity: Some("purple".into()),
                duration_ticks: 2,
            },
        ] {
            assert!(matches!(
                control.inject(&request),
                Err(CoreError::InvalidAnomalySpec(_))
            ));
        }
        assert!(matches!(
            control.clear(1, "meltdown"),
            Err(CoreError::InvalidAnomalySpec(_))
        ));
        assert!(control.active().is_empty());
    }

    #[test]
    fn wire_severity_aliases_are_accepted() {
        let (control, _) = control();
        let ack = control
            .inject(&InjectionRequest {
                reactor_id: 1,
                anomaly_type: "pump_failure".into(),
                severity: Some("red".into()),
                duration_ticks: 3,
            })
            .unwrap();
        assert_eq!(ack.injection.severity, FaultSeverity::Critical);
        assert!(!ack.replaced);
    }

    fn attach_stored_fault(
        control: &SimulationControl,
        store: &InMemoryStore,
        ack: &InjectionAck,
    ) -> u64 {
        let injection = &ack.injection;
        let fault = store
            .create_fault(NewFault {
                reactor_id: injection.reactor_id,
                fault_type: injection.anomaly_type.to_string(),
                severity: injection.severity,
                description: "test".into(),
                timestamp: Utc::now(),
            })
            .unwrap();
        let trigger = FaultTrigger {
            activation: injection.activation,
            reactor_id: injection.reactor_id,
            anomaly_type: injection.anomaly_type,
            severity: injection.severity,
            metric: Metric::Pressure,
            value: 0.0,
        };
        assert!(control.anomalies().attach_fault(&trigger, fault.id));
        fault.id
    }

    #[test]
    fn replacing_resolves_the_previous_fault() {
        let (control, store) = control();
        let ack = control
            .inject(&InjectionRequest::new(1, "coolant_leak", FaultSeverity::Advisory, 10))
            .unwrap();
        attach_stored_fault(&control, &store, &ack);

        let ack = control
            .inject(&InjectionRequest::new(1, "coolant_leak", FaultSeverity::Critical, 4))
            .unwrap();
        assert!(ack.replaced);
        assert_eq!(ack.injection.remaining_ticks, 4);
        assert_eq!(control.active().len(), 1);
        let open = store
            .faults(FaultFilter {
                reactor_id: Some(1),
                resolved: Some(false),
            })
            .unwrap();
        assert!(open.is_empty());
    }

    #[test]
    fn clear_all_returns_kinds() {
        let (control, _) = control();
        for kind in ["pressure_drop", "vibration_increase"] {
            control
                .inject(&InjectionRequest::new(1, kind, FaultSeverity::Advisory, 10))
                .unwrap();
        }
        let cleared = control.clear(1, "ALL").unwrap();
        assert_eq!(
            cleared,
            vec![AnomalyKind::PressureDrop, AnomalyKind::VibrationIncrease]
        );
        assert!(control.clear(1, "pressure_drop").unwrap().is_empty());
    }

    #[test]
    fn clear_resolves_attached_faults() {
        let (control, store) = control();
        let ack = control
            .inject(&InjectionRequest::new(1, "pressure_drop", FaultSeverity::Critical, 10))
            .unwrap();
        let fault_id = attach_stored_fault(&control, &store, &ack);

        assert_eq!(
            control.clear(1, "all").unwrap(),
            vec![AnomalyKind::PressureDrop]
        );
        let fault = store
            .faults(FaultFilter::default())
            .unwrap()
            .into_iter()
            .find(|fault| fault.id == fault_id)
            .unwrap();
        assert!(fault.resolved);
        assert!(fault.resolved_at.is_some());
    }
}
