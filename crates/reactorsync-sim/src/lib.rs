//! ---
//! rs_section: "11-simulation"
//! rs_subsection: "01-bootstrap"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Simulation module exports and shared types."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
//! Reactor telemetry synthesis: the per-family physics model, the anomaly
//! injection controller, and the health model that scores readings.

pub mod anomaly;
pub mod health;
pub mod physics;

pub use anomaly::{
    AnomalyController, AnomalyError, AnomalyInjection, AnomalyKind, AnomalyPhase, AnomalyRequest,
    ClearTarget, FaultTrigger,
};
pub use health::{Band, HealthModel, MetricBand};
pub use physics::{FamilyProfile, NoiseProfile, Perturbation, PhysicsModel, RangeViolation};
