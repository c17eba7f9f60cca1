//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Shared domain model, configuration, and logging primitives."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
//! Shared primitives for the ReactorSync workspace: the reactor/telemetry/fault
//! model, TOML configuration loading, and tracing initialisation.

pub mod config;
pub mod logging;
pub mod model;

pub use config::{
    ApiConfig, AppConfig, BrokerConfig, GeneratorConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, ReactorSeed, RetryConfig, StoreConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use model::{
    Fault, FaultSeverity, Metric, MetricSet, NewFault, PersistedReading, Reactor, ReactorFamily,
    ReactorId, ReactorStatus, TelemetryReading,
};
