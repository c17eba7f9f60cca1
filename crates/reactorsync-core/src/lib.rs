//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Emission pipeline, retry policy, and anomaly control."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
//! Emission loop and operator control surface for ReactorSync.

pub mod control;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod stats;

pub use control::{InjectionAck, InjectionRequest, SimulationControl};
pub use error::{CoreError, Result};
pub use pipeline::{
    EmissionPipeline, EmittedReading, PipelineHandle, PipelineSettings, SkippedReading,
    TickReport,
};
pub use retry::{Retrier, RetryExhausted, RetryPolicy, Transient};
pub use scheduler::RateLimiter;
pub use stats::{GenerationStats, StatsHandle};
