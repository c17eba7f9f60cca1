//! ---
//! rs_section: "02-messaging-ipc-data-model"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Message envelope, keyed broker transport, and publisher."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Keyed, partitioned message transport for telemetry, health, and alerts.

pub mod logging;
pub mod supervisor;
pub mod transport;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors surfaced by transports and publishers.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// The broker refused the message; publishing may be retried.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// Wrapper for IO errors encountered during messaging operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use logging::{log_message, MessageDirection, MessagingMetricsExporter};
pub use supervisor::{MessagingMetrics, TelemetryPublisher, TopicNames};
pub use transport::{BrokerSettings, Delivery, InMemoryBroker, Record, Transport};
pub use types::{HealthUpdate, Message, MessagePayload, SCHEMA_VERSION};
