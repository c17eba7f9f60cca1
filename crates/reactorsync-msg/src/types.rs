//! ---
//! rs_section: "02-messaging-ipc-data-model"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Message envelope and payloads carried on broker topics."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use reactorsync_common::{Fault, ReactorId, ReactorStatus, TelemetryReading};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version broadcast alongside every message payload.
pub const SCHEMA_VERSION: u16 = 1;

/// Payload carried on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Reading produced by the generator for one reactor.
    Telemetry(TelemetryReading),
    /// Fault raised from an anomaly activation or a health threshold.
    Alert(Fault),
    /// Refreshed health score and status of a reactor.
    Health(HealthUpdate),
}

/// Health recomputation result published after a reading is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthUpdate {
    /// Reactor the score belongs to.
    pub reactor_id: ReactorId,
    /// Weighted score in [0, 100].
    pub health_score: f64,
    /// Status derived from the score.
    pub status: ReactorStatus,
    /// Timestamp of the reading the score was computed from.
    pub timestamp: DateTime<Utc>,
}

/// Unified message structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for deduplication and tracing.
    pub id: Uuid,
    /// Version of the schema used by the payload.
    pub schema_version: u16,
    /// Partition key; the reactor id for every payload this service emits.
    pub key: String,
    /// Wall-clock time the producer built the envelope.
    pub producer_timestamp: DateTime<Utc>,
    /// Producing service.
    pub source: String,
    /// Actual payload carried by the message.
    pub payload: MessagePayload,
}

impl Message {
    /// Construct a new message envelope around the provided payload.
    pub fn new(source: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            key: payload.reactor_id().to_string(),
            producer_timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }

    /// Convenience accessor returning the payload kind as a static string.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            MessagePayload::Telemetry(_) => "telemetry",
            MessagePayload::Alert(_) => "alert",
            MessagePayload::Health(_) => "health",
        }
    }

    /// Reactor the payload refers to.
    pub fn reactor_id(&self) -> ReactorId {
        self.payload.reactor_id()
    }
}

impl MessagePayload {
    /// Reactor the payload refers to.
    pub fn reactor_id(&self) -> ReactorId {
        match self {
            MessagePayload::Telemetry(reading) => reading.reactor_id,
            MessagePayload::Alert(fault) => fault.reactor_id,
            MessagePayload::Health(update) => update.reactor_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactorsync_common::{FaultSeverity, MetricSet};

    #[test]
    fn envelope_is_keyed_by_reactor() {
        let reading = TelemetryReading {
            reactor_id: 42,
            timestamp: Utc::now(),
            metrics: MetricSet::default(),
        };
        let message = Message::new("reactorsync-generator", MessagePayload::Telemetry(reading));
        assert_eq!(message.key, "42");
        assert_eq!(message.kind(), "telemetry");
        assert_eq!(message.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn alert_wire_shape_is_tagged() {
        let fault = Fault {
            id: 3,
            reactor_id: 9,
            fault_type: "pump_failure".into(),
            severity: FaultSeverity::Critical,
            description: "pump".into(),
            timestamp: Utc::now(),
            resolved: false,
            resolved_at: None,
        };
        let message = Message::new("test", MessagePayload::Alert(fault));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["payload"]["kind"], "alert");
        assert_eq!(value["payload"]["data"]["severity"], "critical");
        assert_eq!(value["source"], "test");
        assert!(value.get("producer_timestamp").is_some());
    }
}
