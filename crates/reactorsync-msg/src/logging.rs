//! ---
//! rs_section: "02-messaging-ipc-data-model"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Structured message logging and Prometheus publish counters."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use prometheus::{IntCounterVec, Opts, Registry};
use tracing::debug;

use crate::types::Message;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Message handed to a transport.
    Outbound,
    /// Message read back by a consumer.
    Inbound,
}

/// Emit a structured log entry for message activity.
pub fn log_message(direction: MessageDirection, topic: &str, message: &Message) {
    debug!(
        message_id = %message.id,
        key = %message.key,
        topic,
        timestamp = %message.producer_timestamp,
        kind = message.kind(),
        schema_version = message.schema_version,
        direction = ?direction,
        "messaging activity"
    );
}

/// Prometheus metric handles for publish activity.
#[derive(Clone)]
pub struct MessagingMetricsExporter {
    published: IntCounterVec,
    failed: IntCounterVec,
}

impl MessagingMetricsExporter {
    /// Register messaging metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let published = IntCounterVec::new(
            Opts::new(
                "reactorsync_messages_published_total",
                "Messages accepted by the broker",
            ),
            &["topic"],
        )?;
        let failed = IntCounterVec::new(
            Opts::new(
                "reactorsync_messages_failed_total",
                "Publish attempts rejected by the broker",
            ),
            &["topic"],
        )?;

        registry.register(Box::new(published.clone()))?;
        registry.register(Box::new(failed.clone()))?;

        Ok(Self { published, failed })
    }

    /// Record an accepted message.
    pub fn observe_published(&self, topic: &str) {
        self.published.with_label_values(&[topic]).inc();
    }

    /// Record a rejected publish attempt.
    pub fn observe_failed(&self, topic: &str) {
        self.failed.with_label_values(&[topic]).inc();
    }
}
