//! ---
//! rs_section: "02-messaging-ipc-data-model"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Topic-aware publisher with delivery counters."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reactorsync_common::{Fault, TelemetryReading};

use crate::logging::{log_message, MessageDirection, MessagingMetricsExporter};
use crate::transport::{Delivery, Transport};
use crate::types::{HealthUpdate, Message, MessagePayload};
use crate::Result;

/// Snapshot of publisher counters used by the stats endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessagingMetrics {
    /// Messages accepted by the transport.
    pub published: u64,
    /// Publish attempts the transport rejected.
    pub failed: u64,
}

struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> MessagingMetrics {
        MessagingMetrics {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Topic names the publisher writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNames {
    /// Readings and health updates.
    pub telemetry: String,
    /// Faults raised by the generator.
    pub alerts: String,
}

impl TopicNames {
    /// Derive both topics from a shared prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            telemetry: format!("{prefix}.telemetry"),
            alerts: format!("{prefix}.alerts"),
        }
    }
}

impl Default for TopicNames {
    fn default() -> Self {
        Self::with_prefix("reactorsync")
    }
}

/// Wraps a transport with topic routing, logging, and counters.
///
/// A publish failure is returned to the caller untouched so that retry policy
/// stays with the emitter.
pub struct TelemetryPublisher {
    source: String,
    topics: TopicNames,
    transport: Arc<dyn Transport>,
    counters: Counters,
    exporter: Option<MessagingMetricsExporter>,
}

impl TelemetryPublisher {
    /// Construct a publisher over the provided transport.
    pub fn new<T>(source: impl Into<String>, topics: TopicNames, transport: Arc<T>) -> Self
    where
        T: Transport + 'static,
    {
        Self {
            source: source.into(),
            topics,
            transport: transport as Arc<dyn Transport>,
            counters: Counters::new(),
            exporter: None,
        }
    }

    /// Attach Prometheus counters.
    pub fn with_exporter(mut self, exporter: MessagingMetricsExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Topic names in use.
    pub fn topics(&self) -> &TopicNames {
        &self.topics
    }

    /// Publish a reading on the telemetry topic.
    pub fn publish_reading(&self, reading: TelemetryReading) -> Result<Delivery> {
        let topic = self.topics.telemetry.clone();
        self.publish(&topic, MessagePayload::Telemetry(reading))
    }

    /// Publish a health update on the telemetry topic.
    pub fn publish_health(&self, update: HealthUpdate) -> Result<Delivery> {
        let topic = self.topics.telemetry.clone();
        self.publish(&topic, MessagePayload::Health(update))
    }

    /// Publish a fault on the alerts topic.
    pub fn publish_alert(&self, fault: Fault) -> Result<Delivery> {
        let topic = self.topics.alerts.clone();
        self.publish(&topic, MessagePayload::Alert(fault))
    }

    /// Wrap a payload in an envelope and hand it to the transport.
    pub fn publish(&self, topic: &str, payload: MessagePayload) -> Result<Delivery> {
        let message = Message::new(self.source.clone(), payload);
        log_message(MessageDirection::Outbound, topic, &message);
        match self.transport.publish(topic, message) {
            Ok(delivery) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                if let Some(exporter) = &self.exporter {
                    exporter.observe_published(topic);
                }
                Ok(delivery)
            }
            Err(err) => {
                tracing::warn!(
                    transport = self.transport.name(),
                    topic,
                    error = %err,
                    "transport publish failed"
                );
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if let Some(exporter) = &self.exporter {
                    exporter.observe_failed(topic);
                }
                Err(err)
            }
        }
    }

    /// Return the current metrics snapshot.
    pub fn metrics(&self) -> MessagingMetrics {
        self.counters.snapshot()
    }
}
