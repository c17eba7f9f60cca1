//! ---
//! rs_section: "02-messaging-ipc-data-model"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Transport abstraction and the in-memory partitioned broker."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{Message, MessagingError, Result};

/// Transport abstraction used by all messaging backends.
pub trait Transport: Send + Sync {
    /// Append a message to a topic, routed by the message key.
    fn publish(&self, topic: &str, msg: Message) -> Result<Delivery>;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// Where a published message landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Topic the message was appended to.
    pub topic: String,
    /// Partition selected from the key.
    pub partition: usize,
    /// Offset within the partition.
    pub offset: u64,
}

/// Message as stored in a partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Topic of the record.
    pub topic: String,
    /// Partition index.
    pub partition: usize,
    /// Offset within the partition.
    pub offset: u64,
    /// Envelope as published.
    pub message: Message,
}

/// Sizing for the in-memory broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Partitions per topic.
    pub partitions: usize,
    /// Buffer of each live subscription.
    pub subscriber_capacity: usize,
    /// Records retained per partition for polling consumers.
    pub retained_per_partition: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            partitions: 6,
            subscriber_capacity: 1024,
            retained_per_partition: 10_000,
        }
    }
}

#[derive(Debug)]
struct Partition {
    next_offset: u64,
    records: VecDeque<Record>,
}

#[derive(Debug)]
struct Topic {
    partitions: Vec<Partition>,
    live: broadcast::Sender<Record>,
}

impl Topic {
    fn new(settings: &BrokerSettings) -> Self {
        let (live, _) = broadcast::channel(settings.subscriber_capacity.max(1));
        Self {
            partitions: (0..settings.partitions.max(1))
                .map(|_| Partition {
                    next_offset: 0,
                    records: VecDeque::new(),
                })
                .collect(),
            live,
        }
    }
}

/// Keyed, partitioned topics held in memory.
///
/// Messages with the same key always land in the same partition, and each
/// partition is FIFO, so per-key order is preserved. Live subscribers receive
/// every record of a topic through a broadcast channel.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    settings: BrokerSettings,
    topics: Arc<Mutex<BTreeMap<String, Topic>>>,
    fail_next: Arc<AtomicUsize>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl InMemoryBroker {
    /// Create a broker with the provided sizing.
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            topics: Arc::new(Mutex::new(BTreeMap::new())),
            fail_next: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Partition a key maps to.
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.settings.partitions.max(1) as u64) as usize
    }

    /// Make the next `count` publish calls fail with [`MessagingError::Unavailable`].
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Subscribe to every record appended to a topic from now on.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Record> {
        let mut topics = self.topics.lock();
        topics
            .entry(topic.to_owned())
            .or_insert_with(|| Topic::new(&self.settings))
            .live
            .subscribe()
    }

    /// Retained records of one partition, oldest first.
    pub fn partition_records(&self, topic: &str, partition: usize) -> Vec<Record> {
        self.topics
            .lock()
            .get(topic)
            .and_then(|t| t.partitions.get(partition))
            .map(|p| p.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Retained records for one key in publish order.
    pub fn records_for_key(&self, topic: &str, key: &str) -> Vec<Record> {
        self.partition_records(topic, self.partition_for(key))
            .into_iter()
            .filter(|record| record.message.key == key)
            .collect()
    }

    /// Total retained records on a topic.
    pub fn len(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|t| t.partitions.iter().map(|p| p.records.len()).sum())
            .unwrap_or(0)
    }

    /// Whether a topic has no retained records.
    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Transport for InMemoryBroker {
    fn publish(&self, topic: &str, msg: Message) -> Result<Delivery> {
        if self.take_injected_failure() {
            return Err(MessagingError::Unavailable(format!(
                "injected failure publishing to {topic}"
            )));
        }
        let partition_index = self.partition_for(&msg.key);
        let mut topics = self.topics.lock();
        let entry = topics
            .entry(topic.to_owned())
            .or_insert_with(|| Topic::new(&self.settings));
        let partition = entry
            .partitions
            .get_mut(partition_index)
            .ok_or_else(|| MessagingError::Unavailable(format!("partition {partition_index} missing")))?;
        let offset = partition.next_offset;
        partition.next_offset += 1;
        let record = Record {
            topic: topic.to_owned(),
            partition: partition_index,
            offset,
            message: msg,
        };
        partition.records.push_back(record.clone());
        while partition.records.len() > self.settings.retained_per_partition {
            partition.records.pop_front();
        }
        // no live subscribers is not an error
        let _ = entry.live.send(record);
        Ok(Delivery {
            topic: topic.to_owned(),
            partition: partition_index,
            offset,
        })
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessagePayload;
    use chrono::Utc;
    use reactorsync_common::{MetricSet, TelemetryReading};

    fn reading_message(reactor_id: u32, temperature: f64) -> Message {
        let reading = TelemetryReading {
            reactor_id,
            timestamp: Utc::now(),
            metrics: MetricSet {
                core_temperature: temperature,
                ..MetricSet::default()
            },
        };
        Message::new("test", MessagePayload::Telemetry(reading))
    }

    #[test]
    fn same_key_lands_in_same_partition_in_order() {
        let broker = InMemoryBroker::default();
        let mut partitions = Vec::new();
        for step in 0..20 {
            let delivery = broker
                .publish("rs.telemetry", reading_message(7, step as f64))
                .expect("publish succeeds");
            partitions.push(delivery.partition);
        }
        partitions.dedup();
        assert_eq!(partitions.len(), 1);

        let records = broker.records_for_key("rs.telemetry", "7");
        let temperatures: Vec<f64> = records
            .iter()
            .map(|record| match &record.message.payload {
                MessagePayload::Telemetry(reading) => reading.metrics.core_temperature,
                _ => panic!("unexpected payload"),
            })
            .collect();
        assert_eq!(temperatures, (0..20).map(|s| s as f64).collect::<Vec<_>>());
        let offsets: Vec<u64> = records.iter().map(|r| r.offset).collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let broker = InMemoryBroker::default();
        broker.fail_next(2);
        assert!(matches!(
            broker.publish("t", reading_message(1, 1.0)),
            Err(MessagingError::Unavailable(_))
        ));
        assert!(broker.publish("t", reading_message(1, 1.0)).is_err());
        assert!(broker.publish("t", reading_message(1, 1.0)).is_ok());
        assert_eq!(broker.len("t"), 1);
    }

    #[test]
    fn retention_drops_oldest_records() {
        let broker = InMemoryBroker::new(BrokerSettings {
            partitions: 1,
            subscriber_capacity: 4,
            retained_per_partition: 3,
        });
        for step in 0..5 {
            broker.publish("t", reading_message(1, step as f64)).unwrap();
        }
        let offsets: Vec<u64> = broker
            .partition_records("t", 0)
            .iter()
            .map(|r| r.offset)
            .collect();
        assert_eq!(offsets, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn subscribers_receive_live_records() {
        let broker = InMemoryBroker::default();
        let mut rx = broker.subscribe("rs.alerts");
        broker.publish("rs.alerts", reading_message(3, 10.0)).unwrap();
        let record = rx.recv().await.expect("record delivered");
        assert_eq!(record.message.key, "3");
        assert_eq!(record.topic, "rs.alerts");
    }
}
