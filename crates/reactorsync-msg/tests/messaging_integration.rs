//! ---
//! rs_section: "02-messaging-ipc-data-model"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Broker ordering and publisher behaviour across reactors."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use reactorsync_common::{MetricSet, TelemetryReading};
use reactorsync_msg::{
    BrokerSettings, InMemoryBroker, MessagePayload, TelemetryPublisher, TopicNames, Transport,
};

fn reading(reactor_id: u32, tick: i64) -> TelemetryReading {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    TelemetryReading {
        reactor_id,
        timestamp: base + Duration::seconds(tick * 60),
        metrics: MetricSet::default(),
    }
}

#[test]
fn interleaved_reactors_keep_per_key_order() {
    let broker = Arc::new(InMemoryBroker::new(BrokerSettings {
        partitions: 3,
        ..BrokerSettings::default()
    }));
    let publisher = TelemetryPublisher::new("it", TopicNames::with_prefix("it"), broker.clone());
    for tick in 0..10 {
        for reactor in 1..=5 {
            publisher
                .publish_reading(reading(reactor, tick))
                .expect("publish succeeds");
        }
    }

    for reactor in 1..=5u32 {
        let records = broker.records_for_key("it.telemetry", &reactor.to_string());
        assert_eq!(records.len(), 10);
        let timestamps: Vec<_> = records
            .iter()
            .map(|record| match &record.message.payload {
                MessagePayload::Telemetry(reading) => reading.timestamp,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect();
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        let partition = broker.partition_for(&reactor.to_string());
        assert!(records.iter().all(|r| r.partition == partition));
    }
    assert_eq!(broker.len("it.telemetry"), 50);
    assert_eq!(publisher.metrics().published, 50);
}

#[tokio::test]
async fn subscriber_sees_alerts_after_transient_failure() -> anyhow::Result<()> {
    let broker = Arc::new(InMemoryBroker::default());
    let mut alerts = broker.subscribe("rs.alerts");
    broker.fail_next(1);

    let message = reactorsync_msg::Message::new("it", MessagePayload::Telemetry(reading(2, 0)));
    assert!(broker.publish("rs.alerts", message.clone()).is_err());
    let delivery = broker.publish("rs.alerts", message)?;
    assert_eq!(delivery.offset, 0);

    let record = alerts.recv().await?;
    assert_eq!(record.message.reactor_id(), 2);
    assert_eq!(broker.name(), "in_memory");
    Ok(())
}
