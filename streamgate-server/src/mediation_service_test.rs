use super::{MediationService, Operation, OperationOutput};
use crate::error::GatewayError;
use crate::publish_gate::MAX_PAYLOAD_BYTES;
use crate::subscription::{SubscriptionSettings, SubscriptionState};

use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use streamgate_core::{LogEngine, RangeQuery, SubscribeRequest};
use streamgate_engine::{BucketConfig, LogConfig, MemoryEngine};
use tokio::time::timeout;

fn service() -> (MediationService, MemoryEngine) {
    let engine = MemoryEngine::with_resources(
        &[LogConfig::new("L", &["L.*"])],
        &[BucketConfig::new("B").with_history(5)],
    )
    .unwrap();
    let service = MediationService::new(Arc::new(engine.clone()), SubscriptionSettings::default());
    (service, engine)
}

fn put(key: &str, value: &str) -> Operation {
    Operation::PutKey {
        bucket: "B".into(),
        key: key.into(),
        value: Bytes::from(value.to_string()),
    }
}

fn get(key: &str) -> Operation {
    Operation::GetKey {
        bucket: "B".into(),
        key: key.into(),
    }
}

fn publish(subject: &str, payload: impl Into<Bytes>) -> Operation {
    Operation::Publish {
        subject: subject.into(),
        payload: payload.into(),
    }
}

/// Key-value walkthrough on an empty bucket: two writes, a read, a delete, a listing.
#[tokio::test]
async fn key_value_scenario() {
    let (service, _) = service();

    let OperationOutput::Written(r1) = service.execute(put("k", "v1")).await.unwrap() else {
        panic!("expected a written entry");
    };
    assert!(r1.revision > 0);
    let OperationOutput::Written(r2) = service.execute(put("k", "v2")).await.unwrap() else {
        panic!("expected a written entry");
    };
    assert!(r2.revision > r1.revision);

    let OperationOutput::Entry(Some(current)) = service.execute(get("k")).await.unwrap() else {
        panic!("expected the key to be present");
    };
    assert_eq!(current.value, Bytes::from("v2"));

    let deleted = service
        .execute(Operation::DeleteKey {
            bucket: "B".into(),
            key: "k".into(),
        })
        .await
        .unwrap();
    assert_eq!(deleted, OperationOutput::Deleted(true));
    assert_eq!(
        service.execute(get("k")).await.unwrap(),
        OperationOutput::Entry(None)
    );

    let keys = service
        .execute(Operation::ListKeys {
            bucket: "B".into(),
        })
        .await
        .unwrap();
    assert_eq!(keys, OperationOutput::Keys(vec![]));
}

/// Five entries on `L.a`..`L.e`, then the default read for three returns the newest
/// three; a limit of 101 fails without touching the log.
#[tokio::test]
async fn log_range_scenario() {
    let (service, engine) = service();
    for letter in ["a", "b", "c", "d", "e"] {
        service
            .execute(publish(&format!("L.{}", letter), letter.to_string()))
            .await
            .unwrap();
    }

    let OperationOutput::Entries(entries) = service
        .execute(Operation::ReadRange(RangeQuery::new("L").with_limit(3)))
        .await
        .unwrap()
    else {
        panic!("expected entries");
    };
    let subjects: Vec<&str> = entries.iter().map(|e| e.subject.as_str()).collect();
    assert_eq!(subjects, vec!["L.c", "L.d", "L.e"]);

    engine.set_connected(false);
    let err = service
        .execute(Operation::ReadRange(RangeQuery::new("L").with_limit(101)))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
}

#[tokio::test]
async fn publish_advances_the_tail() {
    let (service, engine) = service();
    service.execute(publish("L.a", "first")).await.unwrap();
    let tail = engine.log_info("L").await.unwrap().last_sequence;

    let OperationOutput::Published(ack) = service.execute(publish("L.b", "second")).await.unwrap()
    else {
        panic!("expected a publish ack");
    };
    assert_eq!(ack.log, "L");
    assert!(ack.sequence > tail);

    let err = service
        .execute(publish("L.c", vec![1u8; MAX_PAYLOAD_BYTES + 1]))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::PayloadTooLarge { .. }));
    assert_eq!(engine.log_info("L").await.unwrap().last_sequence, ack.sequence);

    assert!(matches!(
        service.execute(publish("M.a", "x")).await.unwrap_err(),
        GatewayError::NoMatchingLog(_)
    ));
}

#[tokio::test]
async fn listings_describe_resources() {
    let (service, _) = service();
    service.execute(put("k", "v")).await.unwrap();
    service.execute(publish("L.a", "x")).await.unwrap();

    let OperationOutput::Buckets(buckets) = service.execute(Operation::ListBuckets).await.unwrap()
    else {
        panic!("expected buckets");
    };
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].bucket, "B");
    assert_eq!(buckets[0].history, 5);
    assert_eq!(buckets[0].values, 1);

    let OperationOutput::Logs(logs) = service.execute(Operation::ListLogs).await.unwrap() else {
        panic!("expected logs");
    };
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].name, "L");
    assert_eq!(logs[0].subjects, vec!["L.*".to_string()]);
    assert_eq!(logs[0].messages, 1);
}

/// Subscribe, publish one entry, receive exactly that entry; then disconnect and watch
/// the consumer count return to where it was.
#[tokio::test]
async fn subscription_scenario() {
    let (service, engine) = service();
    service.execute(publish("L.old", "before")).await.unwrap();
    let consumers_before = engine.log_info("L").await.unwrap().consumers;

    let mut subscription = service.subscribe(SubscribeRequest::new("L")).await;
    assert_eq!(subscription.state(), SubscriptionState::Streaming);

    service.execute(publish("L.x", "live")).await.unwrap();
    let entry = timeout(Duration::from_secs(2), subscription.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(entry.subject, "L.x");
    assert_eq!(entry.payload, Bytes::from("live"));

    drop(subscription);
    timeout(Duration::from_secs(2), async {
        while engine.log_info("L").await.unwrap().consumers != consumers_before {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn readiness_follows_the_engine() {
    let (service, engine) = service();
    assert!(service.is_ready());

    engine.set_connected(false);
    assert!(!service.is_ready());
    assert!(matches!(
        service.execute(Operation::ListLogs).await.unwrap_err(),
        GatewayError::EngineUnavailable(_)
    ));

    engine.set_connected(true);
    assert!(service.is_ready());
}
