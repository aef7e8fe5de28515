use super::KvBridge;
use crate::error::GatewayError;

use bytes::Bytes;
use std::sync::Arc;
use streamgate_engine::{BucketConfig, MemoryEngine};

fn bridge() -> (KvBridge, MemoryEngine) {
    let engine = MemoryEngine::with_resources(&[], &[BucketConfig::new("B").with_history(10)])
        .unwrap();
    (KvBridge::new(Arc::new(engine.clone())), engine)
}

/// Write, overwrite, delete and list a single key.
///
/// Each write must get a strictly greater revision, and a deleted key must disappear
/// from both reads and listings.
#[tokio::test]
async fn put_get_delete_lifecycle() {
    let (kv, _) = bridge();

    let r1 = kv.put("B", "k", Bytes::from("v1")).await.unwrap();
    assert!(r1.revision > 0);
    let r2 = kv.put("B", "k", Bytes::from("v2")).await.unwrap();
    assert!(r2.revision > r1.revision);

    let current = kv.get("B", "k").await.unwrap().unwrap();
    assert_eq!(current.value, Bytes::from("v2"));
    assert_eq!(current.revision, r2.revision);

    assert!(kv.delete("B", "k").await.unwrap());
    assert!(kv.get("B", "k").await.unwrap().is_none());
    assert!(!kv.list_keys("B").await.unwrap().contains(&"k".to_string()));
}

#[tokio::test]
async fn recreated_key_gets_a_greater_revision() {
    let (kv, _) = bridge();

    let before = kv.put("B", "k", Bytes::from("v1")).await.unwrap();
    kv.delete("B", "k").await.unwrap();
    let after = kv.put("B", "k", Bytes::from("v2")).await.unwrap();

    assert!(after.revision > before.revision);
    assert_eq!(
        kv.get("B", "k").await.unwrap().unwrap().value,
        Bytes::from("v2")
    );
}

#[tokio::test]
async fn missing_keys_are_absent_not_errors() {
    let (kv, _) = bridge();

    assert!(kv.get("B", "never").await.unwrap().is_none());
    assert!(!kv.delete("B", "never").await.unwrap());

    // Deleting an already deleted key still writes a tombstone
    kv.put("B", "gone", Bytes::from("x")).await.unwrap();
    assert!(kv.delete("B", "gone").await.unwrap());
    assert!(kv.delete("B", "gone").await.unwrap());
}

#[tokio::test]
async fn missing_bucket_is_not_found() {
    let (kv, _) = bridge();

    assert!(matches!(
        kv.get("nope", "k").await.unwrap_err(),
        GatewayError::NotFound(_)
    ));
    assert!(matches!(
        kv.put("nope", "k", Bytes::from("v")).await.unwrap_err(),
        GatewayError::NotFound(_)
    ));
    assert!(matches!(
        kv.delete("nope", "k").await.unwrap_err(),
        GatewayError::NotFound(_)
    ));
    assert!(matches!(
        kv.list_keys("nope").await.unwrap_err(),
        GatewayError::NotFound(_)
    ));
}

#[tokio::test]
async fn keys_are_listed_in_order() {
    let (kv, _) = bridge();
    for key in ["zeta", "alpha", "mid"] {
        kv.put("B", key, Bytes::from("v")).await.unwrap();
    }
    assert_eq!(kv.list_keys("B").await.unwrap(), vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn disconnected_engine_is_unavailable() {
    let (kv, engine) = bridge();
    engine.set_connected(false);

    assert!(matches!(
        kv.list_buckets().await.unwrap_err(),
        GatewayError::EngineUnavailable(_)
    ));
    assert!(matches!(
        kv.get("B", "k").await.unwrap_err(),
        GatewayError::EngineUnavailable(_)
    ));
}

#[tokio::test]
async fn empty_key_is_rejected() {
    let (kv, _) = bridge();
    assert!(matches!(
        kv.put("B", "", Bytes::from("v")).await.unwrap_err(),
        GatewayError::Validation(_)
    ));
}
