use super::RangeQueryEngine;
use crate::error::GatewayError;

use bytes::Bytes;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use streamgate_core::{LogEngine, RangeQuery};
use streamgate_engine::{LogConfig, MemoryEngine};

fn engine() -> MemoryEngine {
    MemoryEngine::with_resources(
        &[
            LogConfig::new("L", &["L.*"]),
            LogConfig::new("EMPTY", &["empty.>"]),
        ],
        &[],
    )
    .unwrap()
}

async fn publish_letters(engine: &MemoryEngine) {
    for letter in ["a", "b", "c", "d", "e"] {
        engine
            .append(&format!("L.{}", letter), Bytes::from(letter))
            .await
            .unwrap();
    }
}

fn sequences(entries: &[streamgate_core::LogEntry]) -> Vec<u64> {
    entries.iter().map(|e| e.sequence).collect()
}

/// Without a start cursor the read returns the most recent `limit` entries, oldest first.
#[tokio::test]
async fn default_read_returns_last_n_in_order() {
    let engine = engine();
    publish_letters(&engine).await;
    let ranges = RangeQueryEngine::new(Arc::new(engine));

    let entries = ranges
        .read_range(&RangeQuery::new("L").with_limit(3))
        .await
        .unwrap();

    assert_eq!(sequences(&entries), vec![3, 4, 5]);
    assert_eq!(entries[0].subject, "L.c");
    assert_eq!(entries[2].payload, Bytes::from("e"));
}

/// Out of range limits fail validation before the engine is consulted, which is why a
/// missing log or a disconnected engine does not change the outcome.
#[tokio::test]
async fn limit_outside_bounds_fails_validation() {
    let engine = engine();
    publish_letters(&engine).await;
    let before = engine.log_info("L").await.unwrap();
    let ranges = RangeQueryEngine::new(Arc::new(engine.clone()));

    for limit in [0, 101, -1] {
        let err = ranges
            .read_range(&RangeQuery::new("L").with_limit(limit))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)), "limit {}", limit);
    }
    assert!(matches!(
        ranges
            .read_range(&RangeQuery::new("missing").with_limit(101))
            .await
            .unwrap_err(),
        GatewayError::Validation(_)
    ));

    engine.set_connected(false);
    assert!(matches!(
        ranges
            .read_range(&RangeQuery::new("L").with_limit(0))
            .await
            .unwrap_err(),
        GatewayError::Validation(_)
    ));
    engine.set_connected(true);
    assert_eq!(engine.log_info("L").await.unwrap(), before);
}

#[tokio::test]
async fn every_valid_limit_is_respected() {
    let engine = engine();
    for i in 0..30 {
        engine
            .append("L.x", Bytes::from(i.to_string()))
            .await
            .unwrap();
    }
    let ranges = RangeQueryEngine::new(Arc::new(engine));

    for limit in 1..=100i64 {
        let entries = ranges
            .read_range(&RangeQuery::new("L").with_limit(limit))
            .await
            .unwrap();
        assert!(entries.len() as i64 <= limit);
        assert_eq!(entries.len() as i64, limit.min(30));
        assert!(entries.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }
}

#[tokio::test]
async fn read_from_start_sequence() {
    let engine = engine();
    publish_letters(&engine).await;
    let ranges = RangeQueryEngine::new(Arc::new(engine));

    let entries = ranges
        .read_range(&RangeQuery::new("L").from_sequence(2).with_limit(2))
        .await
        .unwrap();
    assert_eq!(sequences(&entries), vec![2, 3]);

    let beyond = ranges
        .read_range(&RangeQuery::new("L").from_sequence(99))
        .await
        .unwrap();
    assert!(beyond.is_empty());
}

#[tokio::test]
async fn start_sequence_wins_over_start_time() {
    let engine = engine();
    publish_letters(&engine).await;
    let later = engine.log_info("L").await.unwrap().created + ChronoDuration::days(1);
    let ranges = RangeQueryEngine::new(Arc::new(engine));

    let entries = ranges
        .read_range(&RangeQuery::new("L").from_sequence(4).from_time(later))
        .await
        .unwrap();
    assert_eq!(sequences(&entries), vec![4, 5]);
}

#[tokio::test]
async fn time_window_bounds_the_read() {
    let engine = engine();
    engine.append("L.early", Bytes::from("1")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    engine.append("L.mid", Bytes::from("2")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    engine.append("L.late", Bytes::from("3")).await.unwrap();
    let ranges = RangeQueryEngine::new(Arc::new(engine));
    let all = ranges
        .read_range(&RangeQuery::new("L").from_sequence(1))
        .await
        .unwrap();
    let mid_at = all[1].published_at;

    let from_mid = ranges
        .read_range(&RangeQuery::new("L").from_time(mid_at))
        .await
        .unwrap();
    assert_eq!(sequences(&from_mid), vec![2, 3]);

    let only_mid = ranges
        .read_range(&RangeQuery::new("L").from_time(mid_at).until(mid_at))
        .await
        .unwrap();
    assert_eq!(sequences(&only_mid), vec![2]);

    let reversed = ranges
        .read_range(
            &RangeQuery::new("L")
                .from_time(mid_at)
                .until(mid_at - ChronoDuration::seconds(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(reversed, GatewayError::Validation(_)));
}

/// A filtered default read looks at the last `limit` entries and keeps the matching ones.
#[tokio::test]
async fn subject_filter_applies_to_the_window() {
    let engine = engine();
    publish_letters(&engine).await;
    let ranges = RangeQueryEngine::new(Arc::new(engine));

    let entries = ranges
        .read_range(&RangeQuery::new("L").filtered("L.d").with_limit(3))
        .await
        .unwrap();
    assert_eq!(sequences(&entries), vec![4]);

    let from_start = ranges
        .read_range(&RangeQuery::new("L").from_sequence(1).filtered("L.a"))
        .await
        .unwrap();
    assert_eq!(sequences(&from_start), vec![1]);

    let err = ranges
        .read_range(&RangeQuery::new("L").filtered("L..bad"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
}

#[tokio::test]
async fn empty_and_missing_logs() {
    let ranges = RangeQueryEngine::new(Arc::new(engine()));

    assert!(ranges
        .read_range(&RangeQuery::new("EMPTY"))
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        ranges
            .read_range(&RangeQuery::new("missing"))
            .await
            .unwrap_err(),
        GatewayError::NotFound(_)
    ));
}
