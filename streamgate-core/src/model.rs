use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// A single record of an append-only log, as assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    // Name of the log the entry was appended to
    pub log: String,
    // Monotonic, unique per log
    pub sequence: u64,
    // Subject the entry was published on
    pub subject: String,
    pub payload: Bytes,
    pub published_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl Display for LogEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "log:_{}_seq:_{}_subject:_{}",
            self.log, self.sequence, self.subject
        )
    }
}

/// Latest revision of a key in a bucket.
///
/// A delete is recorded as a revision with `tombstoned` set; the revision counter keeps
/// advancing across tombstones, so a re-created key always gets a greater revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub bucket: String,
    pub key: String,
    pub value: Bytes,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub tombstoned: bool,
}

/// Confirmation of a successful append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub log: String,
    pub sequence: u64,
}

/// Description of a key-value bucket and its current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    pub bucket: String,
    // Number of revisions retained per key
    pub history: i64,
    // Zero means entries never expire
    pub ttl_seconds: i64,
    pub storage: String,
    pub bytes: u64,
    // Number of revisions currently stored, tombstones included
    pub values: u64,
    pub is_compressed: bool,
}

/// Description of a log, its limits and its current state.
///
/// `-1` in any of the `max_*` limits means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogInfo {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: String,
    pub storage: String,
    pub replicas: u32,
    pub max_consumers: i64,
    pub max_msgs: i64,
    pub max_bytes: i64,
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    // Live ephemeral consumers attached to the log
    pub consumers: u64,
    pub created: DateTime<Utc>,
}

impl LogInfo {
    pub fn is_empty(&self) -> bool {
        self.messages == 0
    }
}

pub const DEFAULT_RANGE_LIMIT: i64 = 10;
pub const MAX_RANGE_LIMIT: i64 = 100;

fn default_range_limit() -> i64 {
    DEFAULT_RANGE_LIMIT
}

/// Historical read over a single log.
///
/// Without `start_sequence` or `start_time` the read covers the last `limit` entries of the
/// log. `limit` is carried signed so that every out of range value reaches validation
/// instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeQuery {
    #[serde(alias = "log")]
    pub log_name: String,
    #[serde(default)]
    pub start_sequence: Option<u64>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subject_filter: Option<String>,
    #[serde(default = "default_range_limit")]
    pub limit: i64,
}

impl RangeQuery {
    pub fn new(log_name: impl Into<String>) -> Self {
        RangeQuery {
            log_name: log_name.into(),
            start_sequence: None,
            start_time: None,
            end_time: None,
            subject_filter: None,
            limit: DEFAULT_RANGE_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn from_sequence(mut self, sequence: u64) -> Self {
        self.start_sequence = Some(sequence);
        self
    }

    pub fn from_time(mut self, at: DateTime<Utc>) -> Self {
        self.start_time = Some(at);
        self
    }

    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        self.end_time = Some(at);
        self
    }

    pub fn filtered(mut self, pattern: impl Into<String>) -> Self {
        self.subject_filter = Some(pattern.into());
        self
    }
}

/// A client's request for live delivery from a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub log_name: String,
    #[serde(default)]
    pub subject_filter: Option<String>,
    /// First sequence to deliver. Absent means entries appended from now on.
    #[serde(default)]
    pub resume: Option<u64>,
}

impl SubscribeRequest {
    pub fn new(log_name: impl Into<String>) -> Self {
        SubscribeRequest {
            log_name: log_name.into(),
            subject_filter: None,
            resume: None,
        }
    }

    pub fn filtered(mut self, pattern: impl Into<String>) -> Self {
        self.subject_filter = Some(pattern.into());
        self
    }

    pub fn resume_at(mut self, sequence: u64) -> Self {
        self.resume = Some(sequence);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_query_defaults_to_last_ten() {
        let query: RangeQuery = serde_json::from_str(r#"{"logName":"ORDERS"}"#).unwrap();
        assert_eq!(query, RangeQuery::new("ORDERS"));
        assert_eq!(query.limit, DEFAULT_RANGE_LIMIT);
    }

    #[test]
    fn range_query_accepts_rfc3339_with_and_without_fraction() {
        let query: RangeQuery = serde_json::from_str(
            r#"{"log":"ORDERS","startTime":"2024-05-01T10:00:00Z","endTime":"2024-05-01T10:00:00.250+02:00","limit":0}"#,
        )
        .unwrap();
        assert_eq!(query.limit, 0);
        assert_eq!(
            query.start_time.unwrap().to_rfc3339(),
            "2024-05-01T10:00:00+00:00"
        );
        assert!(query.end_time.unwrap() < query.start_time.unwrap());
    }
}
