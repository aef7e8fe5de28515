use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use std::task::{Context, Poll};
use std::{fmt, pin::Pin};

use crate::errors::Result;
use crate::model::{BucketInfo, KvEntry, LogEntry, LogInfo, PublishAck};

/// Where a forward range read over a log begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStart {
    /// Start at this sequence (inclusive).
    Sequence(u64),
    /// Start at the first entry published at or after this instant.
    Time(DateTime<Utc>),
}

/// Where an ephemeral consumer starts delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverFrom {
    /// Only entries appended after the consumer was created.
    New,
    /// Every entry from this sequence (inclusive), then live entries.
    Sequence(u64),
}

/// Revisioned key-value side of the external engine.
#[async_trait]
pub trait KvEngine: Send + Sync + 'static {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    /// Latest revision of `key`, which may be a tombstone.
    async fn entry(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>>;

    async fn put(&self, bucket: &str, key: &str, value: Bytes) -> Result<KvEntry>;

    /// Writes a tombstone for `key`. Fails with `KeyNotFound` when the engine refuses.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Keys whose latest revision is not a tombstone.
    async fn keys(&self, bucket: &str) -> Result<Vec<String>>;
}

/// Append-only log side of the external engine.
#[async_trait]
pub trait LogEngine: Send + Sync + 'static {
    async fn list_logs(&self) -> Result<Vec<LogInfo>>;

    async fn log_info(&self, log: &str) -> Result<LogInfo>;

    /// Forward read from `start` up to the tail observed when the read is opened.
    async fn read(&self, log: &str, start: ReadStart) -> Result<EntryStream>;

    /// Append `payload` to the log whose subjects match `subject`.
    async fn append(&self, subject: &str, payload: Bytes) -> Result<PublishAck>;

    /// Create an ephemeral consumer. The consumer lives as long as the returned stream;
    /// dropping the stream releases it.
    async fn create_consumer(
        &self,
        log: &str,
        filter: Option<&str>,
        from: DeliverFrom,
    ) -> Result<EntryStream>;
}

/// A connected log and key-value engine.
pub trait Engine: LogEngine + KvEngine {
    fn is_connected(&self) -> bool;
}

/// Ordered sequence of log entries produced by an engine read or consumer.
pub struct EntryStream {
    inner: Pin<Box<dyn Stream<Item = Result<LogEntry>> + Send>>,
}

impl Stream for EntryStream {
    type Item = Result<LogEntry>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl EntryStream {
    pub fn new(stream: impl Stream<Item = Result<LogEntry>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }

    /// Stream over an already materialized, ordered batch of entries.
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        Self::new(futures::stream::iter(entries.into_iter().map(Ok)))
    }
}

impl fmt::Debug for EntryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryStream").finish_non_exhaustive()
    }
}
