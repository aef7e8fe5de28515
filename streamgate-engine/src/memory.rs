use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use streamgate_core::{
    subject, BucketInfo, DeliverFrom, Engine, EngineError, EntryStream, KvEngine, KvEntry,
    LogEngine, LogEntry, LogInfo, PublishAck, ReadStart, Result,
};

use crate::config::{BucketConfig, LogConfig};

// Live entries buffered per consumer before it falls back to re-reading the log
const FEED_CAPACITY: usize = 1024;

/// MemoryEngine keeps logs and buckets in process memory and implements the full engine
/// contract: contiguous per-log sequences, per-bucket revisions, tombstones and
/// ephemeral consumers. Used for development mode and tests.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    logs: Arc<DashMap<String, Arc<LogState>>>,
    buckets: Arc<DashMap<String, Arc<BucketState>>>,
    connected: Arc<watch::Sender<bool>>,
}

#[derive(Debug)]
struct LogState {
    config: LogConfig,
    created: DateTime<Utc>,
    entries: RwLock<Vec<LogEntry>>,
    feed: broadcast::Sender<LogEntry>,
    // Payload bytes stored, maintained by append
    bytes: AtomicU64,
    consumers: Arc<AtomicU64>,
    deleted: CancellationToken,
}

#[derive(Debug)]
struct BucketState {
    config: BucketConfig,
    data: RwLock<BucketData>,
}

#[derive(Debug, Default)]
struct BucketData {
    revision: u64,
    history: BTreeMap<String, Vec<KvEntry>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(true);
        MemoryEngine {
            logs: Arc::new(DashMap::new()),
            buckets: Arc::new(DashMap::new()),
            connected: Arc::new(connected),
        }
    }

    /// Build an engine pre-populated with the given logs and buckets.
    pub fn with_resources(logs: &[LogConfig], buckets: &[BucketConfig]) -> Result<Self> {
        let engine = Self::new();
        for log in logs {
            engine.create_log(log.clone())?;
        }
        for bucket in buckets {
            engine.create_bucket(bucket.clone())?;
        }
        Ok(engine)
    }

    pub fn create_log(&self, config: LogConfig) -> Result<()> {
        if config.name.is_empty() || config.subjects.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "log {} needs a name and at least one subject",
                config.name
            )));
        }
        if let Some(bad) = config.subjects.iter().find(|s| !subject::is_valid_filter(s)) {
            return Err(EngineError::InvalidArgument(format!(
                "invalid subject pattern {} for log {}",
                bad, config.name
            )));
        }
        if self.logs.contains_key(&config.name) {
            return Err(EngineError::InvalidArgument(format!(
                "log already exists: {}",
                config.name
            )));
        }
        for existing in self.logs.iter() {
            let clash = existing.config.subjects.iter().any(|taken| {
                config
                    .subjects
                    .iter()
                    .any(|wanted| subject::overlaps(taken, wanted))
            });
            if clash {
                return Err(EngineError::InvalidArgument(format!(
                    "subjects of log {} overlap with log {}",
                    config.name,
                    existing.key()
                )));
            }
        }

        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        debug!(log = %config.name, subjects = ?config.subjects, "memory log created");
        self.logs.insert(
            config.name.clone(),
            Arc::new(LogState {
                config,
                created: Utc::now(),
                entries: RwLock::new(Vec::new()),
                feed,
                bytes: AtomicU64::new(0),
                consumers: Arc::new(AtomicU64::new(0)),
                deleted: CancellationToken::new(),
            }),
        );
        Ok(())
    }

    /// Remove a log. Consumers attached to it terminate with `LogNotFound`.
    pub fn delete_log(&self, name: &str) -> Result<()> {
        let (_, state) = self
            .logs
            .remove(name)
            .ok_or_else(|| EngineError::LogNotFound(name.to_string()))?;
        state.deleted.cancel();
        debug!(log = %name, "memory log deleted");
        Ok(())
    }

    pub fn create_bucket(&self, config: BucketConfig) -> Result<()> {
        if config.name.is_empty() || config.history < 1 {
            return Err(EngineError::InvalidArgument(format!(
                "bucket {} needs a name and a history of at least 1",
                config.name
            )));
        }
        if self.buckets.contains_key(&config.name) {
            return Err(EngineError::InvalidArgument(format!(
                "bucket already exists: {}",
                config.name
            )));
        }
        debug!(bucket = %config.name, history = config.history, "memory bucket created");
        self.buckets.insert(
            config.name.clone(),
            Arc::new(BucketState {
                config,
                data: RwLock::new(BucketData::default()),
            }),
        );
        Ok(())
    }

    pub fn delete_bucket(&self, name: &str) -> Result<()> {
        self.buckets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::BucketNotFound(name.to_string()))
    }

    /// Simulate losing (or regaining) the engine connection. While disconnected every
    /// operation fails and live consumers terminate with `Disconnected`.
    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    fn ensure_connected(&self) -> Result<()> {
        if *self.connected.borrow() {
            Ok(())
        } else {
            Err(EngineError::Disconnected(
                "memory engine is offline".to_string(),
            ))
        }
    }

    fn log(&self, name: &str) -> Result<Arc<LogState>> {
        self.ensure_connected()?;
        self.logs
            .get(name)
            .map(|state| Arc::clone(state.value()))
            .ok_or_else(|| EngineError::LogNotFound(name.to_string()))
    }

    fn bucket(&self, name: &str) -> Result<Arc<BucketState>> {
        self.ensure_connected()?;
        self.buckets
            .get(name)
            .map(|state| Arc::clone(state.value()))
            .ok_or_else(|| EngineError::BucketNotFound(name.to_string()))
    }
}

impl LogState {
    async fn info(&self) -> LogInfo {
        let entries = self.entries.read().await;
        LogInfo {
            name: self.config.name.clone(),
            subjects: self.config.subjects.clone(),
            retention: "limits".to_string(),
            storage: "memory".to_string(),
            replicas: 1,
            max_consumers: -1,
            max_msgs: -1,
            max_bytes: -1,
            messages: entries.len() as u64,
            bytes: self.bytes.load(Ordering::SeqCst),
            first_sequence: entries.first().map(|e| e.sequence).unwrap_or(0),
            last_sequence: entries.last().map(|e| e.sequence).unwrap_or(0),
            consumers: self.consumers.load(Ordering::SeqCst),
            created: self.created,
        }
    }

    /// Entries from `sequence` (inclusive) to the current tail.
    async fn entries_from(&self, sequence: u64) -> VecDeque<LogEntry> {
        let entries = self.entries.read().await;
        let idx = entries.partition_point(|e| e.sequence < sequence);
        entries[idx..].iter().cloned().collect()
    }
}

impl BucketState {
    async fn info(&self) -> BucketInfo {
        let data = self.data.read().await;
        let revisions = data.history.iter().flat_map(|(_, versions)| versions.iter());
        let (values, bytes) = revisions.fold((0u64, 0u64), |(values, bytes), entry| {
            (values + 1, bytes + (entry.key.len() + entry.value.len()) as u64)
        });
        BucketInfo {
            bucket: self.config.name.clone(),
            history: self.config.history,
            ttl_seconds: self.config.ttl_seconds,
            storage: "memory".to_string(),
            bytes,
            values,
            is_compressed: false,
        }
    }
}

#[async_trait]
impl KvEngine for MemoryEngine {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.ensure_connected()?;
        let states: Vec<Arc<BucketState>> =
            self.buckets.iter().map(|b| Arc::clone(b.value())).collect();

        let mut infos = Vec::with_capacity(states.len());
        for state in states {
            infos.push(state.info().await);
        }
        infos.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(infos)
    }

    async fn entry(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>> {
        let state = self.bucket(bucket)?;
        let data = state.data.read().await;
        Ok(data
            .history
            .get(key)
            .and_then(|versions| versions.last().cloned()))
    }

    async fn put(&self, bucket: &str, key: &str, value: Bytes) -> Result<KvEntry> {
        let state = self.bucket(bucket)?;
        let mut data = state.data.write().await;
        data.revision += 1;

        let entry = KvEntry {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value,
            revision: data.revision,
            created_at: Utc::now(),
            tombstoned: false,
        };
        record_revision(&mut data, state.config.history, entry.clone());
        trace!(bucket = %bucket, key = %key, revision = entry.revision, "memory put");
        Ok(entry)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let state = self.bucket(bucket)?;
        let mut data = state.data.write().await;
        if !data.history.contains_key(key) {
            return Err(EngineError::KeyNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        data.revision += 1;

        let tombstone = KvEntry {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value: Bytes::new(),
            revision: data.revision,
            created_at: Utc::now(),
            tombstoned: true,
        };
        record_revision(&mut data, state.config.history, tombstone);
        trace!(bucket = %bucket, key = %key, "memory delete");
        Ok(())
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        let state = self.bucket(bucket)?;
        let data = state.data.read().await;
        Ok(data
            .history
            .iter()
            .filter(|(_, versions)| versions.last().is_some_and(|latest| !latest.tombstoned))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

fn record_revision(data: &mut BucketData, history: i64, entry: KvEntry) {
    let versions = data.history.entry(entry.key.clone()).or_default();
    versions.push(entry);
    let keep = history.max(1) as usize;
    if versions.len() > keep {
        let excess = versions.len() - keep;
        versions.drain(..excess);
    }
}

#[async_trait]
impl LogEngine for MemoryEngine {
    async fn list_logs(&self) -> Result<Vec<LogInfo>> {
        self.ensure_connected()?;
        let states: Vec<Arc<LogState>> = self.logs.iter().map(|l| Arc::clone(l.value())).collect();

        let mut infos = Vec::with_capacity(states.len());
        for state in states {
            infos.push(state.info().await);
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn log_info(&self, log: &str) -> Result<LogInfo> {
        let state = self.log(log)?;
        Ok(state.info().await)
    }

    async fn read(&self, log: &str, start: ReadStart) -> Result<EntryStream> {
        let state = self.log(log)?;

        let (first_idx, end_idx) = {
            let entries = state.entries.read().await;
            let first_idx = match start {
                ReadStart::Sequence(sequence) => entries.partition_point(|e| e.sequence < sequence),
                ReadStart::Time(at) => entries.partition_point(|e| e.published_at < at),
            };
            (first_idx, entries.len())
        };

        // Entries are fetched one at a time so an early-stopping reader never copies
        // more of the log than it consumes.
        let stream = futures::stream::unfold(first_idx, move |idx| {
            let state = Arc::clone(&state);
            async move {
                if idx >= end_idx {
                    return None;
                }
                let entry = state.entries.read().await.get(idx).cloned()?;
                Some((Ok(entry), idx + 1))
            }
        });
        Ok(EntryStream::new(stream))
    }

    async fn append(&self, subject: &str, payload: Bytes) -> Result<PublishAck> {
        self.ensure_connected()?;
        let state = self
            .logs
            .iter()
            .find(|log| {
                log.config
                    .subjects
                    .iter()
                    .any(|pattern| subject::matches(pattern, subject))
            })
            .map(|log| Arc::clone(log.value()))
            .ok_or_else(|| EngineError::NoLogForSubject(subject.to_string()))?;

        let mut entries = state.entries.write().await;
        let last = entries.last();
        let sequence = last.map(|e| e.sequence + 1).unwrap_or(1);
        // Keep publish times non-decreasing so time lookups can binary search
        let published_at = last
            .map(|e| e.published_at.max(Utc::now()))
            .unwrap_or_else(Utc::now);

        let entry = LogEntry {
            log: state.config.name.clone(),
            sequence,
            subject: subject.to_string(),
            payload,
            published_at,
        };
        state.bytes.fetch_add(entry.size() as u64, Ordering::SeqCst);
        entries.push(entry.clone());
        // Sent under the write lock so the feed carries entries in sequence order
        let _ = state.feed.send(entry);

        trace!(log = %state.config.name, sequence, subject = %subject, "memory append");
        Ok(PublishAck {
            log: state.config.name.clone(),
            sequence,
        })
    }

    async fn create_consumer(
        &self,
        log: &str,
        filter: Option<&str>,
        from: DeliverFrom,
    ) -> Result<EntryStream> {
        let state = self.log(log)?;
        if let Some(pattern) = filter {
            if !subject::is_valid_filter(pattern) {
                return Err(EngineError::InvalidArgument(format!(
                    "invalid subject filter: {}",
                    pattern
                )));
            }
        }

        // Subscribing while holding the read lock means no append can slip between the
        // backlog snapshot and the live feed.
        let (feed, backlog, next_sequence) = {
            let entries = state.entries.read().await;
            let feed = state.feed.subscribe();
            let tail = entries.last().map(|e| e.sequence).unwrap_or(0);
            match from {
                DeliverFrom::New => (feed, VecDeque::new(), tail + 1),
                DeliverFrom::Sequence(start) => {
                    let idx = entries.partition_point(|e| e.sequence < start);
                    let backlog: VecDeque<LogEntry> = entries[idx..].iter().cloned().collect();
                    (feed, backlog, start.max(1))
                }
            }
        };

        let cursor = ConsumerCursor {
            _lease: ConsumerLease::acquire(Arc::clone(&state.consumers)),
            log: state,
            feed,
            connected: self.connected.subscribe(),
            filter: filter.map(str::to_string),
            next_sequence,
            backlog,
            finished: false,
        };
        debug!(log = %log, filter = ?filter, from = ?from, "memory consumer created");

        Ok(EntryStream::new(futures::stream::unfold(
            cursor,
            ConsumerCursor::next_entry,
        )))
    }
}

impl Engine for MemoryEngine {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

/// Counts a live consumer on its log for as long as it is held.
#[derive(Debug)]
struct ConsumerLease(Arc<AtomicU64>);

impl ConsumerLease {
    fn acquire(counter: Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        ConsumerLease(counter)
    }
}

impl Drop for ConsumerLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ConsumerCursor {
    log: Arc<LogState>,
    feed: broadcast::Receiver<LogEntry>,
    connected: watch::Receiver<bool>,
    filter: Option<String>,
    // Next sequence this consumer has not yet passed over
    next_sequence: u64,
    backlog: VecDeque<LogEntry>,
    finished: bool,
    _lease: ConsumerLease,
}

impl ConsumerCursor {
    async fn next_entry(mut self) -> Option<(Result<LogEntry>, Self)> {
        if self.finished {
            return None;
        }

        loop {
            // A replay must not outlive its log or the connection
            if !self.backlog.is_empty() {
                if let Some(err) = self.interrupted() {
                    return Some((Err(err), self));
                }
            }
            if let Some(entry) = self.backlog.pop_front() {
                if let Some(entry) = self.advance(entry) {
                    return Some((Ok(entry), self));
                }
                continue;
            }

            tokio::select! {
                _ = self.log.deleted.cancelled() => {
                    return Some((Err(self.terminate_deleted()), self));
                }
                _ = wait_disconnected(&mut self.connected) => {
                    self.finished = true;
                    let err = EngineError::Disconnected("memory engine is offline".to_string());
                    return Some((Err(err), self));
                }
                received = self.feed.recv() => match received {
                    Ok(entry) if entry.sequence < self.next_sequence => continue,
                    Ok(entry) if entry.sequence > self.next_sequence => {
                        // A gap means the feed skipped entries; re-read them from the log
                        self.backlog = self.log.entries_from(self.next_sequence).await;
                    }
                    Ok(entry) => {
                        if let Some(entry) = self.advance(entry) {
                            return Some((Ok(entry), self));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(log = %self.log.config.name, skipped, "consumer lagged, re-reading log");
                        self.backlog = self.log.entries_from(self.next_sequence).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Some((Err(self.terminate_deleted()), self));
                    }
                }
            }
        }
    }

    fn advance(&mut self, entry: LogEntry) -> Option<LogEntry> {
        if entry.sequence < self.next_sequence {
            return None;
        }
        self.next_sequence = entry.sequence + 1;
        let selected = self
            .filter
            .as_deref()
            .map_or(true, |pattern| subject::matches(pattern, &entry.subject));
        selected.then_some(entry)
    }

    fn interrupted(&mut self) -> Option<EngineError> {
        if self.log.deleted.is_cancelled() {
            return Some(self.terminate_deleted());
        }
        if !*self.connected.borrow() {
            self.finished = true;
            return Some(EngineError::Disconnected(
                "memory engine is offline".to_string(),
            ));
        }
        None
    }

    fn terminate_deleted(&mut self) -> EngineError {
        self.finished = true;
        EngineError::LogNotFound(self.log.config.name.clone())
    }
}

async fn wait_disconnected(connected: &mut watch::Receiver<bool>) {
    // A dropped sender also ends the wait
    let _ = connected.wait_for(|up| !*up).await;
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;
