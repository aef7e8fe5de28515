use async_nats::jetstream::{
    self,
    consumer::{pull::OrderedConfig, DeliverPolicy},
    context::{GetStreamError, GetStreamErrorKind, PublishErrorKind},
    kv::Operation,
    stream::{self, LastRawMessageErrorKind},
    errors::ErrorCode,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, trace};

use streamgate_core::{
    BucketInfo, DeliverFrom, Engine, EngineError, EntryStream, KvEngine, KvEntry, LogEngine,
    LogEntry, LogInfo, PublishAck, ReadStart, Result,
};

// JetStream backs every KV bucket with a stream carrying this prefix
const KV_STREAM_PREFIX: &str = "KV_";
const OBJECT_STREAM_PREFIX: &str = "OBJ_";
// Bounds the wait for the first message of a time-positioned probe consumer
const TIME_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// NatsEngine maps logs onto JetStream streams and buckets onto JetStream KV stores.
#[derive(Debug, Clone)]
pub struct NatsEngine {
    client: async_nats::Client,
    context: jetstream::Context,
}

impl NatsEngine {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|err| EngineError::Disconnected(err.to_string()))?;
        let context = jetstream::new(client.clone());
        debug!(url = %url, "connected to NATS");
        Ok(NatsEngine { client, context })
    }

    async fn stream(&self, name: &str, missing: impl FnOnce() -> EngineError) -> Result<stream::Stream> {
        self.context
            .get_stream(name)
            .await
            .map_err(|err| stream_error(err, missing))
    }

    async fn bucket(&self, bucket: &str) -> Result<jetstream::kv::Store> {
        // Probing the backing stream first distinguishes a missing bucket from other faults
        self.stream(&format!("{}{}", KV_STREAM_PREFIX, bucket), || {
            EngineError::BucketNotFound(bucket.to_string())
        })
        .await?;
        self.context
            .get_key_value(bucket)
            .await
            .map_err(|err| classify(err, || EngineError::BucketNotFound(bucket.to_string())))
    }

    async fn log_stream(&self, log: &str) -> Result<stream::Stream> {
        self.stream(log, || EngineError::LogNotFound(log.to_string()))
            .await
    }

    /// Sequence of the first message published at or after `at`, if any.
    async fn sequence_at(&self, stream: &stream::Stream, at: DateTime<Utc>) -> Result<Option<u64>> {
        let state = &stream.cached_info().state;
        if state.messages == 0 || to_utc(state.last_timestamp) < at {
            return Ok(None);
        }

        let probe = stream
            .create_consumer(OrderedConfig {
                deliver_policy: DeliverPolicy::ByStartTime {
                    start_time: to_offset(at),
                },
                ..Default::default()
            })
            .await
            .map_err(backend)?;
        let mut messages = probe.messages().await.map_err(backend)?;

        match tokio::time::timeout(TIME_PROBE_TIMEOUT, messages.next()).await {
            Ok(Some(Ok(message))) => {
                let info = message.info().map_err(backend)?;
                Ok(Some(info.stream_sequence))
            }
            Ok(Some(Err(err))) => Err(classify(err, || {
                EngineError::LogNotFound(stream.cached_info().config.name.clone())
            })),
            Ok(None) | Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl KvEngine for NatsEngine {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let mut streams = self.context.streams();
        let mut buckets = Vec::new();
        while let Some(info) = streams.next().await {
            let info = info.map_err(backend)?;
            if let Some(name) = info.config.name.strip_prefix(KV_STREAM_PREFIX) {
                buckets.push(BucketInfo {
                    bucket: name.to_string(),
                    history: info.config.max_messages_per_subject,
                    ttl_seconds: info.config.max_age.as_secs() as i64,
                    storage: format!("{:?}", info.config.storage).to_lowercase(),
                    bytes: info.state.bytes,
                    values: info.state.messages,
                    is_compressed: matches!(
                        info.config.compression,
                        Some(stream::Compression::S2)
                    ),
                });
            }
        }
        buckets.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(buckets)
    }

    async fn entry(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>> {
        let store = self.bucket(bucket).await?;
        let entry = store.entry(key).await.map_err(backend)?;
        Ok(entry.map(|entry| KvEntry {
            bucket: bucket.to_string(),
            key: entry.key,
            value: entry.value,
            revision: entry.revision,
            created_at: to_utc(entry.created),
            tombstoned: !matches!(entry.operation, Operation::Put),
        }))
    }

    async fn put(&self, bucket: &str, key: &str, value: Bytes) -> Result<KvEntry> {
        let store = self.bucket(bucket).await?;
        let revision = store.put(key, value.clone()).await.map_err(backend)?;

        // The server stamps the revision; read it back for the creation time
        let created_at = match store.entry(key).await {
            Ok(Some(entry)) if entry.revision == revision => to_utc(entry.created),
            _ => Utc::now(),
        };
        trace!(bucket = %bucket, key = %key, revision, "nats put");
        Ok(KvEntry {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value,
            revision,
            created_at,
            tombstoned: false,
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let store = self.bucket(bucket).await?;
        store.delete(key).await.map_err(|err| {
            classify(err, || EngineError::KeyNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        })
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        let store = self.bucket(bucket).await?;
        let mut keys = store.keys().await.map_err(backend)?;
        let mut out = Vec::new();
        while let Some(key) = keys.next().await {
            out.push(key.map_err(backend)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl LogEngine for NatsEngine {
    async fn list_logs(&self) -> Result<Vec<LogInfo>> {
        let mut streams = self.context.streams();
        let mut logs = Vec::new();
        while let Some(info) = streams.next().await {
            let info = info.map_err(backend)?;
            let name = &info.config.name;
            if !name.starts_with(KV_STREAM_PREFIX) && !name.starts_with(OBJECT_STREAM_PREFIX) {
                logs.push(log_info(&info));
            }
        }
        logs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(logs)
    }

    async fn log_info(&self, log: &str) -> Result<LogInfo> {
        let stream = self.log_stream(log).await?;
        Ok(log_info(stream.cached_info()))
    }

    async fn read(&self, log: &str, start: ReadStart) -> Result<EntryStream> {
        let stream = self.log_stream(log).await?;
        let tail = stream.cached_info().state.last_sequence;

        let first = match start {
            ReadStart::Sequence(sequence) => sequence.max(1),
            ReadStart::Time(at) => match self.sequence_at(&stream, at).await? {
                Some(sequence) => sequence,
                None => return Ok(EntryStream::empty()),
            },
        };

        let log = log.to_string();
        let entries = futures::stream::unfold(first, move |sequence| {
            let stream = stream.clone();
            let log = log.clone();
            async move {
                let mut sequence = sequence;
                while sequence <= tail {
                    match stream.get_raw_message(sequence).await {
                        Ok(message) => {
                            let entry = LogEntry {
                                log,
                                sequence: message.sequence,
                                subject: message.subject.to_string(),
                                payload: message.payload,
                                published_at: to_utc(message.time),
                            };
                            return Some((Ok(entry), sequence + 1));
                        }
                        // Purged or deleted messages leave gaps in the sequence
                        Err(err) if is_gap(&err) => {
                            sequence += 1;
                        }
                        Err(err) => {
                            let err = classify(err, || EngineError::LogNotFound(log.clone()));
                            return Some((Err(err), u64::MAX));
                        }
                    }
                }
                None
            }
        });
        Ok(EntryStream::new(entries))
    }

    async fn append(&self, subject: &str, payload: Bytes) -> Result<PublishAck> {
        let ack = self
            .context
            .publish(subject.to_string(), payload)
            .await
            .map_err(|err| publish_error(err, subject))?
            .await
            .map_err(|err| publish_error(err, subject))?;
        Ok(PublishAck {
            log: ack.stream,
            sequence: ack.sequence,
        })
    }

    async fn create_consumer(
        &self,
        log: &str,
        filter: Option<&str>,
        from: DeliverFrom,
    ) -> Result<EntryStream> {
        let stream = self.log_stream(log).await?;
        let deliver_policy = match from {
            DeliverFrom::New => DeliverPolicy::New,
            DeliverFrom::Sequence(start_sequence) => DeliverPolicy::ByStartSequence {
                start_sequence: start_sequence.max(1),
            },
        };

        let consumer = stream
            .create_consumer(OrderedConfig {
                filter_subject: filter.unwrap_or_default().to_string(),
                deliver_policy,
                ..Default::default()
            })
            .await
            .map_err(|err| classify(err, || EngineError::LogNotFound(log.to_string())))?;
        let messages = consumer
            .messages()
            .await
            .map_err(|err| classify(err, || EngineError::LogNotFound(log.to_string())))?;
        debug!(log = %log, filter = ?filter, from = ?from, "nats ordered consumer created");

        let log = log.to_string();
        let entries = messages.map(move |message| {
            let message =
                message.map_err(|err| classify(err, || EngineError::LogNotFound(log.clone())))?;
            let info = message.info().map_err(backend)?;
            Ok(LogEntry {
                log: log.clone(),
                sequence: info.stream_sequence,
                subject: message.subject.to_string(),
                payload: message.payload.clone(),
                published_at: to_utc(info.published),
            })
        });
        Ok(EntryStream::new(entries))
    }
}

impl Engine for NatsEngine {
    fn is_connected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }
}

fn log_info(info: &stream::Info) -> LogInfo {
    LogInfo {
        name: info.config.name.clone(),
        subjects: info.config.subjects.clone(),
        retention: format!("{:?}", info.config.retention).to_lowercase(),
        storage: format!("{:?}", info.config.storage).to_lowercase(),
        replicas: info.config.num_replicas as u32,
        max_consumers: i64::from(info.config.max_consumers),
        max_msgs: info.config.max_messages,
        max_bytes: info.config.max_bytes,
        messages: info.state.messages,
        bytes: info.state.bytes,
        first_sequence: info.state.first_sequence,
        last_sequence: info.state.last_sequence,
        consumers: info.state.consumer_count as u64,
        created: to_utc(info.created),
    }
}

fn publish_error(err: jetstream::context::PublishError, subject: &str) -> EngineError {
    if matches!(err.kind(), PublishErrorKind::StreamNotFound) {
        EngineError::NoLogForSubject(subject.to_string())
    } else {
        classify(err, || EngineError::NoLogForSubject(subject.to_string()))
    }
}

fn stream_error(err: GetStreamError, missing: impl FnOnce() -> EngineError) -> EngineError {
    match err.kind() {
        GetStreamErrorKind::JetStream(inner)
            if inner.error_code() == ErrorCode::STREAM_NOT_FOUND =>
        {
            missing()
        }
        GetStreamErrorKind::Request => EngineError::Disconnected(err.to_string()),
        _ => classify(err, missing),
    }
}

/// A raw read that found no message at the sequence, as opposed to a failed one.
fn is_gap(err: &async_nats::error::Error<LastRawMessageErrorKind>) -> bool {
    matches!(err.kind(), LastRawMessageErrorKind::NoMessageFound)
}

/// Sort a NATS failure that carries no usable kind into the engine vocabulary. `missing` names the resource the
/// operation addressed, for failures the server reports as not found.
fn classify(err: impl Display, missing: impl FnOnce() -> EngineError) -> EngineError {
    let text = err.to_string();
    let lowered = text.to_lowercase();
    if lowered.contains("not found") {
        missing()
    } else if lowered.contains("timed out")
        || lowered.contains("timeout")
        || lowered.contains("disconnect")
        || lowered.contains("no responders")
        || lowered.contains("connection")
    {
        EngineError::Disconnected(text)
    } else {
        EngineError::Backend(text)
    }
}

fn backend(err: impl Display) -> EngineError {
    classify(err, || EngineError::Backend("resource not found".to_string()))
}

fn to_utc(at: time::OffsetDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(at.unix_timestamp(), at.nanosecond()).unwrap_or_default()
}

fn to_offset(at: DateTime<Utc>) -> time::OffsetDateTime {
    let nanos = at.timestamp_nanos_opt().unwrap_or_default();
    time::OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
}
