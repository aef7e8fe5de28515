mod config;
pub use config::{BucketConfig, EngineConfig, LogConfig};

mod memory;
pub use memory::MemoryEngine;

#[cfg(feature = "nats")]
mod nats;
#[cfg(feature = "nats")]
pub use nats::NatsEngine;

use async_trait::async_trait;
use bytes::Bytes;
use streamgate_core::{
    BucketInfo, DeliverFrom, Engine, EntryStream, KvEngine, KvEntry, LogEngine, LogInfo,
    PublishAck, ReadStart, Result,
};
use tracing::info;

#[derive(Debug, Clone)]
pub enum EngineStorage {
    Memory(MemoryEngine), // Memory is used for development mode and tests
    #[cfg(feature = "nats")]
    Nats(NatsEngine),
}

impl EngineStorage {
    /// Establish the process-wide engine connection described by `config`.
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        match config {
            EngineConfig::Memory { logs, buckets } => {
                info!(
                    logs = logs.len(),
                    buckets = buckets.len(),
                    "starting in-memory engine"
                );
                Ok(EngineStorage::Memory(MemoryEngine::with_resources(
                    logs, buckets,
                )?))
            }
            #[cfg(feature = "nats")]
            EngineConfig::Nats { url } => {
                info!(url = %url, "connecting to NATS JetStream");
                Ok(EngineStorage::Nats(NatsEngine::connect(url).await?))
            }
            #[cfg(not(feature = "nats"))]
            EngineConfig::Nats { url } => Err(streamgate_core::EngineError::InvalidArgument(
                format!("cannot connect to {}: built without the nats feature", url),
            )),
        }
    }
}

#[async_trait]
impl KvEngine for EngineStorage {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        match self {
            EngineStorage::Memory(engine) => engine.list_buckets().await,
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.list_buckets().await,
        }
    }

    async fn entry(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>> {
        match self {
            EngineStorage::Memory(engine) => engine.entry(bucket, key).await,
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.entry(bucket, key).await,
        }
    }

    async fn put(&self, bucket: &str, key: &str, value: Bytes) -> Result<KvEntry> {
        match self {
            EngineStorage::Memory(engine) => engine.put(bucket, key, value).await,
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.put(bucket, key, value).await,
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        match self {
            EngineStorage::Memory(engine) => engine.delete(bucket, key).await,
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.delete(bucket, key).await,
        }
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        match self {
            EngineStorage::Memory(engine) => engine.keys(bucket).await,
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.keys(bucket).await,
        }
    }
}

#[async_trait]
impl LogEngine for EngineStorage {
    async fn list_logs(&self) -> Result<Vec<LogInfo>> {
        match self {
            EngineStorage::Memory(engine) => engine.list_logs().await,
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.list_logs().await,
        }
    }

    async fn log_info(&self, log: &str) -> Result<LogInfo> {
        match self {
            EngineStorage::Memory(engine) => engine.log_info(log).await,
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.log_info(log).await,
        }
    }

    async fn read(&self, log: &str, start: ReadStart) -> Result<EntryStream> {
        match self {
            EngineStorage::Memory(engine) => engine.read(log, start).await,
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.read(log, start).await,
        }
    }

    async fn append(&self, subject: &str, payload: Bytes) -> Result<PublishAck> {
        match self {
            EngineStorage::Memory(engine) => engine.append(subject, payload).await,
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.append(subject, payload).await,
        }
    }

    async fn create_consumer(
        &self,
        log: &str,
        filter: Option<&str>,
        from: DeliverFrom,
    ) -> Result<EntryStream> {
        match self {
            EngineStorage::Memory(engine) => engine.create_consumer(log, filter, from).await,
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.create_consumer(log, filter, from).await,
        }
    }
}

impl Engine for EngineStorage {
    fn is_connected(&self) -> bool {
        match self {
            EngineStorage::Memory(engine) => engine.is_connected(),
            #[cfg(feature = "nats")]
            EngineStorage::Nats(engine) => engine.is_connected(),
        }
    }
}
