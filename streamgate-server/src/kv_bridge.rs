use bytes::Bytes;
use std::sync::Arc;
use streamgate_core::{BucketInfo, Engine, EngineError, KvEntry};
use tracing::trace;

use crate::error::{GatewayError, Result};

/// KvBridge maps key-value operations onto the engine's revisioned store.
///
/// Bucket existence is never checked up front; a missing bucket is whatever the engine
/// reports for the operation itself.
#[derive(Clone)]
pub(crate) struct KvBridge {
    engine: Arc<dyn Engine>,
}

impl KvBridge {
    pub(crate) fn new(engine: Arc<dyn Engine>) -> Self {
        KvBridge { engine }
    }

    pub(crate) async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        Ok(self.engine.list_buckets().await?)
    }

    /// Current value of `key`; absent and deleted keys are both `None`.
    pub(crate) async fn get(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>> {
        check_key(bucket, key)?;
        let entry = self.engine.entry(bucket, key).await?;
        Ok(entry.filter(|entry| !entry.tombstoned))
    }

    pub(crate) async fn put(&self, bucket: &str, key: &str, value: Bytes) -> Result<KvEntry> {
        check_key(bucket, key)?;
        let entry = self.engine.put(bucket, key, value).await?;
        trace!(bucket = %bucket, key = %key, revision = entry.revision, "key written");
        Ok(entry)
    }

    /// Tombstone `key`. A key the engine does not know reports `false` instead of failing.
    pub(crate) async fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        check_key(bucket, key)?;
        match self.engine.delete(bucket, key).await {
            Ok(()) => Ok(true),
            Err(EngineError::KeyNotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Live keys of `bucket` in lexical order.
    pub(crate) async fn list_keys(&self, bucket: &str) -> Result<Vec<String>> {
        if bucket.is_empty() {
            return Err(GatewayError::Validation("bucket must not be empty".into()));
        }
        let mut keys = self.engine.keys(bucket).await?;
        keys.sort();
        Ok(keys)
    }
}

fn check_key(bucket: &str, key: &str) -> Result<()> {
    if bucket.is_empty() {
        return Err(GatewayError::Validation("bucket must not be empty".into()));
    }
    if key.is_empty() {
        return Err(GatewayError::Validation("key must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "kv_bridge_test.rs"]
mod kv_bridge_test;
