use bytes::Bytes;
use metrics::counter;
use std::sync::Arc;
use streamgate_core::{
    BucketInfo, Engine, KvEntry, LogEntry, LogInfo, PublishAck, RangeQuery, SubscribeRequest,
};
use tracing::{debug, Level};

use crate::error::{GatewayError, Result};
use crate::gateway_metrics::GATEWAY_REQUESTS_TOTAL;
use crate::kv_bridge::KvBridge;
use crate::publish_gate::PublishGate;
use crate::range_query::RangeQueryEngine;
use crate::subscription::{
    Subscription, SubscriptionBridge, SubscriptionSettings, SubscriptionState,
};

/// A decoded request/response operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operation {
    ListBuckets,
    ListKeys { bucket: String },
    GetKey { bucket: String, key: String },
    PutKey { bucket: String, key: String, value: Bytes },
    DeleteKey { bucket: String, key: String },
    ListLogs,
    ReadRange(RangeQuery),
    Publish { subject: String, payload: Bytes },
}

impl Operation {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Operation::ListBuckets => "listBuckets",
            Operation::ListKeys { .. } => "listKeys",
            Operation::GetKey { .. } => "getKey",
            Operation::PutKey { .. } => "putKey",
            Operation::DeleteKey { .. } => "deleteKey",
            Operation::ListLogs => "listLogs",
            Operation::ReadRange(_) => "readRange",
            Operation::Publish { .. } => "publish",
        }
    }
}

/// Typed result of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OperationOutput {
    Buckets(Vec<BucketInfo>),
    Keys(Vec<String>),
    Entry(Option<KvEntry>),
    Written(KvEntry),
    Deleted(bool),
    Logs(Vec<LogInfo>),
    Entries(Vec<LogEntry>),
    Published(PublishAck),
}

/// MediationService is the single entry point for every external request. It only
/// dispatches; the behaviour lives in the components it composes.
#[derive(Clone)]
pub(crate) struct MediationService {
    engine: Arc<dyn Engine>,
    kv: KvBridge,
    ranges: RangeQueryEngine,
    publisher: PublishGate,
    subscriptions: SubscriptionBridge,
}

impl MediationService {
    pub(crate) fn new(engine: Arc<dyn Engine>, settings: SubscriptionSettings) -> Self {
        MediationService {
            kv: KvBridge::new(Arc::clone(&engine)),
            ranges: RangeQueryEngine::new(Arc::clone(&engine)),
            publisher: PublishGate::new(Arc::clone(&engine)),
            subscriptions: SubscriptionBridge::new(Arc::clone(&engine), settings),
            engine,
        }
    }

    #[tracing::instrument(level = Level::INFO, skip_all, fields(operation = operation.name()))]
    pub(crate) async fn execute(&self, operation: Operation) -> Result<OperationOutput> {
        let name = operation.name();
        let result = self.dispatch(operation).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        counter!(GATEWAY_REQUESTS_TOTAL.name, "operation" => name, "result" => outcome)
            .increment(1);
        if let Err(err) = &result {
            debug!(operation = name, error = %err, "operation failed");
        }
        result
    }

    async fn dispatch(&self, operation: Operation) -> Result<OperationOutput> {
        let output = match operation {
            Operation::ListBuckets => OperationOutput::Buckets(self.kv.list_buckets().await?),
            Operation::ListKeys { bucket } => {
                OperationOutput::Keys(self.kv.list_keys(&bucket).await?)
            }
            Operation::GetKey { bucket, key } => {
                OperationOutput::Entry(self.kv.get(&bucket, &key).await?)
            }
            Operation::PutKey { bucket, key, value } => {
                OperationOutput::Written(self.kv.put(&bucket, &key, value).await?)
            }
            Operation::DeleteKey { bucket, key } => {
                OperationOutput::Deleted(self.kv.delete(&bucket, &key).await?)
            }
            Operation::ListLogs => OperationOutput::Logs(self.list_logs().await?),
            Operation::ReadRange(query) => {
                OperationOutput::Entries(self.ranges.read_range(&query).await?)
            }
            Operation::Publish { subject, payload } => {
                OperationOutput::Published(self.publisher.publish(&subject, payload).await?)
            }
        };
        Ok(output)
    }

    async fn list_logs(&self) -> Result<Vec<LogInfo>> {
        self.engine.list_logs().await.map_err(GatewayError::from)
    }

    /// Open a live subscription. Returns once the subscription is streaming or has
    /// failed, so anything appended afterwards is seen by it.
    pub(crate) async fn subscribe(&self, request: SubscribeRequest) -> Subscription {
        let subscription = self.subscriptions.subscribe(request);
        let outcome = match subscription.ready().await {
            SubscriptionState::Streaming => "ok",
            _ => "error",
        };
        counter!(GATEWAY_REQUESTS_TOTAL.name, "operation" => "subscribe", "result" => outcome)
            .increment(1);
        subscription
    }

    /// Readiness follows the engine connection.
    pub(crate) fn is_ready(&self) -> bool {
        self.engine.is_connected()
    }
}

#[cfg(test)]
#[path = "mediation_service_test.rs"]
mod mediation_service_test;
