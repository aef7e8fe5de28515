use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use streamgate_core::{BucketInfo, KvEntry, LogEntry, LogInfo, PublishAck, RangeQuery};

use crate::error::{ErrorMessage, GatewayError};
use crate::mediation_service::{Operation, OperationOutput};

/// Body of `POST /query`.
#[derive(Debug, Deserialize)]
pub(crate) struct QueryRequest {
    pub(crate) operation: String,
    #[serde(default)]
    pub(crate) arguments: Value,
}

#[derive(Deserialize)]
struct BucketArgs {
    bucket: String,
}

#[derive(Deserialize)]
struct KeyArgs {
    bucket: String,
    key: String,
}

#[derive(Deserialize)]
struct PutKeyArgs {
    bucket: String,
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct PublishArgs {
    subject: String,
    #[serde(alias = "payload")]
    data: String,
}

impl TryFrom<QueryRequest> for Operation {
    type Error = String;

    fn try_from(request: QueryRequest) -> Result<Self, Self::Error> {
        let QueryRequest {
            operation,
            arguments,
        } = request;
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let decoded = match operation.as_str() {
            "listBuckets" => Operation::ListBuckets,
            "listKeys" => {
                let args: BucketArgs = decode(&operation, arguments)?;
                Operation::ListKeys {
                    bucket: args.bucket,
                }
            }
            "getKey" => {
                let args: KeyArgs = decode(&operation, arguments)?;
                Operation::GetKey {
                    bucket: args.bucket,
                    key: args.key,
                }
            }
            "putKey" => {
                let args: PutKeyArgs = decode(&operation, arguments)?;
                Operation::PutKey {
                    bucket: args.bucket,
                    key: args.key,
                    value: Bytes::from(args.value),
                }
            }
            "deleteKey" => {
                let args: KeyArgs = decode(&operation, arguments)?;
                Operation::DeleteKey {
                    bucket: args.bucket,
                    key: args.key,
                }
            }
            "listLogs" => Operation::ListLogs,
            "readRange" => Operation::ReadRange(decode::<RangeQuery>(&operation, arguments)?),
            "publish" => {
                let args: PublishArgs = decode(&operation, arguments)?;
                Operation::Publish {
                    subject: args.subject,
                    payload: Bytes::from(args.data),
                }
            }
            other => return Err(format!("unknown operation: {}", other)),
        };
        Ok(decoded)
    }
}

fn decode<T: DeserializeOwned>(operation: &str, arguments: Value) -> Result<T, String> {
    serde_json::from_value(arguments)
        .map_err(|err| format!("invalid arguments for {}: {}", operation, err))
}

/// Response envelope shared by every endpoint that reports errors.
#[derive(Debug, Serialize)]
pub(crate) struct QueryResponse {
    data: Option<BTreeMap<&'static str, OutputDto>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ErrorMessage>,
}

impl QueryResponse {
    pub(crate) fn data(operation: &'static str, output: OperationOutput) -> Self {
        QueryResponse {
            data: Some(BTreeMap::from([(operation, OutputDto::from(output))])),
            errors: Vec::new(),
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        QueryResponse {
            data: None,
            errors: vec![ErrorMessage::new(message)],
        }
    }
}

impl From<&GatewayError> for QueryResponse {
    fn from(err: &GatewayError) -> Self {
        QueryResponse {
            data: None,
            errors: vec![ErrorMessage::from(err)],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OutputDto {
    Buckets(Vec<BucketInfo>),
    Keys(Vec<String>),
    Entry(Option<KvEntryDto>),
    Deleted(bool),
    Logs(Vec<LogInfo>),
    Entries(Vec<LogEntryDto>),
    Published(PublishAckDto),
}

impl From<OperationOutput> for OutputDto {
    fn from(output: OperationOutput) -> Self {
        match output {
            OperationOutput::Buckets(buckets) => OutputDto::Buckets(buckets),
            OperationOutput::Keys(keys) => OutputDto::Keys(keys),
            OperationOutput::Entry(entry) => OutputDto::Entry(entry.map(KvEntryDto::from)),
            OperationOutput::Written(entry) => OutputDto::Entry(Some(KvEntryDto::from(entry))),
            OperationOutput::Deleted(deleted) => OutputDto::Deleted(deleted),
            OperationOutput::Logs(logs) => OutputDto::Logs(logs),
            OperationOutput::Entries(entries) => {
                OutputDto::Entries(entries.into_iter().map(LogEntryDto::from).collect())
            }
            OperationOutput::Published(ack) => OutputDto::Published(PublishAckDto::from(ack)),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KvEntryDto {
    bucket: String,
    key: String,
    value: String,
    revision: u64,
    created_at: DateTime<Utc>,
}

impl From<KvEntry> for KvEntryDto {
    fn from(entry: KvEntry) -> Self {
        KvEntryDto {
            bucket: entry.bucket,
            key: entry.key,
            value: String::from_utf8_lossy(&entry.value).into_owned(),
            revision: entry.revision,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LogEntryDto {
    log: String,
    sequence: u64,
    subject: String,
    data: String,
    published_at: DateTime<Utc>,
}

impl From<LogEntry> for LogEntryDto {
    fn from(entry: LogEntry) -> Self {
        LogEntryDto {
            data: String::from_utf8_lossy(&entry.payload).into_owned(),
            log: entry.log,
            sequence: entry.sequence,
            subject: entry.subject,
            published_at: entry.published_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PublishAckDto {
    log_name: String,
    sequence: u64,
}

impl From<PublishAck> for PublishAckDto {
    fn from(ack: PublishAck) -> Self {
        PublishAckDto {
            log_name: ack.log,
            sequence: ack.sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_request(body: Value) -> Result<Operation, String> {
        Operation::try_from(serde_json::from_value::<QueryRequest>(body).unwrap())
    }

    #[test]
    fn operations_decode_from_arguments() {
        assert_eq!(
            decode_request(json!({"operation": "listBuckets"})).unwrap(),
            Operation::ListBuckets
        );
        assert_eq!(
            decode_request(json!({
                "operation": "putKey",
                "arguments": {"bucket": "B", "key": "k", "value": "v"}
            }))
            .unwrap(),
            Operation::PutKey {
                bucket: "B".into(),
                key: "k".into(),
                value: Bytes::from("v")
            }
        );
        assert_eq!(
            decode_request(json!({
                "operation": "readRange",
                "arguments": {"logName": "L", "limit": 3}
            }))
            .unwrap(),
            Operation::ReadRange(RangeQuery::new("L").with_limit(3))
        );
    }

    #[test]
    fn bad_requests_are_described() {
        let err = decode_request(json!({"operation": "dropEverything"})).unwrap_err();
        assert_eq!(err, "unknown operation: dropEverything");

        let err = decode_request(json!({"operation": "getKey", "arguments": {"bucket": "B"}}))
            .unwrap_err();
        assert!(err.starts_with("invalid arguments for getKey"));
    }

    #[test]
    fn envelope_shapes() {
        let ok = serde_json::to_value(QueryResponse::data(
            "deleteKey",
            OperationOutput::Deleted(false),
        ))
        .unwrap();
        assert_eq!(ok, json!({"data": {"deleteKey": false}}));

        let missing = serde_json::to_value(QueryResponse::data(
            "getKey",
            OperationOutput::Entry(None),
        ))
        .unwrap();
        assert_eq!(missing, json!({"data": {"getKey": null}}));

        let failed = serde_json::to_value(QueryResponse::from(&GatewayError::NotFound(
            "log L".into(),
        )))
        .unwrap();
        assert_eq!(
            failed,
            json!({"data": null, "errors": [{"message": "not found: log L"}]})
        );
    }
}
