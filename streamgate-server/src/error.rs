use serde::Serialize;
use streamgate_core::EngineError;
use thiserror::Error;

pub(crate) type Result<T> = std::result::Result<T, GatewayError>;

/// Closed set of failures the mediation layer reports to callers.
///
/// Engine failures are classified once, through `From<EngineError>`, at the point they
/// leave the engine. Every kind is terminal for the operation that raised it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub(crate) enum GatewayError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payload too large: {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("no log accepts subject {0}")]
    NoMatchingLog(String),

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),
}

impl GatewayError {
    /// Short label used for metrics and logs.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::NoMatchingLog(_) => "no_matching_log",
            GatewayError::EngineUnavailable(_) => "engine_unavailable",
        }
    }
}

impl From<EngineError> for GatewayError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::BucketNotFound(bucket) => {
                GatewayError::NotFound(format!("bucket {}", bucket))
            }
            EngineError::LogNotFound(log) => GatewayError::NotFound(format!("log {}", log)),
            EngineError::KeyNotFound { bucket, key } => {
                GatewayError::NotFound(format!("key {} in bucket {}", key, bucket))
            }
            EngineError::NoLogForSubject(subject) => GatewayError::NoMatchingLog(subject),
            EngineError::InvalidArgument(reason) => GatewayError::Validation(reason),
            EngineError::Disconnected(reason) | EngineError::Backend(reason) => {
                GatewayError::EngineUnavailable(reason)
            }
        }
    }
}

/// One entry of the `errors` list returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ErrorMessage {
    pub(crate) message: String,
}

impl ErrorMessage {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        ErrorMessage {
            message: message.into(),
        }
    }
}

impl From<&GatewayError> for ErrorMessage {
    fn from(err: &GatewayError) -> Self {
        ErrorMessage::new(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_are_classified() {
        assert_eq!(
            GatewayError::from(EngineError::LogNotFound("ORDERS".into())),
            GatewayError::NotFound("log ORDERS".into())
        );
        assert_eq!(
            GatewayError::from(EngineError::NoLogForSubject("x.y".into())).kind(),
            "no_matching_log"
        );
        assert_eq!(
            GatewayError::from(EngineError::Backend("stream info failed".into())).kind(),
            "engine_unavailable"
        );
        assert_eq!(
            GatewayError::from(EngineError::Disconnected("offline".into())).kind(),
            "engine_unavailable"
        );
    }
}
