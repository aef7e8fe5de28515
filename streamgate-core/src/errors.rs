use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure conditions reported by an engine provider.
///
/// Providers classify their native errors into these variants; callers above the
/// engine boundary translate them once into their own taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("log not found: {0}")]
    LogNotFound(String),

    #[error("key not found: {bucket}/{key}")]
    KeyNotFound { bucket: String, key: String },

    #[error("no log accepts subject: {0}")]
    NoLogForSubject(String),

    #[error("engine disconnected: {0}")]
    Disconnected(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("engine backend error: {0}")]
    Backend(String),
}
