pub mod engine;
pub mod errors;
pub mod model;
pub mod subject;

pub use engine::{DeliverFrom, Engine, EntryStream, KvEngine, LogEngine, ReadStart};
pub use errors::{EngineError, Result};
pub use model::{
    BucketInfo, KvEntry, LogEntry, LogInfo, PublishAck, RangeQuery, SubscribeRequest,
    DEFAULT_RANGE_LIMIT, MAX_RANGE_LIMIT,
};
