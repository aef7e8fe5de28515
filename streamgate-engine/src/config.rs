use serde::{Deserialize, Serialize};

/// A log and the subject patterns it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub name: String,
    pub subjects: Vec<String>,
}

/// A key-value bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub name: String,
    /// Revisions retained per key
    #[serde(default = "default_history")]
    pub history: i64,
    #[serde(default)]
    pub ttl_seconds: i64,
}

fn default_history() -> i64 {
    1
}

impl LogConfig {
    pub fn new(name: impl Into<String>, subjects: &[&str]) -> Self {
        LogConfig {
            name: name.into(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl BucketConfig {
    pub fn new(name: impl Into<String>) -> Self {
        BucketConfig {
            name: name.into(),
            history: default_history(),
            ttl_seconds: 0,
        }
    }

    pub fn with_history(mut self, history: i64) -> Self {
        self.history = history;
        self
    }
}

/// Which engine provider the gateway connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineConfig {
    /// In-process engine seeded with the given resources.
    Memory {
        #[serde(default)]
        logs: Vec<LogConfig>,
        #[serde(default)]
        buckets: Vec<BucketConfig>,
    },
    /// NATS JetStream server.
    Nats { url: String },
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::Memory {
            logs: Vec::new(),
            buckets: Vec::new(),
        }
    }
}
