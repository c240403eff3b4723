//! Redpanda configuration.

use serde::{Deserialize, Serialize};

/// Alert topic producer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Publish to Redpanda; when false alerts are only logged
    #[serde(default)]
    pub enabled: bool,
    /// Broker addresses
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    /// Topic receiving alert records
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Compression type (none, gzip, snappy, lz4, zstd)
    #[serde(default = "default_compression")]
    pub compression: String,
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_topic() -> String {
    "vegetation_alerts".to_string()
}

fn default_compression() -> String {
    "lz4".to_string()
}

impl Default for RedpandaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: default_brokers(),
            topic: default_topic(),
            compression: default_compression(),
        }
    }
}

impl RedpandaConfig {
    /// Returns the broker list as a comma-separated string.
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }
}
