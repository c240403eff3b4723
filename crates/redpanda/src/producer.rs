//! Alert publisher writing JSON records to a Redpanda topic via rskafka.

use crate::config::RedpandaConfig;
use crate::sink::{record_key, AlertSink};
use async_trait::async_trait;
use chrono::Utc;
use monitor_core::{Alert, Error, Result};
use rskafka::client::{
    partition::{Compression, PartitionClient, UnknownTopicHandling},
    ClientBuilder,
};
use rskafka::record::Record;
use std::collections::BTreeMap;
use std::sync::Arc;
use telemetry::health;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Publishes alerts to `config.topic`, partition 0.
///
/// The broker connection is opened on first publish and dropped after a
/// failed produce so the next publish reconnects.
pub struct RedpandaSink {
    config: RedpandaConfig,
    client: RwLock<Option<Arc<PartitionClient>>>,
}

impl RedpandaSink {
    pub fn new(config: RedpandaConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &RedpandaConfig {
        &self.config
    }

    /// Gets the cached partition client or connects a new one.
    async fn get_client(&self) -> Result<Arc<PartitionClient>> {
        {
            let client = self.client.read().await;
            if let Some(client) = client.as_ref() {
                return Ok(client.clone());
            }
        }

        let mut slot = self.client.write().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = ClientBuilder::new(vec![self.config.broker_string()])
            .build()
            .await
            .map_err(|e| Error::internal(format!("Failed to connect: {}", e)))?;

        let partition_client = client
            .partition_client(self.config.topic.clone(), 0, UnknownTopicHandling::Retry)
            .await
            .map_err(|e| Error::internal(format!("Failed to get partition client: {}", e)))?;

        let partition_client = Arc::new(partition_client);
        *slot = Some(partition_client.clone());
        Ok(partition_client)
    }

    fn compression(&self) -> Compression {
        match self.config.compression.as_str() {
            "gzip" => Compression::Gzip,
            "snappy" => Compression::Snappy,
            "lz4" => Compression::Lz4,
            "zstd" => Compression::Zstd,
            _ => Compression::NoCompression,
        }
    }
}

/// Builds the topic record for an alert.
pub fn alert_record(alert: &Alert) -> Result<Record> {
    let payload = serde_json::to_vec(alert)?;
    Ok(Record {
        key: Some(record_key(alert).into_bytes()),
        value: Some(payload),
        headers: BTreeMap::from([(
            "status".to_string(),
            serde_json::to_vec(&alert.status)?,
        )]),
        timestamp: Utc::now(),
    })
}

#[async_trait]
impl AlertSink for RedpandaSink {
    async fn publish(&self, alert: &Alert) -> Result<()> {
        let record = alert_record(alert)?;
        let client = match self.get_client().await {
            Ok(client) => client,
            Err(e) => {
                health().alert_bus.set_unhealthy(e.to_string());
                return Err(e);
            }
        };

        match client.produce(vec![record], self.compression()).await {
            Ok(offsets) => {
                health().alert_bus.set_healthy();
                debug!(
                    topic = %self.config.topic,
                    alert_id = %alert.id,
                    offset = ?offsets.first(),
                    "Published alert"
                );
                Ok(())
            }
            Err(e) => {
                error!(topic = %self.config.topic, alert_id = %alert.id, "Failed to publish alert: {}", e);
                health().alert_bus.set_unhealthy(e.to_string());
                *self.client.write().await = None;
                Err(Error::internal(format!("Failed to produce: {}", e)))
            }
        }
    }

    fn name(&self) -> &str {
        "redpanda"
    }
}
