//! Redpanda health checks.

use crate::config::RedpandaConfig;
use rskafka::client::ClientBuilder;
use tracing::{debug, error};

/// Check Redpanda connection health and whether the alert topic exists.
pub async fn check_connection(config: &RedpandaConfig) -> bool {
    let connection = config.broker_string();

    match ClientBuilder::new(vec![connection]).build().await {
        Ok(client) => match client.list_topics().await {
            Ok(topics) => {
                let has_topic = topics.iter().any(|t| t.name == config.topic);
                debug!(
                    topics = topics.len(),
                    alert_topic = has_topic,
                    "Redpanda connection healthy"
                );
                if !has_topic {
                    error!(topic = %config.topic, "Alert topic does not exist yet");
                }
                true
            }
            Err(e) => {
                error!("Failed to list Redpanda topics: {}", e);
                false
            }
        },
        Err(e) => {
            error!("Failed to connect to Redpanda: {}", e);
            false
        }
    }
}
