//! Alert sink trait and the logging implementation.

use async_trait::async_trait;
use monitor_core::{Alert, AlertStatus, Result};
use tracing::{info, warn};

/// Where alert state changes are announced.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish(&self, alert: &Alert) -> Result<()>;

    fn name(&self) -> &str;
}

/// Writes alerts to the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn publish(&self, alert: &Alert) -> Result<()> {
        match alert.status {
            AlertStatus::Resolved => info!(
                alert_id = %alert.id,
                parcel_id = %alert.parcel_id,
                alert_type = %alert.alert_type,
                "Alert resolved"
            ),
            _ => warn!(
                alert_id = %alert.id,
                parcel_id = %alert.parcel_id,
                alert_type = %alert.alert_type,
                severity = ?alert.severity,
                reference = alert.reference_value,
                baseline = alert.baseline_value,
                anomaly = alert.anomaly,
                message = %alert.message,
                "Vegetation alert"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Record key: alerts of one (parcel, type) land on the same partition.
pub fn record_key(alert: &Alert) -> String {
    format!("{}:{}", alert.parcel_id, alert.alert_type)
}
