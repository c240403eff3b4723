//! Vegetation-health alerts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::parcel::ParcelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    VegetationDecline,
    SustainedLowNdvi,
    DroughtRisk,
}

impl AlertType {
    pub const ALL: [AlertType; 3] = [
        AlertType::VegetationDecline,
        AlertType::SustainedLowNdvi,
        AlertType::DroughtRisk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VegetationDecline => "vegetation_decline",
            Self::SustainedLowNdvi => "sustained_low_ndvi",
            Self::DroughtRisk => "drought_risk",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

/// A raised vegetation-health signal for one parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub parcel_id: ParcelId,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub triggered_at: DateTime<Utc>,
    /// Value that tripped the rule (latest mean, latest weekly average...)
    pub reference_value: f64,
    /// What the reference was compared against (rolling mean, floor...)
    pub baseline_value: f64,
    pub message: String,
    pub status: AlertStatus,
    /// Whether the latest value was also a z-score outlier.
    pub anomaly: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// The payload of a rule that fired.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub reference_value: f64,
    pub baseline_value: f64,
    pub anomaly: bool,
    pub message: String,
}

impl Alert {
    /// Opens a new alert from a fired rule.
    pub fn open(parcel_id: ParcelId, trigger: Trigger, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parcel_id,
            alert_type: trigger.alert_type,
            severity: trigger.severity,
            triggered_at: now,
            reference_value: trigger.reference_value,
            baseline_value: trigger.baseline_value,
            message: trigger.message,
            status: AlertStatus::Open,
            anomaly: trigger.anomaly,
            created_at: now,
            resolved_at: None,
        }
    }

    /// Open or acknowledged: the condition is still considered live.
    pub fn is_active(&self) -> bool {
        matches!(self.status, AlertStatus::Open | AlertStatus::Acknowledged)
    }

    /// Folds a repeated trigger into this alert instead of opening another.
    pub fn refresh(&mut self, trigger: Trigger, now: DateTime<Utc>) -> Result<()> {
        if !self.is_active() {
            return Err(Error::invalid_transition(format!(
                "alert {} is resolved",
                self.id
            )));
        }
        self.severity = trigger.severity;
        self.reference_value = trigger.reference_value;
        self.baseline_value = trigger.baseline_value;
        self.anomaly = trigger.anomaly;
        self.message = trigger.message;
        self.triggered_at = now;
        Ok(())
    }

    /// `open -> acknowledged`.
    pub fn acknowledge(&mut self) -> Result<()> {
        match self.status {
            AlertStatus::Open => {
                self.status = AlertStatus::Acknowledged;
                Ok(())
            }
            other => Err(Error::invalid_transition(format!(
                "cannot acknowledge alert {} in status {:?}",
                self.id, other
            ))),
        }
    }

    /// `open|acknowledged -> resolved`. Resolved is terminal.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_active() {
            return Err(Error::invalid_transition(format!(
                "alert {} is already resolved",
                self.id
            )));
        }
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
        Ok(())
    }
}
