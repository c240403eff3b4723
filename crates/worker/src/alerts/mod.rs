//! Alert engine: evaluates rules for a parcel and keeps alert state in sync.
//!
//! Every evaluation looks at all alert types. A triggered rule opens an alert
//! or refreshes the active one of that type; a rule that is clear resolves
//! the active one; an inconclusive rule leaves it alone. Opened and resolved
//! alerts are published through the [`AlertSink`], and so is a refresh that
//! changes severity. A refresh at the same severity is only stored.

pub mod rules;

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use monitor_core::{
    latest_per_date, Alert, AlertType, ParcelId, PeriodType, RawObservation, Result,
    TimeSeriesPoint,
};
use redpanda::AlertSink;
use state_store::{AlertStore, ObservationStore, SeriesStore, Store};
use telemetry::metrics;
use tracing::{debug, error, info};
use uuid::Uuid;

pub use rules::{AlertRules, RuleResult};

/// Alert changes made by one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub opened: usize,
    pub updated: usize,
    pub resolved: usize,
}

impl EvaluationSummary {
    fn absorb(&mut self, other: EvaluationSummary) {
        self.opened += other.opened;
        self.updated += other.updated;
        self.resolved += other.resolved;
    }
}

/// Inputs the rules read, gathered as of one date.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleInputs {
    pub as_of: NaiveDate,
    pub latest: f64,
    /// Daily means in the window before `as_of`
    pub baseline: Vec<f64>,
    /// Last daily means up to and including `as_of`
    pub recent: Vec<f64>,
    /// Last weekly averages starting on or before `as_of`
    pub weekly: Vec<f64>,
}

impl RuleInputs {
    pub fn evaluate(&self, rules: &AlertRules) -> [(AlertType, RuleResult); 3] {
        let latest_anomaly = rules::is_anomaly(rules, self.latest, &self.baseline);
        let decline = rules::vegetation_decline(rules, self.latest, &self.baseline);
        [
            (AlertType::VegetationDecline, decline),
            (AlertType::SustainedLowNdvi, rules::sustained_low(rules, &self.recent)),
            (
                AlertType::DroughtRisk,
                rules::drought_risk(rules, &self.weekly, latest_anomaly),
            ),
        ]
    }
}

pub struct AlertEngine {
    store: Arc<dyn Store>,
    sink: Arc<dyn AlertSink>,
    rules: AlertRules,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn AlertSink>, rules: AlertRules) -> Self {
        Self { store, sink, rules }
    }

    pub fn rules(&self) -> &AlertRules {
        &self.rules
    }

    /// Evaluates the parcel as of the observation's date.
    pub async fn evaluate_observation(
        &self,
        observation: &RawObservation,
        now: DateTime<Utc>,
    ) -> Result<EvaluationSummary> {
        if observation.index_type != self.rules.rule_index {
            return Ok(EvaluationSummary::default());
        }
        self.evaluate_parcel(observation.parcel_id, observation.acquisition_date, now)
            .await
    }

    /// Evaluates the parcel as of its latest observation in or before the
    /// point's period.
    pub async fn evaluate_series_point(
        &self,
        point: &TimeSeriesPoint,
        now: DateTime<Utc>,
    ) -> Result<EvaluationSummary> {
        if point.index_type != self.rules.rule_index || point.period_type != PeriodType::Week {
            return Ok(EvaluationSummary::default());
        }
        let latest = self
            .store
            .recent_daily(point.parcel_id, point.index_type, point.period_end, 1)
            .await?;
        match latest.first() {
            Some(obs) => {
                self.evaluate_parcel(point.parcel_id, obs.acquisition_date, now)
                    .await
            }
            None => Ok(EvaluationSummary::default()),
        }
    }

    /// Gathers rule inputs from the store. `None` without an observation on
    /// `as_of`.
    pub async fn inputs(&self, parcel_id: ParcelId, as_of: NaiveDate) -> Result<Option<RuleInputs>> {
        let index = self.rules.rule_index;
        let recent = self
            .store
            .recent_daily(parcel_id, index, as_of, self.rules.sustained_low_count.max(1))
            .await?;
        let Some(latest) = recent.last().filter(|o| o.acquisition_date == as_of) else {
            return Ok(None);
        };
        let latest = latest.mean;

        let window_start = as_of - Duration::days(i64::from(self.rules.window_days));
        let baseline = match as_of.pred_opt() {
            Some(day_before) if window_start <= day_before => {
                let window = self
                    .store
                    .observations_between(parcel_id, index, window_start, day_before)
                    .await?;
                latest_per_date(&window).iter().map(|o| o.mean).collect()
            }
            _ => Vec::new(),
        };

        let weekly = self
            .store
            .recent_points(parcel_id, index, PeriodType::Week, as_of, self.rules.drought_weeks)
            .await?
            .iter()
            .map(|p| p.avg_value)
            .collect();

        Ok(Some(RuleInputs {
            as_of,
            latest,
            baseline,
            recent: recent.iter().map(|o| o.mean).collect(),
            weekly,
        }))
    }

    /// Runs every rule for the parcel as of `as_of` and reconciles alerts.
    pub async fn evaluate_parcel(
        &self,
        parcel_id: ParcelId,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<EvaluationSummary> {
        let Some(inputs) = self.inputs(parcel_id, as_of).await? else {
            debug!(parcel_id = %parcel_id, as_of = %as_of, "No observation to evaluate");
            return Ok(EvaluationSummary::default());
        };

        let mut summary = EvaluationSummary::default();
        for (alert_type, result) in inputs.evaluate(&self.rules) {
            summary.absorb(self.apply(parcel_id, alert_type, result, now).await?);
        }
        Ok(summary)
    }

    async fn apply(
        &self,
        parcel_id: ParcelId,
        alert_type: AlertType,
        result: RuleResult,
        now: DateTime<Utc>,
    ) -> Result<EvaluationSummary> {
        let mut summary = EvaluationSummary::default();
        let active = self.store.active_alert(parcel_id, alert_type).await?;

        match (result, active) {
            (RuleResult::Triggered(trigger), Some(mut alert)) => {
                let previous = alert.severity;
                alert.refresh(trigger, now)?;
                self.store.save_alert(&alert).await?;
                metrics().alerts_updated.inc();
                summary.updated += 1;
                if alert.severity != previous {
                    info!(
                        alert_id = %alert.id,
                        parcel_id = %parcel_id,
                        alert_type = %alert_type,
                        from = ?previous,
                        to = ?alert.severity,
                        "Alert severity changed"
                    );
                    self.publish(&alert).await;
                } else {
                    debug!(alert_id = %alert.id, parcel_id = %parcel_id, alert_type = %alert_type, "Alert refreshed");
                }
            }
            (RuleResult::Triggered(trigger), None) => {
                let alert = Alert::open(parcel_id, trigger, now);
                self.store.save_alert(&alert).await?;
                metrics().alerts_opened.inc();
                summary.opened += 1;
                info!(
                    alert_id = %alert.id,
                    parcel_id = %parcel_id,
                    alert_type = %alert_type,
                    severity = ?alert.severity,
                    anomaly = alert.anomaly,
                    "Alert opened"
                );
                self.publish(&alert).await;
            }
            (RuleResult::Clear, Some(mut alert)) => {
                alert.resolve(now)?;
                self.store.save_alert(&alert).await?;
                metrics().alerts_resolved.inc();
                summary.resolved += 1;
                info!(alert_id = %alert.id, parcel_id = %parcel_id, alert_type = %alert_type, "Alert resolved");
                self.publish(&alert).await;
            }
            (RuleResult::Clear, None) | (RuleResult::Inconclusive, _) => {}
        }

        Ok(summary)
    }

    /// External `open -> acknowledged`.
    pub async fn acknowledge(&self, alert_id: Uuid) -> Result<Alert> {
        let alert = self.store.acknowledge_alert(alert_id).await?;
        self.publish(&alert).await;
        Ok(alert)
    }

    async fn publish(&self, alert: &Alert) {
        if let Err(e) = self.sink.publish(alert).await {
            metrics().alert_publish_errors.inc();
            error!(
                alert_id = %alert.id,
                sink = self.sink.name(),
                error = %e,
                "Failed to publish alert"
            );
        }
    }
}
