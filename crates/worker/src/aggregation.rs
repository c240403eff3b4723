//! Weekly and monthly rollups of daily observations.
//!
//! A point is a pure function of the stored observations: the latest
//! observation per date inside the period, averaged without weights. Running
//! the engine twice over unchanged observations writes identical points.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use monitor_core::{
    latest_per_date, IndexType, ParcelId, Period, PeriodType, RawObservation, Result,
    TimeSeriesPoint,
};
use state_store::{ObservationStore, ParcelRegistry, SeriesStore, Store};
use telemetry::metrics;
use tracing::{debug, error, info};

use crate::alerts::AlertEngine;
use crate::config::AggregationConfig;

/// Counters for one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationSummary {
    pub parcels: usize,
    pub points_written: usize,
    pub points_unchanged: usize,
    pub failed_parcels: usize,
}

/// Unweighted mean of daily means inside `period`, summed in date order.
pub fn period_average(daily: &[RawObservation], period: Period) -> Option<(f64, u32)> {
    let (sum, count) = daily
        .iter()
        .filter(|o| period.contains(o.acquisition_date))
        .fold((0.0, 0u32), |(sum, count), o| (sum + o.mean, count + 1));
    (count > 0).then(|| (sum / f64::from(count), count))
}

/// Percent change against the previous period's average.
pub fn percent_change(current: f64, previous: f64) -> Option<f64> {
    (previous != 0.0).then(|| (current - previous) / previous.abs() * 100.0)
}

/// `avg` outside `z` standard deviations of the window's daily means.
pub fn is_anomalous(avg: f64, window: &[f64], config: &AggregationConfig) -> bool {
    if window.len() < config.anomaly_min_samples || window.is_empty() {
        return false;
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let std = (window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    std > 1e-9 && (avg - mean).abs() > config.anomaly_z_threshold * std
}

pub struct AggregationEngine {
    store: Arc<dyn Store>,
    alerts: Arc<AlertEngine>,
    config: AggregationConfig,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn Store>, alerts: Arc<AlertEngine>, config: AggregationConfig) -> Self {
        Self {
            store,
            alerts,
            config,
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Recomputes every unsettled period of every active parcel, plus any
    /// older history that has observations but no point yet (a fresh backfill).
    /// A parcel that fails is logged and skipped.
    pub async fn run(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<AggregationSummary> {
        let settled_before = today - Duration::days(i64::from(self.config.settle_days));
        let parcels = self.store.active_parcels().await?;
        let mut summary = AggregationSummary::default();

        for parcel in &parcels {
            summary.parcels += 1;
            for index_type in &parcel.index_types {
                let refreshed = match self
                    .first_unaggregated(parcel.id, *index_type, settled_before)
                    .await
                {
                    Ok(Some(first)) => {
                        debug!(
                            parcel_id = %parcel.id,
                            index_type = %index_type,
                            from = %first,
                            "Aggregating unsettled history"
                        );
                        self.refresh_range(parcel.id, *index_type, first, today, now)
                            .await
                    }
                    Ok(None) => {
                        self.refresh_range(parcel.id, *index_type, settled_before, today, now)
                            .await
                    }
                    Err(e) => Err(e),
                };
                match refreshed {
                    Ok((written, unchanged)) => {
                        summary.points_written += written.len();
                        summary.points_unchanged += unchanged;
                    }
                    Err(e) => {
                        summary.failed_parcels += 1;
                        error!(
                            parcel_id = %parcel.id,
                            index_type = %index_type,
                            error = %e,
                            "Aggregation failed"
                        );
                        break;
                    }
                }
            }
        }

        info!(
            parcels = summary.parcels,
            written = summary.points_written,
            unchanged = summary.points_unchanged,
            failed = summary.failed_parcels,
            "Aggregation pass complete"
        );
        Ok(summary)
    }

    /// Earliest observed date before `before` whose week or month has no
    /// point yet.
    async fn first_unaggregated(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        before: NaiveDate,
    ) -> Result<Option<NaiveDate>> {
        let Some(last) = before.pred_opt() else {
            return Ok(None);
        };
        let observed = latest_per_date(
            &self
                .store
                .observations_between(parcel_id, index_type, NaiveDate::MIN, last)
                .await?,
        );
        let Some(first) = observed.first().map(|o| o.acquisition_date) else {
            return Ok(None);
        };

        let mut covered = BTreeSet::new();
        for period_type in PeriodType::ALL {
            let from = period_type.period_containing(first).start;
            for point in self
                .store
                .points_between(parcel_id, index_type, period_type, from, last)
                .await?
            {
                covered.insert((period_type, point.period_start));
            }
        }

        Ok(observed.iter().map(|o| o.acquisition_date).find(|date| {
            PeriodType::ALL.iter().any(|period_type| {
                !covered.contains(&(*period_type, period_type.period_containing(*date).start))
            })
        }))
    }

    /// Recomputes every week and month overlapping `[start, end]` and returns
    /// the points that were created or changed.
    pub async fn rebuild(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        start: NaiveDate,
        end: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let (written, _) = self
            .refresh_range(parcel_id, index_type, start, end, now)
            .await?;
        info!(
            parcel_id = %parcel_id,
            index_type = %index_type,
            start = %start,
            end = %end,
            written = written.len(),
            "Series rebuilt"
        );
        Ok(written)
    }

    async fn refresh_range(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        from: NaiveDate,
        to: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(Vec<TimeSeriesPoint>, usize)> {
        let mut written = Vec::new();
        let mut unchanged = 0;

        for period_type in PeriodType::ALL {
            for period in period_type.periods_between(from, to) {
                let Some(point) = self
                    .compute_point(parcel_id, index_type, period_type, period)
                    .await?
                else {
                    continue;
                };
                if self.store.upsert_point(&point).await?.is_change() {
                    metrics().series_points_written.inc();
                    written.push(point);
                } else {
                    unchanged += 1;
                }
            }
        }

        // Alerts only care about the newest weekly state.
        let newest_week = written
            .iter()
            .filter(|p| p.period_type == PeriodType::Week)
            .max_by_key(|p| p.period_start);
        if let Some(point) = newest_week {
            if let Err(e) = self.alerts.evaluate_series_point(point, now).await {
                error!(
                    parcel_id = %parcel_id,
                    period_start = %point.period_start,
                    error = %e,
                    "Alert evaluation failed for series point"
                );
            }
        }

        Ok((written, unchanged))
    }

    /// Builds the point for one period. `None` when the period has no
    /// observations.
    pub async fn compute_point(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        period_type: PeriodType,
        period: Period,
    ) -> Result<Option<TimeSeriesPoint>> {
        let Some((avg_value, sample_count)) =
            self.average(parcel_id, index_type, period).await?
        else {
            return Ok(None);
        };

        let change_from_previous = match period.start.pred_opt() {
            Some(before) => {
                let last = self
                    .store
                    .recent_daily(parcel_id, index_type, before, 1)
                    .await?;
                match last.first() {
                    Some(obs) => {
                        let previous = period_type.period_containing(obs.acquisition_date);
                        self.average(parcel_id, index_type, previous)
                            .await?
                            .and_then(|(prev, _)| percent_change(avg_value, prev))
                    }
                    None => None,
                }
            }
            None => None,
        };

        let window_start = period.start - Duration::days(i64::from(self.config.anomaly_window_days));
        let is_anomaly = match period.start.pred_opt() {
            Some(before) if window_start <= before => {
                let window = self
                    .store
                    .observations_between(parcel_id, index_type, window_start, before)
                    .await?;
                let means: Vec<f64> = latest_per_date(&window).iter().map(|o| o.mean).collect();
                is_anomalous(avg_value, &means, &self.config)
            }
            _ => false,
        };

        debug!(
            parcel_id = %parcel_id,
            index_type = %index_type,
            period_type = period_type.as_str(),
            period_start = %period.start,
            avg = avg_value,
            samples = sample_count,
            "Computed series point"
        );

        Ok(Some(TimeSeriesPoint {
            parcel_id,
            index_type,
            period_type,
            period_start: period.start,
            period_end: period.end,
            avg_value,
            sample_count,
            change_from_previous,
            is_anomaly,
        }))
    }

    async fn average(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        period: Period,
    ) -> Result<Option<(f64, u32)>> {
        let observations = self
            .store
            .observations_between(parcel_id, index_type, period.start, period.end)
            .await?;
        Ok(period_average(&latest_per_date(&observations), period))
    }
}
