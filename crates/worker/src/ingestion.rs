//! Ingestion worker: fetch, reduce and persist one parcel's missing dates.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use gateway::{GatewayError, ProviderGateway};
use monitor_core::{
    reduce, Error, FailureKind, IndexType, Parcel, RawObservation, RunFailure, RunLease,
};
use state_store::{ObservationStore, ParcelRegistry, RunStateStore, Store};
use telemetry::metrics;
use tracing::{debug, error, info, warn};

use crate::alerts::AlertEngine;
use crate::config::IngestionConfig;
use crate::retry::RetryPolicy;

/// Inclusive range of acquisition dates to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn len(&self) -> usize {
        usize::try_from((self.end - self.start).num_days() + 1).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Dates to fetch next, or `None` when the parcel is up to date.
///
/// The newest date is `today - availability_lag_days`. A parcel that was
/// never ingested starts `backfill_days` before that. At most
/// `max_dates_per_run` dates are returned, oldest first.
pub fn fetch_window(
    last_success: Option<NaiveDate>,
    today: NaiveDate,
    config: &IngestionConfig,
) -> Option<FetchWindow> {
    let safe_end = today - Duration::days(i64::from(config.availability_lag_days));
    let start = match last_success {
        Some(last) => last.succ_opt()?,
        None => safe_end - Duration::days(i64::from(config.backfill_days)),
    };
    if start > safe_end {
        return None;
    }
    let cap = i64::from(config.max_dates_per_run.max(1));
    let end = start
        .checked_add_signed(Duration::days(cap - 1))
        .map_or(safe_end, |capped| capped.min(safe_end));
    Some(FetchWindow { start, end })
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    /// At least one observation was stored.
    Ingested { observations: usize, dates: usize },
    /// Every date in the window came back empty.
    NoData { dates: usize },
    /// Nothing new is available yet.
    UpToDate,
    Failed { fatal: bool, error: String },
    /// The run was reclaimed while in flight; its state belongs to a later run.
    Superseded,
}

impl IngestionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Something that can run a dispatched parcel to completion.
#[async_trait]
pub trait ParcelWorker: Send + Sync {
    /// Runs a parcel that is already marked `running` under `lease`. Always
    /// leaves the run state out of `running` unless the store itself is
    /// unreachable or the lease was superseded.
    async fn run(&self, lease: RunLease, now: DateTime<Utc>) -> IngestionOutcome;
}

pub struct IngestionWorker {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ProviderGateway>,
    alerts: Arc<AlertEngine>,
    config: IngestionConfig,
    retry: RetryPolicy,
    store_retry: RetryPolicy,
}

impl IngestionWorker {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn ProviderGateway>,
        alerts: Arc<AlertEngine>,
        config: IngestionConfig,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let store_delay = StdDuration::from_millis(config.store_retry_delay_ms);
        let store_retry =
            RetryPolicy::new(config.store_retry_attempts, store_delay, store_delay * 8);
        Self {
            store,
            gateway,
            alerts,
            config,
            retry,
            store_retry,
        }
    }

    /// Replaces the gateway retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// One gateway call under the retry policy and per-call timeout. `None`
    /// when the provider has nothing usable for the date.
    async fn fetch_one(
        &self,
        parcel: &Parcel,
        index_type: IndexType,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<RawObservation>, GatewayError> {
        let timeout = self.config.fetch_timeout();
        let boundary = &parcel.boundary;
        let gateway = self.gateway.as_ref();

        let fetched = self
            .retry
            .run("provider fetch", |attempt| {
                if attempt > 1 {
                    metrics().gateway_retries.inc();
                }
                async move {
                    match tokio::time::timeout(timeout, gateway.fetch(boundary, index_type, date)).await {
                        Ok(result) => result,
                        Err(_) => Err(GatewayError::transient(format!(
                            "fetch timed out after {}s",
                            timeout.as_secs()
                        ))),
                    }
                }
            })
            .await;

        let values = match fetched {
            Ok(values) => values,
            Err(GatewayError::NoData) => return Ok(None),
            Err(e) => return Err(e),
        };

        match reduce(&values.values, index_type.valid_range()) {
            Ok(stats) => Ok(Some(RawObservation::from_statistics(
                parcel.id, index_type, date, &stats, now,
            ))),
            Err(Error::InsufficientData) => {
                debug!(
                    parcel_id = %parcel.id,
                    index_type = %index_type,
                    date = %date,
                    pixels = values.values.len(),
                    "No valid pixels"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(parcel_id = %parcel.id, date = %date, error = %e, "Reduction failed");
                Ok(None)
            }
        }
    }

    fn superseded(&self, lease: &RunLease) -> IngestionOutcome {
        metrics().runs_superseded.inc();
        warn!(
            parcel_id = %lease.parcel_id,
            generation = lease.generation,
            "Run was reclaimed while in flight, dropping its result"
        );
        IngestionOutcome::Superseded
    }

    async fn fail(
        &self,
        lease: &RunLease,
        failure: RunFailure,
        now: DateTime<Utc>,
    ) -> IngestionOutcome {
        let parcel_id = lease.parcel_id;
        match self
            .store_retry
            .run("mark failure", |_| self.store.mark_failure(lease, &failure, now))
            .await
        {
            Ok(()) => {}
            Err(Error::SupersededRun { .. }) => return self.superseded(lease),
            Err(e) => error!(parcel_id = %parcel_id, error = %e, "Failed to record run failure"),
        }

        metrics().ingestion_failed.inc();
        let fatal = failure.kind == FailureKind::Fatal;

        if fatal {
            error!(parcel_id = %parcel_id, reason = %failure.message, "Parcel halted until reset");
        } else {
            warn!(parcel_id = %parcel_id, reason = %failure.message, "Ingestion run failed");
        }

        IngestionOutcome::Failed {
            fatal,
            error: failure.message,
        }
    }

    /// Records success for the window ending at `date`.
    async fn succeed(
        &self,
        lease: &RunLease,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(), IngestionOutcome> {
        match self
            .store_retry
            .run("mark success", |_| self.store.mark_success(lease, date, now))
            .await
        {
            Ok(()) => Ok(()),
            Err(Error::SupersededRun { .. }) => Err(self.superseded(lease)),
            Err(e) => Err(self.fail(lease, RunFailure::fatal(e.to_string()), now).await),
        }
    }

    async fn ingest(&self, lease: &RunLease, now: DateTime<Utc>) -> IngestionOutcome {
        let parcel_id = lease.parcel_id;
        let today = now.date_naive();

        let parcel = match self
            .store_retry
            .run("load parcel", |_| self.store.get_parcel(parcel_id))
            .await
        {
            Ok(Some(parcel)) => parcel,
            Ok(None) => {
                let failure = RunFailure::fatal(format!("parcel {} is not registered", parcel_id));
                return self.fail(lease, failure, now).await;
            }
            Err(e) => return self.fail(lease, RunFailure::fatal(e.to_string()), now).await,
        };

        let last_success = match self
            .store_retry
            .run("load run state", |_| self.store.get_state(parcel_id))
            .await
        {
            Ok(state) => state.and_then(|s| s.last_success_date),
            Err(e) => return self.fail(lease, RunFailure::fatal(e.to_string()), now).await,
        };

        let Some(window) = fetch_window(last_success, today, &self.config) else {
            let date = last_success.unwrap_or(today);
            if let Err(outcome) = self.succeed(lease, date, now).await {
                return outcome;
            }
            debug!(parcel_id = %parcel_id, last_success = ?last_success, "Parcel up to date");
            return IngestionOutcome::UpToDate;
        };

        debug!(
            parcel_id = %parcel_id,
            start = %window.start,
            end = %window.end,
            index_types = parcel.index_types.len(),
            "Fetching window"
        );

        let mut observations = Vec::new();
        for date in window.dates() {
            // A reclaimed run stops before writing anything further.
            match self.store.holds_lease(lease).await {
                Ok(true) => {}
                Ok(false) => return self.superseded(lease),
                Err(e) => warn!(parcel_id = %parcel_id, error = %e, "Lease check failed"),
            }
            for index_type in &parcel.index_types {
                match self.fetch_one(&parcel, *index_type, date, now).await {
                    Ok(Some(observation)) => {
                        if let Err(e) = self
                            .store_retry
                            .run("append observation", |_| {
                                self.store.append_observation(&observation)
                            })
                            .await
                        {
                            return self
                                .fail(lease, RunFailure::fatal(e.to_string()), now)
                                .await;
                        }
                        metrics().observations_written.inc();
                        observations.push(observation);
                    }
                    Ok(None) => metrics().ingestion_no_data.inc(),
                    Err(e) if e.is_retryable() => {
                        let failure = RunFailure::exhausted(format!(
                            "{} {} on {}: {}",
                            self.gateway.name(),
                            index_type,
                            date,
                            e
                        ));
                        return self.fail(lease, failure, now).await;
                    }
                    Err(e) => {
                        let failure = RunFailure::fatal(format!(
                            "{} {} on {}: {}",
                            self.gateway.name(),
                            index_type,
                            date,
                            e
                        ));
                        return self.fail(lease, failure, now).await;
                    }
                }
            }
        }

        if let Err(outcome) = self.succeed(lease, window.end, now).await {
            return outcome;
        }
        metrics().ingestion_succeeded.inc();

        for observation in &observations {
            if let Err(e) = self.alerts.evaluate_observation(observation, now).await {
                error!(
                    parcel_id = %parcel_id,
                    date = %observation.acquisition_date,
                    error = %e,
                    "Alert evaluation failed"
                );
            }
        }

        info!(
            parcel_id = %parcel_id,
            start = %window.start,
            end = %window.end,
            observations = observations.len(),
            "Ingestion run complete"
        );

        if observations.is_empty() {
            IngestionOutcome::NoData {
                dates: window.len(),
            }
        } else {
            IngestionOutcome::Ingested {
                observations: observations.len(),
                dates: window.len(),
            }
        }
    }
}

#[async_trait]
impl ParcelWorker for IngestionWorker {
    async fn run(&self, lease: RunLease, now: DateTime<Utc>) -> IngestionOutcome {
        self.ingest(&lease, now).await
    }
}
