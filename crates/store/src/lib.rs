//! Persistence boundary for the monitoring pipeline.
//!
//! Each record family gets its own trait so a backend can be swapped one
//! concern at a time. [`MemoryStore`] implements all of them and is what the
//! service and the test-suite run on.
//!
//! Every mutating operation is atomic for a single key: two workers racing on
//! the same parcel observe a consistent winner, while different parcels never
//! contend on a shared section longer than a map lookup.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use monitor_core::{
    Alert, AlertType, IndexType, Parcel, ParcelId, PeriodType, RawObservation, Result, RunFailure,
    RunLease, RunState, SeriesKey, TimeSeriesPoint,
};

pub use memory::MemoryStore;

/// Result of writing a time-series point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No point existed for the key.
    Created,
    /// A point existed with different values and was overwritten.
    Updated,
    /// The stored point already had identical values.
    Unchanged,
}

impl UpsertOutcome {
    /// Whether downstream consumers should see the point.
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Read access to registered parcels. Registration itself happens outside the
/// pipeline; `upsert_parcel` exists for seeding.
#[async_trait]
pub trait ParcelRegistry: Send + Sync {
    async fn get_parcel(&self, id: ParcelId) -> Result<Option<Parcel>>;

    /// Active parcels ordered by id.
    async fn active_parcels(&self) -> Result<Vec<Parcel>>;

    async fn upsert_parcel(&self, parcel: &Parcel) -> Result<()>;
}

/// Per-parcel ingestion progress.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Returns the parcel's run state, creating an idle one due at `now` if
    /// none exists.
    async fn ensure(&self, parcel_id: ParcelId, now: DateTime<Utc>) -> Result<RunState>;

    async fn get_state(&self, parcel_id: ParcelId) -> Result<Option<RunState>>;

    /// Active, non-halted, non-running parcels with `next_due_at <= now`,
    /// oldest `next_due_at` first with ties broken by parcel id.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ParcelId>>;

    /// Atomic `idle|failed -> running`. `None` when the parcel is already
    /// running or halted; otherwise the lease the run must complete with.
    async fn mark_running(
        &self,
        parcel_id: ParcelId,
        now: DateTime<Utc>,
    ) -> Result<Option<RunLease>>;

    /// Whether `lease` still identifies the run in flight.
    async fn holds_lease(&self, lease: &RunLease) -> Result<bool>;

    /// `running -> idle`, next run one cadence out. `last_success_date` never
    /// moves backwards. Rejects a superseded lease without changing state.
    async fn mark_success(
        &self,
        lease: &RunLease,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// `running -> failed` with exponential push-back. Fatal failures halt.
    /// Rejects a superseded lease without changing state.
    async fn mark_failure(
        &self,
        lease: &RunLease,
        failure: &RunFailure,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Operator reset of a halted or failing parcel.
    async fn reset(&self, parcel_id: ParcelId, now: DateTime<Utc>) -> Result<()>;

    /// Fails runs that have been `running` for longer than `max_age` and
    /// returns their parcel ids.
    async fn reclaim_stale(&self, now: DateTime<Utc>, max_age: Duration) -> Result<Vec<ParcelId>>;
}

/// Append-only raw observations.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn append_observation(&self, observation: &RawObservation) -> Result<()>;

    /// Every observation with `from <= acquisition_date <= to`, ordered by date
    /// and then insertion. Duplicates for one date are all returned.
    async fn observations_between(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawObservation>>;

    /// The latest observation of each of the last `limit` observed dates up to
    /// and including `up_to`, in ascending date order.
    async fn recent_daily(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        up_to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<RawObservation>>;
}

/// Derived weekly and monthly points.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    async fn upsert_point(&self, point: &TimeSeriesPoint) -> Result<UpsertOutcome>;

    async fn get_point(&self, key: &SeriesKey) -> Result<Option<TimeSeriesPoint>>;

    /// Points whose `period_start` lies in `[from, to]`, ascending.
    async fn points_between(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        period_type: PeriodType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TimeSeriesPoint>>;

    /// The last `limit` points starting on or before `up_to`, ascending.
    async fn recent_points(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        period_type: PeriodType,
        up_to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<TimeSeriesPoint>>;
}

/// Vegetation-health alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// The open or acknowledged alert of this type, if any.
    async fn active_alert(
        &self,
        parcel_id: ParcelId,
        alert_type: AlertType,
    ) -> Result<Option<Alert>>;

    /// All open or acknowledged alerts for the parcel, oldest first.
    async fn active_alerts(&self, parcel_id: ParcelId) -> Result<Vec<Alert>>;

    /// Inserts or replaces by id. Rejects a second active alert for the same
    /// (parcel, type).
    async fn save_alert(&self, alert: &Alert) -> Result<()>;

    /// External `open -> acknowledged` transition.
    async fn acknowledge_alert(&self, id: Uuid) -> Result<Alert>;

    /// Full alert history for the parcel, oldest first.
    async fn alerts_for_parcel(&self, parcel_id: ParcelId) -> Result<Vec<Alert>>;
}

/// Everything the pipeline persists.
pub trait Store:
    ParcelRegistry + RunStateStore + ObservationStore + SeriesStore + AlertStore
{
}

impl<T> Store for T where
    T: ParcelRegistry + RunStateStore + ObservationStore + SeriesStore + AlertStore
{
}
