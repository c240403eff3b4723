//! In-process store backing every persistence trait.
//!
//! One `parking_lot` lock per record family, plus one lock per parcel for run
//! states. Locks are never held across an await point, and each operation
//! touches at most one family at a time. Run-state transitions on different
//! parcels only share the read side of the run map.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use monitor_core::{
    latest_per_date, Alert, AlertType, Error, FailureBackoff, IndexType, Parcel, ParcelId,
    PeriodType, RawObservation, Result, RunFailure, RunLease, RunState, SeriesKey, TimeSeriesPoint,
};

use crate::{
    AlertStore, ObservationStore, ParcelRegistry, RunStateStore, SeriesStore, UpsertOutcome,
};

type SeriesId = (ParcelId, IndexType);
type RunSlot = Arc<Mutex<RunState>>;

/// In-memory implementation of the persistence traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    parcels: RwLock<HashMap<ParcelId, Parcel>>,
    runs: RwLock<HashMap<ParcelId, RunSlot>>,
    observations: RwLock<HashMap<SeriesId, Vec<RawObservation>>>,
    series: RwLock<BTreeMap<SeriesKey, TimeSeriesPoint>>,
    alerts: RwLock<HashMap<Uuid, Alert>>,
    backoff: FailureBackoff,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with a custom failure backoff schedule.
    pub fn with_backoff(backoff: FailureBackoff) -> Self {
        Self {
            backoff,
            ..Self::default()
        }
    }

    pub fn backoff(&self) -> FailureBackoff {
        self.backoff
    }

    /// Total number of stored observations, duplicates included.
    pub fn observation_count(&self) -> usize {
        self.observations.read().values().map(Vec::len).sum()
    }

    fn cadence_of(&self, parcel_id: ParcelId) -> Result<monitor_core::Cadence> {
        self.parcels
            .read()
            .get(&parcel_id)
            .map(|p| p.cadence)
            .ok_or_else(|| Error::not_found(format!("parcel {}", parcel_id)))
    }

    fn slot(&self, parcel_id: ParcelId) -> Option<RunSlot> {
        self.runs.read().get(&parcel_id).cloned()
    }

    /// Snapshot of every slot so per-parcel locks are taken without the map lock.
    fn slots(&self) -> Vec<RunSlot> {
        self.runs.read().values().cloned().collect()
    }

    fn with_state<T>(
        &self,
        parcel_id: ParcelId,
        f: impl FnOnce(&mut RunState) -> Result<T>,
    ) -> Result<T> {
        let slot = self
            .slot(parcel_id)
            .ok_or_else(|| Error::not_found(format!("run state for parcel {}", parcel_id)))?;
        let mut state = slot.lock();
        f(&mut state)
    }
}

#[async_trait]
impl ParcelRegistry for MemoryStore {
    async fn get_parcel(&self, id: ParcelId) -> Result<Option<Parcel>> {
        Ok(self.parcels.read().get(&id).cloned())
    }

    async fn active_parcels(&self) -> Result<Vec<Parcel>> {
        let mut active: Vec<Parcel> = self
            .parcels
            .read()
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect();
        active.sort_by_key(|p| p.id);
        Ok(active)
    }

    async fn upsert_parcel(&self, parcel: &Parcel) -> Result<()> {
        self.parcels.write().insert(parcel.id, parcel.clone());
        Ok(())
    }
}

#[async_trait]
impl RunStateStore for MemoryStore {
    async fn ensure(&self, parcel_id: ParcelId, now: DateTime<Utc>) -> Result<RunState> {
        let slot = match self.slot(parcel_id) {
            Some(slot) => slot,
            None => self
                .runs
                .write()
                .entry(parcel_id)
                .or_insert_with(|| Arc::new(Mutex::new(RunState::new(parcel_id, now))))
                .clone(),
        };
        let state = slot.lock().clone();
        Ok(state)
    }

    async fn get_state(&self, parcel_id: ParcelId) -> Result<Option<RunState>> {
        Ok(self.slot(parcel_id).map(|slot| slot.lock().clone()))
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ParcelId>> {
        let active: HashSet<ParcelId> = self
            .parcels
            .read()
            .values()
            .filter(|p| p.active)
            .map(|p| p.id)
            .collect();

        let mut due: Vec<(DateTime<Utc>, ParcelId)> = self
            .slots()
            .iter()
            .filter_map(|slot| {
                let state = slot.lock();
                (active.contains(&state.parcel_id) && state.is_due(now))
                    .then_some((state.next_due_at, state.parcel_id))
            })
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn mark_running(
        &self,
        parcel_id: ParcelId,
        now: DateTime<Utc>,
    ) -> Result<Option<RunLease>> {
        self.with_state(parcel_id, |state| match state.start(now) {
            Ok(lease) => Ok(Some(lease)),
            Err(Error::ConcurrencyConflict(_)) | Err(Error::InvalidTransition(_)) => Ok(None),
            Err(e) => Err(e),
        })
    }

    async fn holds_lease(&self, lease: &RunLease) -> Result<bool> {
        self.with_state(lease.parcel_id, |state| Ok(state.holds(lease)))
    }

    async fn mark_success(
        &self,
        lease: &RunLease,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let cadence = self.cadence_of(lease.parcel_id)?;
        self.with_state(lease.parcel_id, |state| {
            state.succeed(lease, date, cadence, now)
        })
    }

    async fn mark_failure(
        &self,
        lease: &RunLease,
        failure: &RunFailure,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let backoff = self.backoff;
        self.with_state(lease.parcel_id, |state| {
            state.fail(lease, failure, &backoff, now)
        })
    }

    async fn reset(&self, parcel_id: ParcelId, now: DateTime<Utc>) -> Result<()> {
        self.with_state(parcel_id, |state| {
            state.reset(now);
            Ok(())
        })
    }

    async fn reclaim_stale(&self, now: DateTime<Utc>, max_age: Duration) -> Result<Vec<ParcelId>> {
        let failure = RunFailure::abandoned(format!(
            "run exceeded {}s without completing",
            max_age.num_seconds()
        ));
        let mut reclaimed = Vec::new();
        for slot in self.slots() {
            let mut state = slot.lock();
            if state.is_stale(now, max_age) {
                state.abandon(&failure, &self.backoff, now)?;
                reclaimed.push(state.parcel_id);
            }
        }
        reclaimed.sort();
        Ok(reclaimed)
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn append_observation(&self, observation: &RawObservation) -> Result<()> {
        let mut observations = self.observations.write();
        let series = observations
            .entry((observation.parcel_id, observation.index_type))
            .or_default();
        // Keep date order; equal dates stay in insertion order.
        let at = series.partition_point(|o| o.acquisition_date <= observation.acquisition_date);
        series.insert(at, observation.clone());
        Ok(())
    }

    async fn observations_between(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawObservation>> {
        let observations = self.observations.read();
        Ok(observations
            .get(&(parcel_id, index_type))
            .map(|series| {
                series
                    .iter()
                    .filter(|o| o.acquisition_date >= from && o.acquisition_date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn recent_daily(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        up_to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<RawObservation>> {
        let upto: Vec<RawObservation> = {
            let observations = self.observations.read();
            observations
                .get(&(parcel_id, index_type))
                .map(|series| {
                    series
                        .iter()
                        .filter(|o| o.acquisition_date <= up_to)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        let daily = latest_per_date(&upto);
        let skip = daily.len().saturating_sub(limit);
        Ok(daily.into_iter().skip(skip).collect())
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    async fn upsert_point(&self, point: &TimeSeriesPoint) -> Result<UpsertOutcome> {
        let mut series = self.series.write();
        let outcome = match series.insert(point.key(), point.clone()) {
            None => UpsertOutcome::Created,
            Some(previous) if previous == *point => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Updated,
        };
        Ok(outcome)
    }

    async fn get_point(&self, key: &SeriesKey) -> Result<Option<TimeSeriesPoint>> {
        Ok(self.series.read().get(key).cloned())
    }

    async fn points_between(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        period_type: PeriodType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TimeSeriesPoint>> {
        if from > to {
            return Ok(Vec::new());
        }
        let key = |period_start| SeriesKey {
            parcel_id,
            index_type,
            period_type,
            period_start,
        };
        let series = self.series.read();
        Ok(series
            .range(key(from)..=key(to))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn recent_points(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        period_type: PeriodType,
        up_to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let key = |period_start| SeriesKey {
            parcel_id,
            index_type,
            period_type,
            period_start,
        };
        let series = self.series.read();
        let mut points: Vec<TimeSeriesPoint> = series
            .range(key(NaiveDate::MIN)..=key(up_to))
            .rev()
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect();
        points.reverse();
        Ok(points)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn active_alert(
        &self,
        parcel_id: ParcelId,
        alert_type: AlertType,
    ) -> Result<Option<Alert>> {
        Ok(self
            .alerts
            .read()
            .values()
            .find(|a| a.parcel_id == parcel_id && a.alert_type == alert_type && a.is_active())
            .cloned())
    }

    async fn active_alerts(&self, parcel_id: ParcelId) -> Result<Vec<Alert>> {
        let mut active: Vec<Alert> = self
            .alerts
            .read()
            .values()
            .filter(|a| a.parcel_id == parcel_id && a.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|a| (a.created_at, a.id));
        Ok(active)
    }

    async fn save_alert(&self, alert: &Alert) -> Result<()> {
        let mut alerts = self.alerts.write();
        if alert.is_active() {
            let duplicate = alerts.values().any(|a| {
                a.id != alert.id
                    && a.parcel_id == alert.parcel_id
                    && a.alert_type == alert.alert_type
                    && a.is_active()
            });
            if duplicate {
                return Err(Error::invalid_transition(format!(
                    "parcel {} already has an active {} alert",
                    alert.parcel_id, alert.alert_type
                )));
            }
        }
        alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn acknowledge_alert(&self, id: Uuid) -> Result<Alert> {
        let mut alerts = self.alerts.write();
        let alert = alerts
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("alert {}", id)))?;
        alert.acknowledge()?;
        Ok(alert.clone())
    }

    async fn alerts_for_parcel(&self, parcel_id: ParcelId) -> Result<Vec<Alert>> {
        let mut history: Vec<Alert> = self
            .alerts
            .read()
            .values()
            .filter(|a| a.parcel_id == parcel_id)
            .cloned()
            .collect();
        history.sort_by_key(|a| (a.created_at, a.id));
        Ok(history)
    }
}
