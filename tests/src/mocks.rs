//! Mock implementations for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use gateway::{GatewayError, ProviderGateway, RawValues};
use monitor_core::{
    Alert, AlertType, Boundary, Error, IndexType, Parcel, ParcelId, PeriodType, RawObservation,
    Result, RunFailure, RunLease, RunState, SeriesKey, TimeSeriesPoint,
};
use parking_lot::Mutex;
use redpanda::AlertSink;
use tokio::sync::Semaphore;
use state_store::{
    AlertStore, MemoryStore, ObservationStore, ParcelRegistry, RunStateStore, SeriesStore,
    UpsertOutcome,
};
use uuid::Uuid;

use crate::fixtures;

/// Provider fake answering from a script.
///
/// Queued results are consumed first, one per call. After that, dates with a
/// configured daily mean return pixel values around it and everything else
/// returns the fallback (`NoData` unless changed). While held, every call
/// blocks until [`ScriptedGateway::release`].
#[derive(Clone)]
pub struct ScriptedGateway {
    queue: Arc<Mutex<VecDeque<std::result::Result<RawValues, GatewayError>>>>,
    daily: Arc<Mutex<HashMap<NaiveDate, f64>>>,
    fallback: Arc<Mutex<std::result::Result<RawValues, GatewayError>>>,
    calls: Arc<Mutex<Vec<(IndexType, NaiveDate)>>>,
    gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight count even when the fetch future is dropped.
struct ActiveFetch(Arc<AtomicUsize>);

impl Drop for ActiveFetch {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            daily: Arc::new(Mutex::new(HashMap::new())),
            fallback: Arc::new(Mutex::new(Err(GatewayError::NoData))),
            calls: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Blocks every fetch from now on.
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Lets held and future fetches through.
    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    /// Fetches currently inside the gateway.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous fetches seen.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn push(&self, result: std::result::Result<RawValues, GatewayError>) {
        self.queue.lock().push_back(result);
    }

    pub fn push_transient(&self, times: usize) {
        for i in 0..times {
            self.push(Err(GatewayError::transient(format!("503 #{}", i + 1))));
        }
    }

    pub fn set_daily_mean(&self, date: NaiveDate, mean: f64) {
        self.daily.lock().insert(date, mean);
    }

    pub fn set_daily_means(&self, means: &[(NaiveDate, f64)]) {
        let mut daily = self.daily.lock();
        for (date, mean) in means {
            daily.insert(*date, *mean);
        }
    }

    pub fn set_fallback(&self, result: std::result::Result<RawValues, GatewayError>) {
        *self.fallback.lock() = result;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<(IndexType, NaiveDate)> {
        self.calls.lock().clone()
    }
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderGateway for ScriptedGateway {
    async fn fetch(
        &self,
        _boundary: &Boundary,
        index_type: IndexType,
        date: NaiveDate,
    ) -> std::result::Result<RawValues, GatewayError> {
        self.calls.lock().push((index_type, date));
        let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(active, Ordering::SeqCst);
        let _active = ActiveFetch(self.in_flight.clone());

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            // Closing the gate wakes every waiter with an error.
            let _ = gate.acquire().await;
        }

        if let Some(result) = self.queue.lock().pop_front() {
            return result;
        }
        if let Some(mean) = self.daily.lock().get(&date) {
            return Ok(fixtures::values(*mean));
        }
        self.fallback.lock().clone()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Alert sink that captures everything published.
#[derive(Clone, Default)]
pub struct RecordingSink {
    published: Arc<Mutex<Vec<Alert>>>,
    should_fail: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Alert> {
        self.published.lock().clone()
    }

    pub fn published_of(&self, alert_type: AlertType) -> Vec<Alert> {
        self.published
            .lock()
            .iter()
            .filter(|a| a.alert_type == alert_type)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }

    /// Set failure mode for testing error handling.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn publish(&self, alert: &Alert) -> Result<()> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(Error::internal("alert bus unavailable"));
        }
        self.published.lock().push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// [`MemoryStore`] wrapper with injectable faults.
///
/// - `stale_due`: `due` returns every active parcel regardless of status, as
///   a lagging replica would.
/// - `fail_appends(n)`: the next `n` observation appends fail with a
///   retryable persistence error.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    stale_due: AtomicBool,
    failing_appends: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            stale_due: AtomicBool::new(false),
            failing_appends: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn set_stale_due(&self, stale: bool) {
        self.stale_due.store(stale, Ordering::SeqCst);
    }

    pub fn fail_appends(&self, times: usize) {
        self.failing_appends.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl ParcelRegistry for FaultyStore {
    async fn get_parcel(&self, id: ParcelId) -> Result<Option<Parcel>> {
        self.inner.get_parcel(id).await
    }

    async fn active_parcels(&self) -> Result<Vec<Parcel>> {
        self.inner.active_parcels().await
    }

    async fn upsert_parcel(&self, parcel: &Parcel) -> Result<()> {
        self.inner.upsert_parcel(parcel).await
    }
}

#[async_trait]
impl RunStateStore for FaultyStore {
    async fn ensure(&self, parcel_id: ParcelId, now: DateTime<Utc>) -> Result<RunState> {
        self.inner.ensure(parcel_id, now).await
    }

    async fn get_state(&self, parcel_id: ParcelId) -> Result<Option<RunState>> {
        self.inner.get_state(parcel_id).await
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ParcelId>> {
        if self.stale_due.load(Ordering::SeqCst) {
            return Ok(self
                .inner
                .active_parcels()
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect());
        }
        self.inner.due(now).await
    }

    async fn mark_running(
        &self,
        parcel_id: ParcelId,
        now: DateTime<Utc>,
    ) -> Result<Option<RunLease>> {
        self.inner.mark_running(parcel_id, now).await
    }

    async fn holds_lease(&self, lease: &RunLease) -> Result<bool> {
        self.inner.holds_lease(lease).await
    }

    async fn mark_success(
        &self,
        lease: &RunLease,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.mark_success(lease, date, now).await
    }

    async fn mark_failure(
        &self,
        lease: &RunLease,
        failure: &RunFailure,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.mark_failure(lease, failure, now).await
    }

    async fn reset(&self, parcel_id: ParcelId, now: DateTime<Utc>) -> Result<()> {
        self.inner.reset(parcel_id, now).await
    }

    async fn reclaim_stale(&self, now: DateTime<Utc>, max_age: Duration) -> Result<Vec<ParcelId>> {
        self.inner.reclaim_stale(now, max_age).await
    }
}

#[async_trait]
impl ObservationStore for FaultyStore {
    async fn append_observation(&self, observation: &RawObservation) -> Result<()> {
        let failing = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::persistence("injected write failure"));
        }
        self.inner.append_observation(observation).await
    }

    async fn observations_between(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawObservation>> {
        self.inner
            .observations_between(parcel_id, index_type, from, to)
            .await
    }

    async fn recent_daily(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        up_to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<RawObservation>> {
        self.inner
            .recent_daily(parcel_id, index_type, up_to, limit)
            .await
    }
}

#[async_trait]
impl SeriesStore for FaultyStore {
    async fn upsert_point(&self, point: &TimeSeriesPoint) -> Result<UpsertOutcome> {
        self.inner.upsert_point(point).await
    }

    async fn get_point(&self, key: &SeriesKey) -> Result<Option<TimeSeriesPoint>> {
        self.inner.get_point(key).await
    }

    async fn points_between(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        period_type: PeriodType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TimeSeriesPoint>> {
        self.inner
            .points_between(parcel_id, index_type, period_type, from, to)
            .await
    }

    async fn recent_points(
        &self,
        parcel_id: ParcelId,
        index_type: IndexType,
        period_type: PeriodType,
        up_to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<TimeSeriesPoint>> {
        self.inner
            .recent_points(parcel_id, index_type, period_type, up_to, limit)
            .await
    }
}

#[async_trait]
impl AlertStore for FaultyStore {
    async fn active_alert(
        &self,
        parcel_id: ParcelId,
        alert_type: AlertType,
    ) -> Result<Option<Alert>> {
        self.inner.active_alert(parcel_id, alert_type).await
    }

    async fn active_alerts(&self, parcel_id: ParcelId) -> Result<Vec<Alert>> {
        self.inner.active_alerts(parcel_id).await
    }

    async fn save_alert(&self, alert: &Alert) -> Result<()> {
        self.inner.save_alert(alert).await
    }

    async fn acknowledge_alert(&self, id: Uuid) -> Result<Alert> {
        self.inner.acknowledge_alert(id).await
    }

    async fn alerts_for_parcel(&self, parcel_id: ParcelId) -> Result<Vec<Alert>> {
        self.inner.alerts_for_parcel(parcel_id).await
    }
}
