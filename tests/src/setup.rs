//! Common test setup functions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use monitor_core::{FailureBackoff, Parcel, ParcelId, RunState};
use state_store::{MemoryStore, ParcelRegistry, RunStateStore, Store};
use worker::{
    AggregationConfig, AggregationEngine, AlertEngine, AlertRules, IngestionConfig,
    IngestionOutcome, IngestionWorker, ParcelWorker, RetryPolicy, Scheduler, SchedulerConfig,
};

use crate::mocks::{FaultyStore, RecordingSink, ScriptedGateway};

/// Full pipeline on an in-memory store with a scripted provider.
///
/// Ingestion backfills 30 days in a single run so a fresh parcel is fully
/// loaded by one `run_parcel`. Gateway retries wait 1ms between attempts.
pub struct TestContext {
    pub store: Arc<FaultyStore>,
    pub gateway: ScriptedGateway,
    pub sink: RecordingSink,
    pub alerts: Arc<AlertEngine>,
    pub worker: Arc<IngestionWorker>,
    pub aggregation: Arc<AggregationEngine>,
    pub scheduler: Arc<Scheduler>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_concurrency(4)
    }

    pub fn with_concurrency(max_concurrency: usize) -> Self {
        telemetry::init_tracing(telemetry::TracingConfig::new().with_filter("warn"));

        let store = Arc::new(FaultyStore::new(MemoryStore::with_backoff(
            FailureBackoff::default(),
        )));
        let dyn_store: Arc<dyn Store> = store.clone();
        let gateway = ScriptedGateway::new();
        let sink = RecordingSink::new();

        let alerts = Arc::new(AlertEngine::new(
            dyn_store.clone(),
            Arc::new(sink.clone()),
            AlertRules::default(),
        ));

        let worker = Arc::new(
            IngestionWorker::new(
                dyn_store.clone(),
                Arc::new(gateway.clone()),
                alerts.clone(),
                ingestion_config(),
            )
            .with_retry_policy(RetryPolicy::new(
                4,
                Duration::from_millis(1),
                Duration::from_millis(1),
            )),
        );

        let aggregation = Arc::new(AggregationEngine::new(
            dyn_store.clone(),
            alerts.clone(),
            AggregationConfig::default(),
        ));

        let scheduler = Arc::new(Scheduler::new(
            dyn_store,
            worker.clone(),
            SchedulerConfig {
                max_concurrency,
                ..SchedulerConfig::default()
            },
        ));

        Self {
            store,
            gateway,
            sink,
            alerts,
            worker,
            aggregation,
            scheduler,
        }
    }

    /// Registers the parcel and creates its run state, due at `now`.
    pub async fn register(&self, parcel: &Parcel, now: DateTime<Utc>) -> ParcelId {
        self.store
            .upsert_parcel(parcel)
            .await
            .expect("Failed to register parcel");
        self.store
            .ensure(parcel.id, now)
            .await
            .expect("Failed to create run state");
        parcel.id
    }

    /// Claims the parcel and runs the worker inline, the way a scheduler
    /// dispatch would.
    pub async fn run_parcel(&self, parcel_id: ParcelId, now: DateTime<Utc>) -> IngestionOutcome {
        let lease = self
            .store
            .mark_running(parcel_id, now)
            .await
            .expect("Failed to mark parcel running")
            .unwrap_or_else(|| panic!("parcel {} was not claimable", parcel_id));
        self.worker.run(lease, now).await
    }

    pub async fn state(&self, parcel_id: ParcelId) -> RunState {
        self.store
            .get_state(parcel_id)
            .await
            .expect("Failed to load run state")
            .expect("Run state missing")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Ingestion settings used across the suite.
pub fn ingestion_config() -> IngestionConfig {
    IngestionConfig {
        backfill_days: 30,
        max_dates_per_run: 31,
        fetch_timeout_secs: 5,
        store_retry_attempts: 3,
        store_retry_delay_ms: 1,
        ..IngestionConfig::default()
    }
}
