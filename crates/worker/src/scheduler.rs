//! Dispatch loop and the periodic background tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use monitor_core::{ParcelId, RunLease};
use parking_lot::Mutex;
use state_store::{RunStateStore, Store};
use telemetry::metrics;
use tokio::sync::{watch, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::aggregation::AggregationEngine;
use crate::config::{AggregationConfig, SchedulerConfig};
use crate::ingestion::{IngestionOutcome, ParcelWorker};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub dispatched: usize,
    /// Lost the `mark_running` race to another dispatcher
    pub conflicts: usize,
    /// Left for the next tick because the pool was full
    pub deferred: usize,
    /// Stale runs failed before dispatching
    pub reclaimed: usize,
}

/// Worker tasks spawned by this scheduler, by parcel and run generation.
type Tracked = Arc<Mutex<HashMap<ParcelId, (u64, AbortHandle)>>>;

/// Keeps the in-flight gauge accurate when a worker task is aborted.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        metrics().workers_in_flight.inc();
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics().workers_in_flight.dec();
    }
}

/// Finds due parcels and hands them to a bounded worker pool.
///
/// A tick never waits for the workers it spawns. When the pool is full the
/// remaining parcels stay due and are picked up by a later tick. Reclaiming a
/// stale run aborts the local task still holding it, and its lease stops
/// matching, so a parcel never has two live runs.
pub struct Scheduler {
    store: Arc<dyn Store>,
    worker: Arc<dyn ParcelWorker>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    tracked: Tracked,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, worker: Arc<dyn ParcelWorker>, config: SchedulerConfig) -> Self {
        let pool = config.max_concurrency.max(1);
        Self {
            store,
            worker,
            config,
            permits: Arc::new(Semaphore::new(pool)),
            tracked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Workers currently running.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrency.max(1) - self.permits.available_permits()
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        metrics().ticks.inc();
        let mut summary = TickSummary::default();

        match self
            .store
            .reclaim_stale(now, self.config.stale_run_after())
            .await
        {
            Ok(reclaimed) => {
                for parcel_id in &reclaimed {
                    let aborted = match self.tracked.lock().remove(parcel_id) {
                        Some((_, handle)) => {
                            handle.abort();
                            true
                        }
                        None => false,
                    };
                    warn!(parcel_id = %parcel_id, aborted, "Reclaimed stale run");
                }
                metrics().runs_reclaimed.inc_by(reclaimed.len() as u64);
                summary.reclaimed = reclaimed.len();
            }
            Err(e) => error!(error = %e, "Failed to reclaim stale runs"),
        }

        let due = match self.store.due(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to query due parcels");
                return summary;
            }
        };
        summary.due = due.len();

        for (position, parcel_id) in due.iter().copied().enumerate() {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                summary.deferred = due.len() - position;
                break;
            };

            let lease = match self.store.mark_running(parcel_id, now).await {
                Ok(Some(lease)) => lease,
                Ok(None) => {
                    metrics().dispatch_conflicts.inc();
                    summary.conflicts += 1;
                    debug!(parcel_id = %parcel_id, "Parcel already running, skipped");
                    continue;
                }
                Err(e) => {
                    error!(parcel_id = %parcel_id, error = %e, "Failed to mark parcel running");
                    continue;
                }
            };

            metrics().parcels_dispatched.inc();
            summary.dispatched += 1;
            self.spawn_worker(lease, permit, now);
        }

        if summary.due > 0 || summary.reclaimed > 0 {
            info!(
                due = summary.due,
                dispatched = summary.dispatched,
                conflicts = summary.conflicts,
                deferred = summary.deferred,
                reclaimed = summary.reclaimed,
                "Scheduler tick"
            );
        }
        summary
    }

    fn spawn_worker(
        &self,
        lease: RunLease,
        permit: tokio::sync::OwnedSemaphorePermit,
        now: DateTime<Utc>,
    ) {
        let worker = self.worker.clone();
        let tracked = self.tracked.clone();
        let parcel_id = lease.parcel_id;

        // Held across the spawn so the task cannot untrack itself before it
        // is tracked.
        let mut running = self.tracked.lock();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let _in_flight = InFlight::enter();
            let outcome = worker.run(lease, now).await;
            {
                let mut running = tracked.lock();
                if running
                    .get(&parcel_id)
                    .is_some_and(|(generation, _)| *generation == lease.generation)
                {
                    running.remove(&parcel_id);
                }
            }
            match outcome {
                IngestionOutcome::Failed { fatal, error } => {
                    debug!(parcel_id = %parcel_id, fatal, error = %error, "Worker finished with failure")
                }
                other => debug!(parcel_id = %parcel_id, outcome = ?other, "Worker finished"),
            }
        });
        running.insert(parcel_id, (lease.generation, handle.abort_handle()));
    }

    /// Waits until every spawned worker has finished.
    pub async fn wait_idle(&self) {
        let pool = u32::try_from(self.config.max_concurrency.max(1)).unwrap_or(u32::MAX);
        if let Ok(all) = self.permits.acquire_many(pool).await {
            drop(all);
        }
    }

    /// Ticks on a fixed interval until `shutdown` flips to true, then drains
    /// the pool. Missed ticks are skipped, never replayed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.tick_interval_secs,
            max_concurrency = self.config.max_concurrency,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = self.in_flight(), "Scheduler stopping, draining workers");
        self.wait_idle().await;
        info!("Scheduler stopped");
    }
}

/// Background tasks of the service.
pub struct BackgroundTasks {
    pub scheduler: Arc<Scheduler>,
    pub aggregation: Arc<AggregationEngine>,
    pub aggregation_config: AggregationConfig,
    pub metrics_log_interval: Duration,
}

impl BackgroundTasks {
    /// Starts the dispatch loop, the aggregation loop and the metrics logger.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = self.scheduler.clone();
        let rx = shutdown.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run(rx).await;
        }));

        let aggregation = self.aggregation.clone();
        let every = self.aggregation_config.interval();
        let rx = shutdown.clone();
        handles.push(tokio::spawn(async move {
            run_aggregation(aggregation, every, rx).await;
        }));

        let every = self.metrics_log_interval;
        handles.push(tokio::spawn(async move {
            run_metrics_log(every, shutdown).await;
        }));

        info!("Background tasks started");
        handles
    }
}

async fn run_aggregation(
    engine: Arc<AggregationEngine>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                if let Err(e) = engine.run(now.date_naive(), now).await {
                    error!("Aggregation pass error: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn run_metrics_log(every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => telemetry::log_snapshot(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
