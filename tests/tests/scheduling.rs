//! Scheduler dispatch against the real ingestion worker.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use integration_tests::fixtures::{at, date, parcel, steady_means};
use integration_tests::setup::TestContext;
use monitor_core::{ParcelId, RunStatus};
use state_store::RunStateStore;
use tokio::sync::watch;
use worker::{AggregationConfig, BackgroundTasks};

async fn register_many(ctx: &TestContext, count: usize) -> Vec<ParcelId> {
    let now = at(2025, 11, 20, 3);
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        ids.push(ctx.register(&parcel(&format!("Field {}", i)), now).await);
    }
    ids
}

#[tokio::test]
async fn test_tick_runs_every_due_parcel() {
    let ctx = TestContext::new();
    let now = at(2025, 11, 20, 3);
    let ids = register_many(&ctx, 3).await;
    ctx.gateway
        .set_daily_means(&steady_means(date(2025, 10, 19), 31));

    let summary = ctx.scheduler.tick(now).await;
    assert_eq!(summary.due, 3);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.conflicts, 0);
    ctx.scheduler.wait_idle().await;

    for id in &ids {
        let state = ctx.state(*id).await;
        assert_eq!(state.status, RunStatus::Idle);
        assert_eq!(state.last_success_date, Some(date(2025, 11, 18)));
    }
    assert_eq!(ctx.gateway.call_count(), 93);

    // Daily cadence: nothing until tomorrow.
    let summary = ctx.scheduler.tick(now + Duration::hours(1)).await;
    assert_eq!(summary.due, 0);
    let summary = ctx.scheduler.tick(now + Duration::days(1)).await;
    assert_eq!(summary.dispatched, 3);
    ctx.scheduler.wait_idle().await;
}

#[tokio::test]
async fn test_pool_bound_defers_the_rest() {
    let ctx = TestContext::with_concurrency(2);
    let now = at(2025, 11, 20, 3);
    let ids = register_many(&ctx, 5).await;

    // Spawned workers cannot start before the tick yields on this runtime,
    // so the pool is still full when the third parcel comes up.
    let summary = ctx.scheduler.tick(now).await;
    assert_eq!(summary.due, 5);
    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.deferred, 3);
    assert_eq!(ctx.scheduler.in_flight(), 2);
    ctx.scheduler.wait_idle().await;
    assert_eq!(ctx.scheduler.in_flight(), 0);

    let summary = ctx.scheduler.tick(now).await;
    assert_eq!(summary.due, 3);
    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.deferred, 1);
    ctx.scheduler.wait_idle().await;

    let summary = ctx.scheduler.tick(now).await;
    assert_eq!(summary.due, 1);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.deferred, 0);
    ctx.scheduler.wait_idle().await;

    for id in &ids {
        assert_eq!(ctx.state(*id).await.status, RunStatus::Idle);
    }
}

#[tokio::test]
async fn test_running_parcel_is_never_dispatched_twice() {
    let ctx = TestContext::new();
    let now = at(2025, 11, 20, 3);
    let ids = register_many(&ctx, 2).await;
    let taken = ids[0];

    // Another dispatcher already holds the first parcel, but a lagging view
    // still reports it as due.
    assert!(ctx.store.mark_running(taken, now).await.unwrap().is_some());
    ctx.store.set_stale_due(true);

    let summary = ctx.scheduler.tick(now).await;
    ctx.scheduler.wait_idle().await;

    assert_eq!(summary.due, 2);
    assert_eq!(summary.conflicts, 1);
    assert_eq!(summary.dispatched, 1);

    let state = ctx.state(taken).await;
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.running_since, Some(now));
    assert_eq!(ctx.state(ids[1]).await.status, RunStatus::Idle);
}

#[tokio::test]
async fn test_concurrent_ticks_account_for_every_sighting() {
    let ctx = Arc::new(TestContext::with_concurrency(16));
    let now = at(2025, 11, 20, 3);
    register_many(&ctx, 4).await;
    ctx.store.set_stale_due(true);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move { ctx.scheduler.tick(now).await }));
    }
    let mut dispatched = 0;
    let mut conflicts = 0;
    for handle in handles {
        let summary = handle.await.unwrap();
        dispatched += summary.dispatched;
        conflicts += summary.conflicts;
    }
    ctx.scheduler.wait_idle().await;

    // Every sighting is either a claim or a conflict. A parcel seen after its
    // run finished is claimable again, so only a lower bound holds on claims.
    assert!(dispatched >= 4);
    assert_eq!(dispatched + conflicts, 16);
}

#[tokio::test]
async fn test_stale_run_is_reclaimed_and_retried() {
    let ctx = TestContext::new();
    let now = at(2025, 11, 20, 3);
    let id = ctx.register(&parcel("Orphaned"), now).await;

    // A worker that claimed the parcel and vanished.
    assert!(ctx.store.mark_running(id, now).await.unwrap().is_some());

    let later = now + Duration::hours(2);
    let summary = ctx.scheduler.tick(later).await;
    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.dispatched, 0);

    let state = ctx.state(id).await;
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.consecutive_failures, 1);
    assert!(!state.halted);
    assert!(state.running_since.is_none());

    let retry_at = later + Duration::minutes(15);
    let summary = ctx.scheduler.tick(retry_at).await;
    assert_eq!(summary.dispatched, 1);
    ctx.scheduler.wait_idle().await;
    assert_eq!(ctx.state(id).await.status, RunStatus::Idle);
}

#[tokio::test]
async fn test_reclaimed_slow_run_never_overlaps_its_retry() {
    let ctx = TestContext::new();
    let now = at(2025, 11, 20, 3);
    let id = ctx.register(&parcel("Slow provider"), now).await;
    ctx.gateway
        .set_daily_means(&steady_means(date(2025, 10, 19), 31));
    ctx.gateway.hold();

    assert_eq!(ctx.scheduler.tick(now).await.dispatched, 1);
    while ctx.gateway.in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    // Still blocked in its first fetch when the stale window passes.
    let summary = ctx.scheduler.tick(now + Duration::minutes(61)).await;
    assert_eq!(summary.reclaimed, 1);
    while ctx.gateway.in_flight() > 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(ctx.scheduler.in_flight(), 0);

    let retry_at = now + Duration::minutes(77);
    assert_eq!(ctx.scheduler.tick(retry_at).await.dispatched, 1);
    ctx.gateway.release();
    ctx.scheduler.wait_idle().await;

    assert_eq!(ctx.gateway.peak_in_flight(), 1);
    assert_eq!(ctx.gateway.call_count(), 32);
    assert_eq!(ctx.store.inner().observation_count(), 31);

    let state = ctx.state(id).await;
    assert_eq!(state.status, RunStatus::Idle);
    assert_eq!(state.last_success_date, Some(date(2025, 11, 18)));
    assert_eq!(state.consecutive_failures, 0);
}

#[tokio::test]
async fn test_scheduler_loop_stops_on_shutdown() {
    let ctx = TestContext::new();
    let (tx, rx) = watch::channel(false);

    let scheduler = ctx.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run(rx).await });

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_background_tasks_stop_on_shutdown() {
    let ctx = TestContext::new();
    let (tx, rx) = watch::channel(false);

    let tasks = BackgroundTasks {
        scheduler: ctx.scheduler.clone(),
        aggregation: ctx.aggregation.clone(),
        aggregation_config: AggregationConfig::default(),
        metrics_log_interval: StdDuration::from_secs(60),
    };
    let handles = tasks.start(rx);
    assert_eq!(handles.len(), 3);

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    tx.send(true).unwrap();

    for handle in handles {
        tokio::time::timeout(StdDuration::from_secs(5), handle)
            .await
            .expect("background task did not stop")
            .unwrap();
    }
}
