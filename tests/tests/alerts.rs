//! Alert lifecycle driven by ingestion and aggregation.

use chrono::Duration;
use integration_tests::fixtures::{at, date, parcel, steady_means};
use integration_tests::setup::TestContext;
use monitor_core::{AlertStatus, AlertType, ParcelId, Severity};
use state_store::AlertStore;
use worker::IngestionOutcome;

/// Thirty steady days then a drop to 0.40 on Nov 18.
async fn declining(ctx: &TestContext) -> ParcelId {
    let now = at(2025, 11, 20, 3);
    let id = ctx.register(&parcel("Declining field"), now).await;
    ctx.gateway
        .set_daily_means(&steady_means(date(2025, 10, 19), 30));
    ctx.gateway.set_daily_mean(date(2025, 11, 18), 0.40);
    ctx.run_parcel(id, now).await;
    id
}

#[tokio::test]
async fn test_sharp_drop_opens_high_decline_alert() {
    let ctx = TestContext::new();
    let id = declining(&ctx).await;

    let published = ctx.sink.published();
    assert_eq!(published.len(), 1);
    let alert = &published[0];
    assert_eq!(alert.parcel_id, id);
    assert_eq!(alert.alert_type, AlertType::VegetationDecline);
    assert_eq!(alert.status, AlertStatus::Open);
    // 38% under a baseline of 0.65.
    assert_eq!(alert.severity, Severity::High);
    assert!(alert.anomaly);
    assert!((alert.reference_value - 0.40).abs() < 1e-9);
    assert!((alert.baseline_value - 0.65).abs() < 1e-9);

    let stored = ctx
        .store
        .active_alert(id, AlertType::VegetationDecline)
        .await
        .unwrap()
        .expect("alert persisted");
    assert_eq!(stored.id, alert.id);
}

#[tokio::test]
async fn test_repeated_trigger_refreshes_the_same_alert() {
    let ctx = TestContext::new();
    let id = declining(&ctx).await;
    let opened = ctx.sink.published()[0].clone();

    ctx.gateway.set_daily_mean(date(2025, 11, 19), 0.38);
    let tomorrow = at(2025, 11, 21, 3);
    let outcome = ctx.run_parcel(id, tomorrow).await;
    assert!(matches!(outcome, IngestionOutcome::Ingested { observations: 1, .. }));

    let active = ctx.store.active_alerts(id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, opened.id);
    assert!((active[0].reference_value - 0.38).abs() < 1e-9);
    assert_eq!(active[0].triggered_at, tomorrow);
    assert_eq!(active[0].created_at, opened.created_at);
    assert_eq!(ctx.store.alerts_for_parcel(id).await.unwrap().len(), 1);

    // Same severity as when it opened, so nothing new goes out.
    let published = ctx.sink.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].id, opened.id);
}

#[tokio::test]
async fn test_recovery_resolves_the_alert() {
    let ctx = TestContext::new();
    let id = declining(&ctx).await;

    ctx.gateway.set_daily_mean(date(2025, 11, 19), 0.66);
    let tomorrow = at(2025, 11, 21, 3);
    ctx.run_parcel(id, tomorrow).await;

    assert!(ctx.store.active_alerts(id).await.unwrap().is_empty());
    let history = ctx.store.alerts_for_parcel(id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AlertStatus::Resolved);
    assert_eq!(history[0].resolved_at, Some(tomorrow));

    let published = ctx.sink.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].status, AlertStatus::Resolved);
}

#[tokio::test]
async fn test_acknowledged_alert_stays_acknowledged_on_refresh() {
    let ctx = TestContext::new();
    let id = declining(&ctx).await;
    let opened = ctx.sink.published()[0].clone();

    let acked = ctx.alerts.acknowledge(opened.id).await.unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);

    ctx.gateway.set_daily_mean(date(2025, 11, 19), 0.38);
    ctx.run_parcel(id, at(2025, 11, 21, 3)).await;

    let active = ctx
        .store
        .active_alert(id, AlertType::VegetationDecline)
        .await
        .unwrap()
        .expect("still active");
    assert_eq!(active.id, opened.id);
    assert_eq!(active.status, AlertStatus::Acknowledged);

    // Open and acknowledge; the same-severity refresh is not republished.
    assert_eq!(ctx.sink.published().len(), 2);
    assert!(ctx.alerts.acknowledge(opened.id).await.is_err());
}

#[tokio::test]
async fn test_sustained_low_opens_after_fourteen_days() {
    let ctx = TestContext::new();
    let now = at(2025, 11, 20, 3);
    let id = ctx.register(&parcel("Bare field"), now).await;
    let low: Vec<_> = date(2025, 10, 19)
        .iter_days()
        .take(31)
        .map(|d| (d, 0.25))
        .collect();
    ctx.gateway.set_daily_means(&low);

    ctx.run_parcel(id, now).await;

    let active = ctx.store.active_alerts(id).await.unwrap();
    assert_eq!(active.len(), 1);
    let alert = &active[0];
    assert_eq!(alert.alert_type, AlertType::SustainedLowNdvi);
    assert_eq!(alert.severity, Severity::Medium);

    // Opened on the fourteenth observation. The seventeen refreshes after it
    // keep medium severity and are not republished.
    let published = ctx.sink.published_of(AlertType::SustainedLowNdvi);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].id, alert.id);
    assert_eq!(published[0].triggered_at, now);
    assert!(ctx.sink.published_of(AlertType::VegetationDecline).is_empty());
}

#[tokio::test]
async fn test_weekly_downtrend_raises_drought_risk() {
    let ctx = TestContext::new();
    let now = at(2025, 11, 20, 3);
    let id = ctx.register(&parcel("Dry field"), now).await;

    // Weekly averages step down from 0.45 to 0.31, under 0.40 for the last
    // three weeks.
    let weekly_levels = [
        (date(2025, 10, 19), 1, 0.45),
        (date(2025, 10, 20), 7, 0.44),
        (date(2025, 10, 27), 7, 0.42),
        (date(2025, 11, 3), 7, 0.38),
        (date(2025, 11, 10), 7, 0.35),
        (date(2025, 11, 17), 2, 0.31),
    ];
    let means: Vec<_> = weekly_levels
        .iter()
        .flat_map(|(start, days, level)| {
            start.iter_days().take(*days).map(move |d| (d, *level))
        })
        .collect();
    ctx.gateway.set_daily_means(&means);
    ctx.run_parcel(id, now).await;

    // Without weekly points the drought rule has nothing to read.
    assert!(ctx.sink.published_of(AlertType::DroughtRisk).is_empty());

    // The daily pass alone builds the backfilled weeks.
    let later = now + Duration::hours(1);
    ctx.aggregation.run(later.date_naive(), later).await.unwrap();

    let drought = ctx
        .store
        .active_alert(id, AlertType::DroughtRisk)
        .await
        .unwrap()
        .expect("drought alert opened");
    // Slope of 0.38, 0.35, 0.31 is -0.035 per week.
    assert_eq!(drought.severity, Severity::High);
    assert!((drought.reference_value - 0.31).abs() < 1e-9);
    assert_eq!(ctx.sink.published_of(AlertType::DroughtRisk).len(), 1);
}

#[tokio::test]
async fn test_sink_failure_does_not_fail_ingestion() {
    let ctx = TestContext::new();
    ctx.sink.set_should_fail(true);
    let now = at(2025, 11, 20, 3);
    let id = ctx.register(&parcel("Declining field"), now).await;
    ctx.gateway
        .set_daily_means(&steady_means(date(2025, 10, 19), 30));
    ctx.gateway.set_daily_mean(date(2025, 11, 18), 0.40);

    let outcome = ctx.run_parcel(id, now).await;

    assert!(matches!(outcome, IngestionOutcome::Ingested { observations: 31, .. }));
    assert!(ctx.sink.published().is_empty());
    assert!(ctx
        .store
        .active_alert(id, AlertType::VegetationDecline)
        .await
        .unwrap()
        .is_some());
}
