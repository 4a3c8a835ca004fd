//! Daily roll-up: idempotence, catch-up windows and failure handling.

mod common;

use common::*;
use smart_bridge::analytics::aggregation::LEASE_NAME;
use smart_bridge::analytics::DailyAggregator;
use smart_bridge::config::AnalyticsConfig;
use smart_bridge::lease::LeaseTable;
use smart_bridge::settings::SettingsService;
use smart_bridge::storage::Storage;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    storage: Arc<dyn Storage>,
    settings: Arc<SettingsService>,
    leases: Arc<LeaseTable>,
    aggregator: DailyAggregator,
}

async fn harness(storage: Arc<dyn Storage>) -> Harness {
    let settings = Arc::new(SettingsService::load(Arc::clone(&storage)).await.unwrap());
    let leases = Arc::new(LeaseTable::new());
    let aggregator = DailyAggregator::new(
        Arc::clone(&storage),
        Arc::clone(&settings),
        Arc::clone(&leases),
        &AnalyticsConfig::default(),
    );
    Harness {
        storage,
        settings,
        leases,
        aggregator,
    }
}

#[tokio::test]
async fn test_aggregate_day_is_idempotent() {
    let storage = create_test_storage().await;
    let coupang = create_link(&storage, "cp", "https://www.coupang.com/vp/products/1").await;
    let temu = create_link(&storage, "tm", "https://temu.com/item/1").await;
    insert_click(&storage, &coupang, "v1", unix("2024-06-01", 1), Some("https://www.google.com/")).await;
    insert_click(&storage, &coupang, "v1", unix("2024-06-01", 2), None).await;
    insert_click(&storage, &temu, "v2", unix("2024-06-01", 3), Some("https://instagram.com/p/1")).await;
    insert_click(&storage, &temu, "v3", unix("2024-06-02", 3), None).await;
    let h = harness(storage).await;

    let first = h.aggregator.aggregate_day(date("2024-06-01")).await.unwrap();
    let second = h.aggregator.aggregate_day(date("2024-06-01")).await.unwrap();

    assert_eq!(first.total_clicks, 3);
    assert_eq!(first.unique_visitors, 2);
    assert_eq!(first.platform_share["Coupang"], 2);
    assert_eq!(first.platform_share["Temu"], 1);
    assert_eq!(first.referers["Direct"], 1);
    assert_eq!(first.referers["Search"], 1);
    assert_eq!(first.referers["SNS"], 1);
    assert_eq!(first.referers["Other"], 0);

    let stored = h
        .storage
        .get_daily_stats(date("2024-06-01"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_clicks, second.total_clicks);
    assert_eq!(stored.unique_visitors, second.unique_visitors);
    assert_eq!(stored.platform_share, first.platform_share);
    assert_eq!(stored.referers, first.referers);
}

#[tokio::test]
async fn test_fresh_install_aggregates_only_yesterday() {
    let h = harness(create_test_storage().await).await;

    let days = h.aggregator.catch_up(date("2024-06-05")).await.unwrap();
    assert_eq!(days, 1);
    assert_eq!(
        h.settings.last_aggregation_date().await.unwrap(),
        Some(date("2024-06-04"))
    );
    assert!(h.storage.get_daily_stats(date("2024-06-04")).await.unwrap().is_some());
    assert!(h.storage.get_daily_stats(date("2024-06-03")).await.unwrap().is_none());

    // nothing left to do on the same day
    assert_eq!(h.aggregator.catch_up(date("2024-06-05")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_catch_up_fills_every_missed_day() {
    let h = harness(create_test_storage().await).await;
    h.settings
        .set_last_aggregation_date(date("2024-06-01"))
        .await
        .unwrap();

    let days = h.aggregator.catch_up(date("2024-06-05")).await.unwrap();
    assert_eq!(days, 3);
    for d in ["2024-06-02", "2024-06-03", "2024-06-04"] {
        assert!(h.storage.get_daily_stats(date(d)).await.unwrap().is_some(), "{d}");
    }
    assert_eq!(
        h.settings.last_aggregation_date().await.unwrap(),
        Some(date("2024-06-04"))
    );
}

#[tokio::test]
async fn test_catch_up_is_bounded() {
    let h = harness(create_test_storage().await).await;
    h.settings
        .set_last_aggregation_date(date("2024-01-01"))
        .await
        .unwrap();

    let days = h.aggregator.catch_up(date("2024-06-05")).await.unwrap();
    assert_eq!(days, 31);
    assert!(h.storage.get_daily_stats(date("2024-05-05")).await.unwrap().is_some());
    assert!(h.storage.get_daily_stats(date("2024-05-04")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failure_keeps_marker_on_last_success() {
    let inner = create_test_storage().await;
    let failing = Arc::new(FailingStorage::new(Arc::clone(&inner), date("2024-06-03")));
    let storage: Arc<dyn Storage> = failing.clone();
    let h = harness(storage).await;
    h.settings
        .set_last_aggregation_date(date("2024-06-01"))
        .await
        .unwrap();

    let days = h.aggregator.catch_up(date("2024-06-05")).await.unwrap();
    assert_eq!(days, 1);
    assert_eq!(failing.upserts.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.settings.last_aggregation_date().await.unwrap(),
        Some(date("2024-06-02"))
    );
    // later days were not attempted past the failure
    assert!(inner.get_daily_stats(date("2024-06-04")).await.unwrap().is_none());

    // the next run over a healthy store resumes from the marker
    let healthy = harness(inner).await;
    assert_eq!(healthy.aggregator.catch_up(date("2024-06-05")).await.unwrap(), 2);
    assert_eq!(
        healthy.settings.last_aggregation_date().await.unwrap(),
        Some(date("2024-06-04"))
    );
}

#[tokio::test]
async fn test_held_lease_skips_catch_up() {
    let h = harness(create_test_storage().await).await;
    let token = h
        .leases
        .acquire(LEASE_NAME, Duration::from_secs(60))
        .unwrap();

    assert_eq!(h.aggregator.catch_up(date("2024-06-05")).await.unwrap(), 0);
    assert_eq!(h.settings.last_aggregation_date().await.unwrap(), None);

    h.leases.release(LEASE_NAME, token);
    assert_eq!(h.aggregator.catch_up(date("2024-06-05")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_scheduled_run_picks_up_late_clicks() {
    let storage = create_test_storage().await;
    let link = create_link(&storage, "late", "https://temu.com/item/1").await;
    insert_click(&storage, &link, "v1", unix("2024-06-04", 10), None).await;
    let h = harness(Arc::clone(&storage)).await;

    h.aggregator.run_scheduled(date("2024-06-05")).await.unwrap();
    let stats = h.storage.get_daily_stats(date("2024-06-04")).await.unwrap().unwrap();
    assert_eq!(stats.total_clicks, 1);

    insert_click(&storage, &link, "v2", unix("2024-06-04", 23), None).await;
    h.aggregator.run_scheduled(date("2024-06-05")).await.unwrap();
    let stats = h.storage.get_daily_stats(date("2024-06-04")).await.unwrap().unwrap();
    assert_eq!(stats.total_clicks, 2);
    assert_eq!(stats.unique_visitors, 2);
}

#[tokio::test]
async fn test_missed_check_is_throttled() {
    let h = harness(create_test_storage().await).await;

    assert_eq!(h.aggregator.check_missed(date("2024-06-05")).await.unwrap(), 1);
    // a new day, but the check ran less than a minute ago
    assert_eq!(h.aggregator.check_missed(date("2024-06-06")).await.unwrap(), 0);
    assert_eq!(
        h.settings.last_aggregation_date().await.unwrap(),
        Some(date("2024-06-04"))
    );
}
