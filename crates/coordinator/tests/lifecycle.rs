use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use pagelift_coordinator::{
    BackgroundCoordinator, BadgeState, Coordinator, CoordinatorConfig, KeyValueStore, MemoryStore,
    RecordingBadge, StaticTabs,
};
use pagelift_core_types::{tab_key, DetectionMethod, PageData, TabId, LAST_PAGE_DATA_KEY};
use pagelift_message_bus::protocol::{ExtensionEnvelope, ExtensionKind, ExtensionSource};

struct Fixture {
    coordinator: Arc<BackgroundCoordinator>,
    store: Arc<MemoryStore>,
    badge: Arc<RecordingBadge>,
    tabs: Arc<StaticTabs>,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let badge = Arc::new(RecordingBadge::new());
    let tabs = Arc::new(StaticTabs::new());
    let coordinator = BackgroundCoordinator::new(
        store.clone(),
        badge.clone(),
        tabs.clone(),
        CoordinatorConfig {
            badge_recheck_delays: vec![Duration::ZERO, Duration::from_millis(10)],
            sweep_interval: Duration::from_secs(300),
        },
    );
    Fixture {
        coordinator,
        store,
        badge,
        tabs,
    }
}

fn record(funnel: &str, step: &str) -> PageData {
    PageData::complete(funnel, step, DetectionMethod::GlobalScan, "https://page")
}

#[tokio::test]
async fn discovery_binds_storage_and_badge() {
    let fx = fixture();
    fx.tabs.activate(TabId(42));

    fx.coordinator
        .data_discovered(TabId(42), Some(record("f1", "s1")))
        .await;

    let stored = fx.store.get(&tab_key(TabId(42))).await.unwrap();
    assert_eq!(stored["funnel_id"], "f1");
    assert_eq!(stored["step_id"], "s1");
    let last = fx.store.get(LAST_PAGE_DATA_KEY).await.unwrap();
    assert_eq!(last, stored);
    assert_eq!(fx.badge.last_for(TabId(42)), Some(BadgeState::Ready));
}

#[tokio::test]
async fn tab_removal_clears_the_stored_binding() {
    let fx = fixture();
    fx.tabs.activate(TabId(42));
    fx.coordinator
        .data_discovered(TabId(42), Some(record("f1", "s1")))
        .await;

    fx.coordinator.tab_removed(TabId(42)).await;

    assert!(fx.store.get(&tab_key(TabId(42))).await.is_none());
    // lastPageData intentionally survives as the cross-tab fallback.
    assert!(fx.store.get(LAST_PAGE_DATA_KEY).await.is_some());
}

#[tokio::test]
async fn copy_then_get_round_trips_the_snapshot() {
    let fx = fixture();
    let data = record("f1", "s1");

    let snapshot = fx.coordinator.copy_info(data.clone()).await;
    assert_eq!(snapshot.data, data);

    let read_back = fx.coordinator.copied_info().await.unwrap();
    assert_eq!(read_back, snapshot);
}

#[tokio::test]
async fn later_discoveries_win_regardless_of_sweeps() {
    let fx = fixture();
    fx.tabs.open(TabId(5));

    fx.coordinator
        .data_discovered(TabId(5), Some(record("f1", "s1")))
        .await;
    fx.coordinator.sweep().await;
    fx.coordinator
        .data_discovered(TabId(5), Some(record("f2", "s2")))
        .await;

    let stored = fx.store.get(&tab_key(TabId(5))).await.unwrap();
    assert_eq!(stored["funnel_id"], "f2");
    assert_eq!(
        fx.coordinator.page_data_for(TabId(5)).await.unwrap(),
        record("f2", "s2")
    );
}

#[tokio::test]
async fn negative_signal_clears_binding_and_badge() {
    let fx = fixture();
    fx.tabs.open(TabId(6));
    fx.coordinator
        .data_discovered(TabId(6), Some(record("f1", "s1")))
        .await;

    fx.coordinator.data_discovered(TabId(6), None).await;

    assert!(fx.store.get(&tab_key(TabId(6))).await.is_none());
    assert_eq!(fx.badge.last_for(TabId(6)), Some(BadgeState::Empty));
}

#[tokio::test]
async fn sweep_removes_dead_tabs_and_preserves_live_ones() {
    let fx = fixture();
    fx.tabs.open(TabId(1));
    fx.coordinator
        .data_discovered(TabId(1), Some(record("f1", "s1")))
        .await;
    fx.coordinator
        .data_discovered(TabId(2), Some(record("f2", "s2")))
        .await;

    let removed = fx.coordinator.sweep().await;

    assert_eq!(removed, 1);
    assert!(fx.store.get(&tab_key(TabId(1))).await.is_some());
    assert!(fx.store.get(&tab_key(TabId(2))).await.is_none());
}

#[tokio::test]
async fn activation_refreshes_badge_and_requests_redetect() {
    let fx = fixture();
    fx.tabs.activate(TabId(9));
    fx.coordinator
        .data_discovered(TabId(9), Some(record("f9", "s9")))
        .await;

    fx.coordinator.tab_activated(TabId(9)).await;

    assert_eq!(fx.badge.last_for(TabId(9)), Some(BadgeState::Ready));
    assert_eq!(fx.tabs.redetect_requests(), vec![TabId(9)]);
}

#[tokio::test]
async fn activation_of_an_unknown_tab_is_a_no_op() {
    let fx = fixture();

    fx.coordinator.tab_activated(TabId(11)).await;

    assert_eq!(fx.badge.last_for(TabId(11)), Some(BadgeState::Empty));
    assert!(fx.tabs.redetect_requests().is_empty());
}

#[tokio::test]
async fn load_completion_rechecks_the_badge_at_staggered_delays() {
    let fx = fixture();
    fx.tabs.open(TabId(3));

    // Discovery lands between the first and second re-check.
    fx.coordinator.tab_updated(TabId(3), true).await;
    sleep(Duration::from_millis(5)).await;
    fx.coordinator
        .data_discovered(TabId(3), Some(record("f3", "s3")))
        .await;
    sleep(Duration::from_millis(30)).await;

    assert_eq!(fx.badge.last_for(TabId(3)), Some(BadgeState::Ready));
}

#[tokio::test]
async fn a_new_load_replaces_previously_scheduled_rechecks() {
    let store = Arc::new(MemoryStore::new());
    let badge = Arc::new(RecordingBadge::new());
    let tabs = Arc::new(StaticTabs::new());
    let coordinator = BackgroundCoordinator::new(
        store.clone(),
        badge.clone(),
        tabs.clone(),
        CoordinatorConfig {
            badge_recheck_delays: vec![Duration::from_millis(50)],
            sweep_interval: Duration::from_secs(300),
        },
    );
    tabs.open(TabId(4));

    coordinator.tab_updated(TabId(4), true).await;
    coordinator.tab_updated(TabId(4), true).await;
    sleep(Duration::from_millis(120)).await;

    // The first schedule was cancelled; only one re-check fired.
    assert_eq!(badge.events().len(), 1);
}

#[tokio::test]
async fn incomplete_loads_schedule_nothing() {
    let fx = fixture();
    fx.coordinator.tab_updated(TabId(8), false).await;
    sleep(Duration::from_millis(30)).await;
    assert!(fx.badge.events().is_empty());
}

#[tokio::test]
async fn startup_hydrates_sweeps_and_seeds_the_badge() {
    let store = Arc::new(MemoryStore::new());
    store
        .set(
            &tab_key(TabId(1)),
            serde_json::to_value(record("f1", "s1")).unwrap(),
        )
        .await;
    store
        .set(
            &tab_key(TabId(2)),
            serde_json::to_value(record("f2", "s2")).unwrap(),
        )
        .await;
    let badge = Arc::new(RecordingBadge::new());
    let tabs = Arc::new(StaticTabs::new());
    tabs.activate(TabId(1));

    let coordinator = BackgroundCoordinator::new(
        store.clone(),
        badge.clone(),
        tabs.clone(),
        CoordinatorConfig::default(),
    );
    coordinator.start().await;

    // Tab 2 no longer exists: hydrated, then swept.
    assert!(store.get(&tab_key(TabId(2))).await.is_none());
    assert!(store.get(&tab_key(TabId(1))).await.is_some());
    assert_eq!(badge.last_for(TabId(1)), Some(BadgeState::Ready));
    coordinator.stop();
}

#[tokio::test]
async fn extension_envelopes_drive_the_same_operations() {
    let fx = fixture();
    fx.tabs.open(TabId(12));

    let _ = fx
        .coordinator
        .handle(ExtensionEnvelope::new(
            ExtensionSource::Relay,
            ExtensionKind::DataDiscovered {
                tab: TabId(12),
                data: Some(record("f12", "s12")),
            },
        ))
        .await;
    let copied = fx
        .coordinator
        .handle(ExtensionEnvelope::new(
            ExtensionSource::Popup,
            ExtensionKind::CopyData {
                data: record("f12", "s12"),
            },
        ))
        .await
        .expect("copy answers with the snapshot");
    assert_eq!(copied["data"]["funnel_id"], "f12");

    let fetched = fx
        .coordinator
        .handle(ExtensionEnvelope::new(
            ExtensionSource::Popup,
            ExtensionKind::GetCopied,
        ))
        .await
        .expect("snapshot is readable back");
    assert_eq!(fetched, copied);
}
