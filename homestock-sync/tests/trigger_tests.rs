mod common;

use common::{MockApi, HOME};
use homestock_sync::{
    AuthProvider, EntityStore, MemorySyncStateStore, StaticToken, SyncCoordinator, SyncTriggers,
    TriggerConfig,
};
use homestock_types::{DeviceId, EntityKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const PERIOD: Duration = Duration::from_secs(60);
const QUIET: Duration = Duration::from_secs(2);

fn start(auth: Arc<dyn AuthProvider>) -> (Arc<MockApi>, SyncTriggers) {
    common::init_tracing();
    let api = MockApi::new();
    let coordinator = SyncCoordinator::new(
        api.clone(),
        Arc::new(EntityStore::new()),
        Arc::new(MemorySyncStateStore::new()),
        DeviceId::new(),
    );
    coordinator.set_active_home(HOME);
    let triggers = SyncTriggers::start(
        Arc::new(coordinator),
        auth,
        TriggerConfig {
            periodic_interval: PERIOD,
            quiet_period: QUIET,
        },
    );
    (api, triggers)
}

fn signed_in() -> Arc<dyn AuthProvider> {
    Arc::new(StaticToken::new("token"))
}

// ── Explicit ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn explicit_request_runs_one_pass() {
    let (api, triggers) = start(signed_in());
    let mut status = triggers.status();

    triggers.request_sync();
    status.wait_for(|s| s.last_report.is_some()).await.unwrap();

    assert_eq!(api.pull_count(), 5);
    let current = status.borrow().clone();
    assert!(!current.syncing);
    assert!(current.last_synced_at.is_some());
    assert_eq!(current.last_error, None);
}

// ── Change debounce ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn changes_sync_once_after_quiet_period() {
    let (api, triggers) = start(signed_in());
    let mut status = triggers.status();

    triggers.notify_changed();
    sleep(Duration::from_secs(1)).await;
    triggers.notify_changed();
    sleep(Duration::from_secs(1)).await;
    triggers.notify_changed();

    // Each signal restarted the quiet period.
    sleep(Duration::from_millis(1900)).await;
    assert_eq!(api.pull_count(), 0);

    status.wait_for(|s| s.last_report.is_some()).await.unwrap();
    assert_eq!(api.pull_count(), 5);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(api.pull_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn burst_of_signals_is_one_pass() {
    let (api, triggers) = start(signed_in());

    for _ in 0..20 {
        triggers.notify_changed();
    }
    sleep(QUIET + Duration::from_secs(1)).await;

    assert_eq!(api.pull_count(), 5);
}

// ── Periodic ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn periodic_sync_only_when_signed_in() {
    let token = Arc::new(StaticToken::signed_out());
    let (api, _triggers) = start(token.clone());

    sleep(PERIOD + Duration::from_secs(1)).await;
    assert_eq!(api.pull_count(), 0);

    token.set("token");
    sleep(PERIOD).await;
    assert_eq!(api.pull_count(), 5);

    sleep(PERIOD).await;
    assert_eq!(api.pull_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_loop() {
    let (api, triggers) = start(signed_in());
    triggers.notify_changed();
    triggers.shutdown().await;

    sleep(PERIOD * 2).await;
    assert_eq!(api.pull_count(), 0);
}

// ── Status ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn status_tracks_errors_until_a_clean_pass() {
    let (api, triggers) = start(signed_in());
    let mut status = triggers.status();
    api.fail_pulls(HOME, EntityKind::TodoItem);

    triggers.request_sync();
    status.wait_for(|s| s.last_report.is_some()).await.unwrap();
    {
        let current = status.borrow();
        assert!(current.last_error.is_some());
        assert_eq!(current.last_synced_at, None);
        assert!(!current.syncing);
    }

    api.heal_pulls();
    triggers.request_sync();
    status.wait_for(|s| s.last_synced_at.is_some()).await.unwrap();
    assert_eq!(status.borrow().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn status_shows_a_pass_that_could_not_start() {
    let coordinator = SyncCoordinator::new(
        MockApi::new(),
        Arc::new(EntityStore::new()),
        Arc::new(MemorySyncStateStore::new()),
        DeviceId::new(),
    );
    let triggers = SyncTriggers::start(
        Arc::new(coordinator),
        signed_in(),
        TriggerConfig {
            periodic_interval: PERIOD,
            quiet_period: QUIET,
        },
    );
    let mut status = triggers.status();

    triggers.request_sync();
    status.wait_for(|s| s.last_error.is_some()).await.unwrap();

    let current = status.borrow().clone();
    assert!(current.last_error.unwrap().contains("no active home"));
    assert!(!current.syncing);
    assert_eq!(current.last_synced_at, None);
}
