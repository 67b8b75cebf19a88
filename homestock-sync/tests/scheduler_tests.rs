mod common;

use common::{harness, item, HOME};
use homestock_sync::{NoticeLevel, SyncError};
use homestock_types::{Entity, EntityKind, InventoryItem};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::{sleep, Instant};

fn name_of(h: &common::Harness, id: &str) -> Option<String> {
    h.store.items().snapshot(id).map(|e| e.fields.name)
}

// ── Coalescing ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn edits_within_window_send_one_request_with_last_value() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));

    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "A".into())
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "B".into())
        .unwrap();

    h.scheduler.wait_idle().await;

    assert_eq!(h.api.push_count(), 1);
    assert_eq!(h.api.pushed_names(), vec!["B".to_string()]);
    let stored = h.store.items().snapshot("i1").unwrap();
    assert_eq!(stored.fields.name, "B");
    assert!(!stored.is_pending());
    assert_eq!(stored.updated_at, Some(common::server_time()));
}

#[tokio::test(start_paused = true)]
async fn many_rapid_edits_collapse_to_final_state() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));

    for n in 1..=10 {
        h.scheduler
            .update::<InventoryItem>("i1", move |f| f.quantity = f64::from(n))
            .unwrap();
        sleep(Duration::from_millis(30)).await;
    }
    h.scheduler.wait_idle().await;

    let pushes = h.api.pushes.lock().clone();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].entities[0]["quantity"], 10.0);
    assert_eq!(pushes[0].entity_type, EntityKind::InventoryItem);
    assert_eq!(pushes[0].home_id, HOME);
}

#[tokio::test(start_paused = true)]
async fn edit_is_visible_before_any_request() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));

    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "now".into())
        .unwrap();

    let stored = h.store.items().snapshot("i1").unwrap();
    assert_eq!(stored.fields.name, "now");
    assert!(stored.pending_update);
    assert_eq!(h.api.push_count(), 0);
    assert!(h.scheduler.in_flight_ids(EntityKind::InventoryItem).contains("i1"));

    h.scheduler.wait_idle().await;
    assert!(h.scheduler.in_flight_ids(EntityKind::InventoryItem).is_empty());
}

#[tokio::test(start_paused = true)]
async fn debounce_waits_the_full_window() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));

    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "A".into())
        .unwrap();
    sleep(Duration::from_millis(399)).await;
    assert_eq!(h.api.push_count(), 0);
    sleep(Duration::from_millis(2)).await;
    assert_eq!(h.api.push_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn flush_sends_without_waiting() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));
    let started = Instant::now();

    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "A".into())
        .unwrap();
    h.scheduler.flush();
    h.scheduler.wait_idle().await;

    assert_eq!(h.api.push_count(), 1);
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn update_of_unknown_entity_fails() {
    let h = harness();
    let err = h
        .scheduler
        .update::<InventoryItem>("missing", |f| f.name = "x".into())
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound { kind: EntityKind::InventoryItem, .. }));
    assert!(h.scheduler.in_flight().is_empty());
}

// ── Failure and revert ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failure_reverts_to_value_before_the_burst() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));
    h.api.fail_pushes(&[422]);

    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "A".into())
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "B".into())
        .unwrap();
    h.scheduler.wait_idle().await;

    let stored = h.store.items().snapshot("i1").unwrap();
    assert_eq!(stored.fields.name, "start");
    assert!(!stored.is_pending());

    let notices = h.notifier.notices.lock().clone();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].entity_id.as_deref(), Some("i1"));
    assert!(h.scheduler.last_error().is_some());
}

#[tokio::test(start_paused = true)]
async fn not_found_reverts_after_single_request() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));
    h.api.fail_pushes(&[404]);

    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "gone".into())
        .unwrap();
    h.scheduler.wait_idle().await;

    assert_eq!(h.api.push_count(), 1);
    assert_eq!(name_of(&h, "i1").as_deref(), Some("start"));
}

#[tokio::test(start_paused = true)]
async fn next_burst_snapshots_again() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));

    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "saved".into())
        .unwrap();
    h.scheduler.wait_idle().await;

    h.api.fail_pushes(&[400]);
    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "rejected".into())
        .unwrap();
    h.scheduler.wait_idle().await;

    assert_eq!(name_of(&h, "i1").as_deref(), Some("saved"));
}

// ── Staleness ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stale_success_does_not_clobber_newer_edit() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));
    h.api.set_push_delay(Duration::from_secs(1));

    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "A".into())
        .unwrap();
    // Past the debounce: "A" is on the wire.
    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.api.push_count(), 1);
    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "B".into())
        .unwrap();

    // "A" is confirmed at 1.4 s; the entity must still read "B".
    sleep(Duration::from_millis(950)).await;
    let stored = h.store.items().snapshot("i1").unwrap();
    assert_eq!(stored.fields.name, "B");
    assert!(stored.pending_update);

    h.scheduler.wait_idle().await;
    assert_eq!(h.api.pushed_names(), vec!["A".to_string(), "B".to_string()]);
    let stored = h.store.items().snapshot("i1").unwrap();
    assert_eq!(stored.fields.name, "B");
    assert!(!stored.is_pending());
}

#[tokio::test(start_paused = true)]
async fn stale_failure_is_ignored() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));
    h.api.set_push_delay(Duration::from_secs(1));
    h.api.fail_pushes(&[422]);

    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "A".into())
        .unwrap();
    sleep(Duration::from_millis(500)).await;
    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "B".into())
        .unwrap();
    h.scheduler.wait_idle().await;

    assert_eq!(name_of(&h, "i1").as_deref(), Some("B"));
    assert!(h.notifier.notices.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn at_most_one_request_per_id_on_the_wire() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));
    h.store.items().replace(item("i2", "other"));
    h.api.set_push_delay(Duration::from_secs(1));

    for n in 0..4 {
        h.scheduler
            .update::<InventoryItem>("i1", move |f| f.name = format!("v{n}"))
            .unwrap();
        h.scheduler
            .update::<InventoryItem>("i2", move |f| f.name = format!("w{n}"))
            .unwrap();
        sleep(Duration::from_millis(450)).await;
    }
    h.scheduler.wait_idle().await;

    assert_eq!(h.api.max_concurrent_per_id(), 1);
    assert_eq!(name_of(&h, "i1").as_deref(), Some("v3"));
    let last_i1 = h
        .api
        .pushes
        .lock()
        .iter()
        .rev()
        .find(|p| p.entities[0]["id"] == "i1")
        .map(|p| p.entities[0]["name"].clone());
    assert_eq!(last_i1, Some(serde_json::json!("v3")));
}

// ── Create & delete ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn create_pushes_immediately_and_clears_flag() {
    let h = harness();
    let entity = Entity::local(
        HOME,
        InventoryItem {
            name: "Milk".into(),
            ..Default::default()
        },
    );

    let id = h.scheduler.create(entity).unwrap();
    assert!(h.store.items().snapshot(&id).unwrap().pending_create);

    h.scheduler.wait_idle().await;
    assert_eq!(h.api.push_count(), 1);
    let stored = h.store.items().snapshot(&id).unwrap();
    assert!(!stored.is_pending());
    assert_eq!(stored.updated_at, Some(common::server_time()));
}

#[tokio::test(start_paused = true)]
async fn failed_create_removes_entity() {
    let h = harness();
    h.api.fail_pushes(&[422]);

    let id = h.scheduler.create(item("new", "Eggs")).unwrap();
    h.scheduler.wait_idle().await;

    assert!(h.store.items().snapshot(&id).is_none());
    assert_eq!(h.notifier.notices.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn edit_during_create_waits_for_the_create() {
    let h = harness();
    h.api.set_push_delay(Duration::from_millis(600));

    let id = h.scheduler.create(item("new", "Eggs")).unwrap();
    sleep(Duration::from_millis(10)).await;
    h.scheduler
        .update::<InventoryItem>(&id, |f| f.name = "Brown eggs".into())
        .unwrap();
    h.scheduler.wait_idle().await;

    assert_eq!(h.api.max_concurrent_per_id(), 1);
    assert_eq!(h.api.pushed_names(), vec!["Eggs".to_string(), "Brown eggs".to_string()]);
    let stored = h.store.items().snapshot(&id).unwrap();
    assert_eq!(stored.fields.name, "Brown eggs");
    assert!(!stored.is_pending());
}

#[tokio::test(start_paused = true)]
async fn failed_edit_after_confirmed_create_reverts_to_confirmed() {
    let h = harness();
    h.api.set_push_delay(Duration::from_millis(600));

    let id = h.scheduler.create(item("new", "Eggs")).unwrap();
    sleep(Duration::from_millis(10)).await;
    h.scheduler
        .update::<InventoryItem>(&id, |f| f.name = "Brown eggs".into())
        .unwrap();
    // The create is confirmed at 600 ms; the edit goes out after it.
    sleep(Duration::from_millis(690)).await;
    h.api.fail_pushes(&[422]);
    h.scheduler.wait_idle().await;

    assert_eq!(h.api.pushed_names(), vec!["Eggs".to_string(), "Brown eggs".to_string()]);
    let stored = h.store.items().snapshot(&id).unwrap();
    assert_eq!(stored.fields.name, "Eggs");
    assert!(!stored.is_pending());
    assert_eq!(stored.updated_at, Some(common::server_time()));
    let notices = h.notifier.notices.lock().clone();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].message.starts_with("Couldn't save"));
}

#[tokio::test(start_paused = true)]
async fn edit_before_create_is_sent_folds_into_one_push() {
    let h = harness();

    let id = h.scheduler.create(item("new", "Eggs")).unwrap();
    h.scheduler
        .update::<InventoryItem>(&id, |f| f.name = "Brown eggs".into())
        .unwrap();
    h.scheduler.wait_idle().await;

    assert_eq!(h.api.pushed_names(), vec!["Brown eggs".to_string()]);
    assert!(!h.store.items().snapshot(&id).unwrap().is_pending());
}

#[tokio::test(start_paused = true)]
async fn delete_cancels_scheduled_update() {
    let h = harness();
    h.store.items().replace(item("i1", "start"));

    h.scheduler
        .update::<InventoryItem>("i1", |f| f.name = "A".into())
        .unwrap();
    h.scheduler.delete::<InventoryItem>("i1").unwrap();
    assert!(h.store.items().snapshot("i1").is_none());
    h.scheduler.wait_idle().await;

    let pushes = h.api.pushes.lock().clone();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].entities.is_empty());
    assert_eq!(pushes[0].deleted, vec!["i1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn failed_delete_restores_entity() {
    let h = harness();
    h.store.items().replace(item("i1", "keep me"));
    h.api.fail_pushes(&[403]);

    h.scheduler.delete::<InventoryItem>("i1").unwrap();
    h.scheduler.wait_idle().await;

    assert_eq!(name_of(&h, "i1").as_deref(), Some("keep me"));
    assert_eq!(h.notifier.notices.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn delete_before_create_is_sent_stays_local() {
    let h = harness();

    let id = h.scheduler.create(item("new", "Eggs")).unwrap();
    h.scheduler.delete::<InventoryItem>(&id).unwrap();
    h.scheduler.wait_idle().await;

    assert_eq!(h.api.push_count(), 0);
    assert!(h.store.items().snapshot(&id).is_none());
    assert!(h.notifier.notices.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_delete_after_confirmed_create_restores_entity() {
    let h = harness();
    h.api.set_push_delay(Duration::from_millis(600));

    let id = h.scheduler.create(item("new", "Eggs")).unwrap();
    sleep(Duration::from_millis(10)).await;
    h.scheduler.delete::<InventoryItem>(&id).unwrap();
    sleep(Duration::from_millis(690)).await;
    h.api.fail_pushes(&[500]);
    h.scheduler.wait_idle().await;

    let pushes = h.api.pushes.lock().clone();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[1].deleted, vec![id.clone()]);
    let restored = h.store.items().snapshot(&id).unwrap();
    assert_eq!(restored.fields.name, "Eggs");
    assert!(!restored.is_pending());
    assert_eq!(h.notifier.notices.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn delete_of_unknown_entity_fails() {
    let h = harness();
    let err = h.scheduler.delete::<InventoryItem>("nope").unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
    assert_eq!(h.api.push_count(), 0);
}
