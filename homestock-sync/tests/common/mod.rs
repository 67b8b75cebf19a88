#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use homestock_sync::protocol::{
    BatchRequest, BatchResponse, EntitySyncStatus, PullRequest, PullResponse, PushRequest,
    PushResponse,
};
use homestock_sync::{
    EntityStore, ErrorDetails, ErrorReporter, Notice, Notifier, SchedulerConfig, SyncApi,
    SyncError, SyncResult, UpdateScheduler,
};
use homestock_types::{Entity, EntityKind, InventoryItem, SyncDelta};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

pub const HOME: &str = "home-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn server_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn item(id: &str, name: &str) -> Entity<InventoryItem> {
    Entity::new(
        id,
        HOME,
        InventoryItem {
            name: name.to_string(),
            quantity: 1.0,
            ..Default::default()
        },
    )
}

pub fn item_json(id: &str, name: &str) -> Value {
    item(id, name).to_json().unwrap()
}

/// In-memory stand-in for the HomeStock API.
///
/// Pushes succeed and echo their entities with a server timestamp unless a
/// failure status was scripted. Pulls return whatever delta was staged for
/// the (home, kind) pair, or nothing.
#[derive(Default)]
pub struct MockApi {
    pub pushes: Mutex<Vec<PushRequest>>,
    pub pulls: Mutex<Vec<PullRequest>>,
    pub batches: Mutex<Vec<BatchRequest>>,
    push_failures: Mutex<VecDeque<u16>>,
    push_delay: Mutex<Duration>,
    deltas: Mutex<HashMap<(String, EntityKind), PullResponse>>,
    failing_pulls: Mutex<HashSet<(String, EntityKind)>>,
    active: Mutex<HashMap<String, usize>>,
    max_concurrent: Mutex<usize>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next pushes fail with these statuses, in order.
    pub fn fail_pushes(&self, statuses: &[u16]) {
        self.push_failures.lock().extend(statuses.iter().copied());
    }

    /// Simulated network latency of every push.
    pub fn set_push_delay(&self, delay: Duration) {
        *self.push_delay.lock() = delay;
    }

    pub fn stage_delta(
        &self,
        home_id: &str,
        kind: EntityKind,
        delta: SyncDelta<Value>,
        server_time: Option<DateTime<Utc>>,
    ) {
        self.deltas.lock().insert(
            (home_id.to_string(), kind),
            PullResponse { delta, server_time },
        );
    }

    pub fn fail_pulls(&self, home_id: &str, kind: EntityKind) {
        self.failing_pulls.lock().insert((home_id.to_string(), kind));
    }

    pub fn heal_pulls(&self) {
        self.failing_pulls.lock().clear();
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.lock().len()
    }

    /// Names carried by every push, in order.
    pub fn pushed_names(&self) -> Vec<String> {
        self.pushes
            .lock()
            .iter()
            .flat_map(|p| p.entities.iter())
            .filter_map(|e| e.get("name").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Highest number of simultaneous pushes seen for any single id.
    pub fn max_concurrent_per_id(&self) -> usize {
        *self.max_concurrent.lock()
    }

    fn response_for(&self, home_id: &str, kind: EntityKind) -> SyncResult<PullResponse> {
        let key = (home_id.to_string(), kind);
        if self.failing_pulls.lock().contains(&key) {
            return Err(SyncError::from_status(500, "scripted pull failure"));
        }
        Ok(self.deltas.lock().get(&key).cloned().unwrap_or_default())
    }
}

fn push_ids(request: &PushRequest) -> Vec<String> {
    request
        .entities
        .iter()
        .filter_map(|e| e.get("id").and_then(Value::as_str).map(str::to_string))
        .chain(request.deleted.iter().cloned())
        .collect()
}

fn confirm(entities: &[Value]) -> Vec<Value> {
    entities
        .iter()
        .cloned()
        .map(|mut e| {
            e["updatedAt"] = Value::String(server_time().to_rfc3339());
            e
        })
        .collect()
}

#[async_trait]
impl SyncApi for MockApi {
    async fn pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
        let home_id = request.home_id.clone().unwrap_or_default();
        let kind = request.entity_type;
        self.pulls.lock().push(request);
        self.response_for(&home_id, kind)
    }

    async fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        let ids = push_ids(&request);
        {
            let mut active = self.active.lock();
            let mut max = self.max_concurrent.lock();
            for id in &ids {
                let count = active.entry(id.clone()).or_default();
                *count += 1;
                *max = (*max).max(*count);
            }
        }
        self.pushes.lock().push(request.clone());

        let delay = *self.push_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut active = self.active.lock();
            for id in &ids {
                if let Some(count) = active.get_mut(id) {
                    *count -= 1;
                }
            }
        }

        if let Some(status) = self.push_failures.lock().pop_front() {
            return Err(SyncError::from_status(status, "scripted push failure"));
        }
        Ok(PushResponse {
            entities: confirm(&request.entities),
        })
    }

    async fn batch(&self, request: BatchRequest) -> SyncResult<BatchResponse> {
        let home_id = request.home_id.clone();
        let kind = request.entity_type;
        let entities = confirm(&request.entities);
        self.batches.lock().push(request);
        let pulled = self.response_for(&home_id, kind)?;
        Ok(BatchResponse {
            delta: pulled.delta,
            entities,
            server_time: pulled.server_time,
        })
    }

    async fn status(&self) -> SyncResult<Vec<EntitySyncStatus>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<ErrorDetails>>,
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, details: &ErrorDetails) {
        self.reports.lock().push(details.clone());
    }
}

pub struct Harness {
    pub store: Arc<EntityStore>,
    pub api: Arc<MockApi>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: UpdateScheduler,
}

/// Store, mock server and a scheduler with the default 400 ms debounce.
/// Must be called inside a tokio runtime.
pub fn harness() -> Harness {
    let store = Arc::new(EntityStore::new());
    let api = MockApi::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = UpdateScheduler::new(
        store.clone(),
        api.clone(),
        notifier.clone(),
        SchedulerConfig::default(),
    )
    .unwrap();
    Harness {
        store,
        api,
        notifier,
        scheduler,
    }
}
