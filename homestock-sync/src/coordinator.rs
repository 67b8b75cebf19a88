//! Delta sync coordinator: pulls server changes and merges them locally.
//!
//! A sync pass walks every home scope and, within each, every entry of the
//! [`SyncRegistry`] in order. For the active home the pulled delta is
//! filtered against ids with unresolved local edits and then applied:
//! created, then updated, then deleted. Other homes are only pulled for
//! change counts. Failures are contained to one (home, kind) iteration.

use crate::api::SyncApi;
use crate::config::duration_ms;
use crate::error::{SyncError, SyncResult};
use crate::registry::{apply_delta, Applied, EntitySync, SyncRegistry};
use crate::scheduler::UpdateScheduler;
use crate::state::SyncStateStore;
use crate::store::EntityStore;
use chrono::{DateTime, Utc};
use homestock_types::{DeviceId, EntityKind};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Outcome of one kind in the active home.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindReport {
    pub kind: EntityKind,
    pub applied: Applied,
    /// Pending entities pushed through the batch endpoint and confirmed.
    pub pushed: usize,
    /// Changes dropped because the id had a local edit in flight.
    pub skipped_pending: usize,
}

/// A (home, kind) iteration that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub home_id: String,
    pub kind: EntityKind,
    pub message: String,
}

/// Summary of one sync pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Sync is disabled; nothing was sent.
    pub skipped: bool,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Per-kind results for the active home, in registry order.
    pub kinds: Vec<KindReport>,
    /// Pending remote change counts of the other homes.
    pub remote_changes: Vec<(String, EntityKind, usize)>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            skipped: false,
            started_at,
            duration: Duration::ZERO,
            kinds: Vec::new(),
            remote_changes: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::new(Utc::now())
        }
    }

    /// Entities created, updated or deleted locally by this pass.
    pub fn applied_total(&self) -> usize {
        self.kinds.iter().map(|k| k.applied.total()).sum()
    }

    pub fn pushed_total(&self) -> usize {
        self.kinds.iter().map(|k| k.pushed).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Report of one kind, if it was synced.
    pub fn kind(&self, kind: EntityKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}

/// Progress notifications of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started { kinds: Vec<EntityKind> },
    /// The active home's data changed; projections should reload these kinds.
    Refresh { kinds: Vec<EntityKind> },
    /// A non-active home has changes waiting.
    RemoteChanges {
        home_id: String,
        kind: EntityKind,
        count: usize,
    },
    Error {
        home_id: String,
        kind: EntityKind,
        message: String,
    },
    /// The pass could not start; no (home, kind) iteration ran.
    Aborted { message: String },
    Completed(SyncReport),
}

#[derive(Debug, Default)]
struct Homes {
    active: Option<String>,
    others: Vec<String>,
}

/// Runs sync passes over every registered kind.
pub struct SyncCoordinator {
    api: Arc<dyn SyncApi>,
    store: Arc<EntityStore>,
    state: Arc<dyn SyncStateStore>,
    registry: SyncRegistry,
    scheduler: Option<UpdateScheduler>,
    device_id: DeviceId,
    homes: RwLock<Homes>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    /// Creates a coordinator over the standard registry.
    pub fn new(
        api: Arc<dyn SyncApi>,
        store: Arc<EntityStore>,
        state: Arc<dyn SyncStateStore>,
        device_id: DeviceId,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            store,
            state,
            registry: SyncRegistry::standard(),
            scheduler: None,
            device_id,
            homes: RwLock::new(Homes::default()),
            events,
        }
    }

    /// Replaces the registry.
    #[must_use]
    pub fn with_registry(mut self, registry: SyncRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Treats ids owned by `scheduler` as pending, and leaves their batch
    /// push to it.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: UpdateScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn registry(&self) -> &SyncRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn state(&self) -> &Arc<dyn SyncStateStore> {
        &self.state
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Selects the home whose deltas are applied locally.
    pub fn set_active_home(&self, home_id: impl Into<String>) {
        self.homes.write().active = Some(home_id.into());
    }

    pub fn active_home(&self) -> Option<String> {
        self.homes.read().active.clone()
    }

    /// Sets the other homes of the account, pulled for change counts.
    pub fn set_other_homes(&self, home_ids: Vec<String>) {
        self.homes.write().others = home_ids;
    }

    /// Receives coordinator events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Active home first, then the others without duplicates.
    fn scopes(&self) -> SyncResult<(String, Vec<String>)> {
        let homes = self.homes.read();
        let active = homes
            .active
            .clone()
            .ok_or_else(|| SyncError::Config("no active home selected".to_string()))?;
        let mut seen = HashSet::from([active.clone()]);
        let others = homes
            .others
            .iter()
            .filter(|h| seen.insert((*h).clone()))
            .cloned()
            .collect();
        Ok((active, others))
    }

    /// Syncs every registered kind.
    pub async fn sync_all(&self) -> SyncResult<SyncReport> {
        let entries: Vec<Arc<dyn EntitySync>> = self.registry.iter().cloned().collect();
        let report = self.run(entries).await?;
        if !report.skipped && report.is_success() {
            self.state.set_last_full_sync(Utc::now());
        }
        Ok(report)
    }

    /// Syncs one kind.
    pub async fn sync_one(&self, kind: EntityKind) -> SyncResult<SyncReport> {
        let entry = self
            .registry
            .get(kind)
            .cloned()
            .ok_or_else(|| SyncError::UnknownEntityType(kind.key().to_string()))?;
        self.run(vec![entry]).await
    }

    /// Syncs one kind given by its wire key, e.g. `"items"`.
    pub async fn sync_key(&self, key: &str) -> SyncResult<SyncReport> {
        let kind: EntityKind = key.parse()?;
        self.sync_one(kind).await
    }

    async fn run(&self, entries: Vec<Arc<dyn EntitySync>>) -> SyncResult<SyncReport> {
        if !self.state.sync_enabled() {
            debug!("Sync disabled, skipping");
            let report = SyncReport::skipped();
            self.emit(SyncEvent::Completed(report.clone()));
            return Ok(report);
        }

        let (active, others) = match self.scopes() {
            Ok(scopes) => scopes,
            Err(e) => {
                warn!("Sync aborted: {}", e);
                self.emit(SyncEvent::Aborted {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        let started = Instant::now();
        let mut report = SyncReport::new(Utc::now());
        let kinds: Vec<EntityKind> = entries.iter().map(|e| e.kind()).collect();
        info!("Starting sync of {} kinds for home {}", kinds.len(), active);
        self.emit(SyncEvent::Started {
            kinds: kinds.clone(),
        });

        let mut changed = Vec::new();
        for entry in &entries {
            let kind = entry.kind();
            match self.sync_active(entry.as_ref(), &active).await {
                Ok(kind_report) => {
                    if kind_report.applied.total() > 0 {
                        changed.push(kind);
                    }
                    report.kinds.push(kind_report);
                }
                Err(e) => self.record_failure(&mut report, &active, kind, e),
            }
        }

        for home in &others {
            for entry in &entries {
                let kind = entry.kind();
                match self.count_remote(entry.as_ref(), home).await {
                    Ok(0) => {}
                    Ok(count) => {
                        report.remote_changes.push((home.clone(), kind, count));
                        self.emit(SyncEvent::RemoteChanges {
                            home_id: home.clone(),
                            kind,
                            count,
                        });
                    }
                    Err(e) => self.record_failure(&mut report, home, kind, e),
                }
            }
        }

        if !changed.is_empty() {
            self.emit(SyncEvent::Refresh { kinds: changed });
        }

        report.duration = started.elapsed();
        info!(
            "Sync finished: {} applied, {} pushed, {} failures in {:?}",
            report.applied_total(),
            report.pushed_total(),
            report.failures.len(),
            report.duration
        );
        self.emit(SyncEvent::Completed(report.clone()));
        Ok(report)
    }

    fn record_failure(
        &self,
        report: &mut SyncReport,
        home_id: &str,
        kind: EntityKind,
        err: SyncError,
    ) {
        warn!("Sync of {} for home {} failed: {}", kind, home_id, err);
        let message = err.to_string();
        report.failures.push(SyncFailure {
            home_id: home_id.to_string(),
            kind,
            message: message.clone(),
        });
        self.emit(SyncEvent::Error {
            home_id: home_id.to_string(),
            kind,
            message,
        });
    }

    fn in_flight(&self, kind: EntityKind) -> HashSet<String> {
        self.scheduler
            .as_ref()
            .map(|s| s.in_flight_ids(kind))
            .unwrap_or_default()
    }

    async fn sync_active(&self, entry: &dyn EntitySync, home_id: &str) -> SyncResult<KindReport> {
        let kind = entry.kind();
        let since = self.state.last_sync(home_id, kind);
        let unsynced = entry.unsynced(&self.store, home_id, &self.in_flight(kind))?;

        let (delta, server_time, pushed) = if unsynced.is_empty() {
            let response = entry
                .pull(self.api.as_ref(), home_id, since, self.device_id)
                .await?;
            (response.delta, response.server_time, 0)
        } else {
            debug!("Batch-pushing {} pending {}", unsynced.len(), kind);
            let response = entry
                .batch(self.api.as_ref(), home_id, since, self.device_id, unsynced.clone())
                .await?;
            let pushed = entry.confirm(&self.store, &unsynced, response.entities)?;
            (response.delta, response.server_time, pushed)
        };
        delta.validate()?;

        let mut kind_report = KindReport {
            kind,
            applied: Applied::default(),
            pushed,
            skipped_pending: 0,
        };

        if !delta.is_trivial() {
            // Recomputed after the network wait: edits made meanwhile count.
            let mut pending = entry.pending_ids(&self.store);
            pending.extend(self.in_flight(kind));

            let listed = delta.change_count();
            let delta = delta.without_ids(&pending);
            kind_report.skipped_pending = listed - delta.change_count();
            if kind_report.skipped_pending > 0 {
                debug!("Skipped {} pending {} changes", kind_report.skipped_pending, kind);
            }
            kind_report.applied =
                apply_delta(entry, &self.store, delta.created, delta.updated, &delta.deleted)?;
        }

        // Skipped changes must come back on the next pull.
        match server_time {
            Some(_) if kind_report.skipped_pending > 0 => {
                debug!("Keeping {} cursor for home {} until pending edits settle", kind, home_id);
            }
            Some(server_time) => self.state.set_last_sync(home_id, kind, server_time),
            None => {}
        }
        Ok(kind_report)
    }

    async fn count_remote(&self, entry: &dyn EntitySync, home_id: &str) -> SyncResult<usize> {
        let since = self.state.last_sync(home_id, entry.kind());
        let response = entry
            .pull(self.api.as_ref(), home_id, since, self.device_id)
            .await?;
        response.delta.validate()?;
        Ok(if response.delta.is_trivial() {
            0
        } else {
            response.delta.change_count()
        })
    }
}
