//! Debounced, optimistic single-entity pushes.
//!
//! An edit is applied to the [`EntityStore`] immediately and a push task is
//! scheduled for the entity. Edits arriving within the debounce window cancel
//! the scheduled task and start a new one, so a burst of edits produces one
//! request carrying the final value. The snapshot taken before the first edit
//! of a burst is kept for the whole burst and is what a failure reverts to.
//! When an older request for the id is confirmed while a newer burst waits,
//! the confirmed value replaces that snapshot.
//!
//! Each (kind, id) has at most one live slot in the [`InFlightRegistry`].
//! Every new edit bumps the slot's generation; only the task of the current
//! generation may clear the pending flag or revert. A per-id send lock,
//! inherited across generations, keeps at most one request per id on the
//! wire.
//!
//! When a response arrives the task compares the stored entity with what it
//! sent. A response for a value that has since been edited again is
//! discarded, success or failure.

use crate::api::SyncApi;
use crate::config::SchedulerConfig;
use crate::error::{SyncError, SyncResult};
use crate::hooks::{Notice, Notifier};
use crate::protocol::{PushRequest, PushResponse};
use crate::store::{EntityStore, StoredFields};
use homestock_types::{Entity, EntityKind};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pre-burst snapshot, an `Option<Entity<T>>` behind `Any`. `None` means the
/// entity did not exist before the burst.
type Previous = Arc<dyn Any + Send + Sync>;

type SlotKey = (EntityKind, String);

struct Slot {
    generation: u64,
    cancel: CancellationToken,
    flush: CancellationToken,
    previous: Previous,
    send_lock: Arc<tokio::sync::Mutex<()>>,
}

/// What a task needs from its slot.
#[derive(Clone)]
pub(crate) struct Ticket {
    generation: u64,
    cancel: CancellationToken,
    flush: CancellationToken,
    send_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Live push tasks, one slot per (kind, id).
#[derive(Default)]
pub struct InFlightRegistry {
    slots: Mutex<HashMap<SlotKey, Slot>>,
    next_generation: AtomicU64,
    idle: Notify,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of `kind` with a scheduled or in-flight push.
    pub fn ids(&self, kind: EntityKind) -> HashSet<String> {
        self.slots
            .lock()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.slots.lock().contains_key(&(kind, id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Runs `mutate` and opens a new generation for the id, both under the
    /// registry lock. An existing slot is cancelled and its pre-burst
    /// snapshot and send lock carry over; otherwise the snapshot returned by
    /// `mutate` starts the burst.
    pub(crate) fn begin(
        &self,
        kind: EntityKind,
        id: &str,
        mutate: impl FnOnce() -> SyncResult<Previous>,
    ) -> SyncResult<Ticket> {
        let mut slots = self.slots.lock();
        let candidate = mutate()?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;

        let key = (kind, id.to_string());
        let (previous, send_lock) = match slots.remove(&key) {
            Some(old) => {
                old.cancel.cancel();
                (old.previous, old.send_lock)
            }
            None => (candidate, Arc::new(tokio::sync::Mutex::new(()))),
        };

        let slot = Slot {
            generation,
            cancel: CancellationToken::new(),
            flush: CancellationToken::new(),
            previous,
            send_lock,
        };
        let ticket = Ticket {
            generation,
            cancel: slot.cancel.clone(),
            flush: slot.flush.clone(),
            send_lock: slot.send_lock.clone(),
        };
        slots.insert(key, slot);
        Ok(ticket)
    }

    /// Pre-burst snapshot of the slot, if `generation` is still current.
    pub(crate) fn previous(&self, kind: EntityKind, id: &str, generation: u64) -> Option<Previous> {
        self.slots
            .lock()
            .get(&(kind, id.to_string()))
            .filter(|slot| slot.generation == generation)
            .map(|slot| slot.previous.clone())
    }

    /// Closes the slot if `generation` is still the current one, then runs
    /// `f` under the registry lock with the pre-burst snapshot (`None` when
    /// a newer generation has taken over). `f` must not call back into the
    /// registry.
    ///
    /// `settled` is what the server now holds after this generation's
    /// request. If a newer generation owns the slot, it becomes that
    /// burst's snapshot.
    pub(crate) fn finish<R>(
        &self,
        kind: EntityKind,
        id: &str,
        generation: u64,
        settled: Option<Previous>,
        f: impl FnOnce(Option<Previous>) -> R,
    ) -> R {
        let mut slots = self.slots.lock();
        let key = (kind, id.to_string());
        let previous = match slots.get(&key).map(|slot| slot.generation == generation) {
            Some(true) => slots.remove(&key).map(|slot| slot.previous),
            Some(false) => {
                if let (Some(settled), Some(newer)) = (settled, slots.get_mut(&key)) {
                    newer.previous = settled;
                }
                None
            }
            None => None,
        };
        let result = f(previous);
        if slots.is_empty() {
            self.idle.notify_waiters();
        }
        result
    }

    /// Ends the debounce wait of every scheduled task.
    pub fn flush(&self) {
        for slot in self.slots.lock().values() {
            slot.flush.cancel();
        }
    }

    /// Resolves once no slot is open.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PushOp {
    Create,
    Update,
    Delete { home_id: String },
}

struct SchedulerInner {
    store: Arc<EntityStore>,
    api: Arc<dyn SyncApi>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    in_flight: InFlightRegistry,
    runtime: Handle,
    last_error: RwLock<Option<String>>,
}

/// Schedules optimistic creates, updates and deletes.
#[derive(Clone)]
pub struct UpdateScheduler {
    inner: Arc<SchedulerInner>,
}

impl UpdateScheduler {
    /// Creates a scheduler whose tasks run on the current tokio runtime.
    /// Edits may then be submitted from any thread.
    pub fn new(
        store: Arc<EntityStore>,
        api: Arc<dyn SyncApi>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> SyncResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SyncError::Config(format!("no tokio runtime: {e}")))?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                store,
                api,
                notifier,
                config,
                in_flight: InFlightRegistry::new(),
                runtime,
                last_error: RwLock::new(None),
            }),
        })
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.inner.store
    }

    /// Applies `patch` to the entity now and pushes the result once edits
    /// to it have been quiet for the debounce window.
    pub fn update<T: StoredFields>(&self, id: &str, patch: impl FnOnce(&mut T)) -> SyncResult<()> {
        let collection = T::collection(&self.inner.store);
        let ticket = self.inner.in_flight.begin(T::KIND, id, || {
            let patched = collection.apply_optimistic(id, patch)?;
            Ok(Arc::new(Some(patched.before)) as Previous)
        })?;
        debug!("Scheduled {} {} (generation {})", T::KIND, id, ticket.generation);
        self.spawn::<T>(id.to_string(), ticket, PushOp::Update);
        Ok(())
    }

    /// Inserts a new entity flagged `pending_create` and pushes it at once.
    /// Returns its id.
    pub fn create<T: StoredFields>(&self, entity: Entity<T>) -> SyncResult<String> {
        let id = entity.id.clone();
        let collection = T::collection(&self.inner.store);
        let ticket = self.inner.in_flight.begin(T::KIND, &id, || {
            collection.insert_local(entity);
            Ok(Arc::new(None::<Entity<T>>) as Previous)
        })?;
        debug!("Creating {} {}", T::KIND, id);
        self.spawn::<T>(id.clone(), ticket, PushOp::Create);
        Ok(id)
    }

    /// Removes the entity now, cancels any scheduled update for it and
    /// pushes the deletion at once.
    pub fn delete<T: StoredFields>(&self, id: &str) -> SyncResult<()> {
        let collection = T::collection(&self.inner.store);
        let mut home_id = String::new();
        let ticket = self.inner.in_flight.begin(T::KIND, id, || {
            let removed = collection.remove(id).ok_or_else(|| SyncError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            })?;
            home_id = removed.home_id.clone();
            Ok(Arc::new(Some(removed)) as Previous)
        })?;
        debug!("Deleting {} {}", T::KIND, id);
        self.spawn::<T>(id.to_string(), ticket, PushOp::Delete { home_id });
        Ok(())
    }

    /// Sends every scheduled update now instead of after its debounce window.
    pub fn flush(&self) {
        self.inner.in_flight.flush();
    }

    /// Ids of `kind` with a scheduled or in-flight push.
    pub fn in_flight_ids(&self, kind: EntityKind) -> HashSet<String> {
        self.inner.in_flight.ids(kind)
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.inner.in_flight
    }

    /// Resolves once every scheduled push has concluded.
    pub async fn wait_idle(&self) {
        self.inner.in_flight.wait_idle().await;
    }

    /// Message of the most recent failed push.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.read().clone()
    }

    fn spawn<T: StoredFields>(&self, id: String, ticket: Ticket, op: PushOp) {
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            inner.run::<T>(id, ticket, op).await;
        });
    }
}

impl SchedulerInner {
    async fn run<T: StoredFields>(&self, id: String, ticket: Ticket, op: PushOp) {
        if op == PushOp::Update {
            tokio::select! {
                biased;
                _ = ticket.cancel.cancelled() => return,
                _ = ticket.flush.cancelled() => {}
                _ = tokio::time::sleep(self.config.debounce) => {}
            }
        }

        // Wait for an older request for this id to come back.
        let _send_guard = tokio::select! {
            biased;
            _ = ticket.cancel.cancelled() => return,
            guard = ticket.send_lock.clone().lock_owned() => guard,
        };
        if ticket.cancel.is_cancelled() {
            return;
        }

        match op {
            PushOp::Delete { home_id } => self.send_delete::<T>(&id, home_id, &ticket).await,
            op => self.send_upsert::<T>(&id, &ticket, op).await,
        }
    }

    async fn send_upsert<T: StoredFields>(&self, id: &str, ticket: &Ticket, op: PushOp) {
        let collection = T::collection(&self.store);
        let Some(sent) = collection.snapshot(id) else {
            debug!("{} {} vanished before sending", T::KIND, id);
            self.in_flight.finish(T::KIND, id, ticket.generation, None, |_| ());
            return;
        };

        let result = match sent.to_json() {
            Ok(payload) => {
                let request = PushRequest::upsert(T::KIND, sent.home_id.clone(), vec![payload]);
                self.api.push(request).await
            }
            Err(e) => Err(e.into()),
        };

        let confirmed = result
            .as_ref()
            .ok()
            .map(|response| confirmed_entity::<T>(response, id));
        let settled = confirmed.as_ref().map(|confirmed| {
            let mut settled = confirmed.clone().unwrap_or_else(|| sent.clone());
            settled.pending_create = false;
            settled.pending_update = false;
            Arc::new(Some(settled)) as Previous
        });

        let failure = self.in_flight.finish(T::KIND, id, ticket.generation, settled, |previous| {
            let still_current = collection
                .snapshot(id)
                .is_some_and(|current| current.same_content(&sent));
            match result {
                Ok(_) => {
                    if still_current {
                        if let Some(confirmed) = confirmed.flatten() {
                            collection.reconcile(confirmed);
                        }
                    } else {
                        debug!("Discarding stale response for {} {}", T::KIND, id);
                    }
                    if previous.is_some() {
                        collection.clear_pending(id);
                    }
                    None
                }
                Err(err) => {
                    let Some(previous) = previous else {
                        debug!("Ignoring failure of superseded push for {} {}", T::KIND, id);
                        return None;
                    };
                    if still_current {
                        self.revert::<T>(id, &previous);
                        let verb = if op == PushOp::Create { "create" } else { "save" };
                        Some(format!("Couldn't {verb} {}: {err}", T::KIND.label()))
                    } else {
                        warn!("Push for {} {} failed after a newer local change: {}", T::KIND, id, err);
                        collection.clear_pending(id);
                        None
                    }
                }
            }
        });
        if let Some(message) = failure {
            self.fail(T::KIND, id, message);
        }
    }

    async fn send_delete<T: StoredFields>(&self, id: &str, home_id: String, ticket: &Ticket) {
        let never_sent = self
            .in_flight
            .previous(T::KIND, id, ticket.generation)
            .is_some_and(|previous| {
                matches!(previous.downcast_ref::<Option<Entity<T>>>(), Some(None))
            });
        if never_sent {
            debug!("{} {} never reached the server, nothing to delete", T::KIND, id);
            self.in_flight.finish(T::KIND, id, ticket.generation, None, |_| ());
            return;
        }

        let request = PushRequest::delete(T::KIND, home_id, vec![id.to_string()]);
        let result = self.api.push(request).await;
        let collection = T::collection(&self.store);

        let failure = self.in_flight.finish(T::KIND, id, ticket.generation, None, |previous| {
            let Err(err) = result else {
                info!("Deleted {} {}", T::KIND, id);
                return None;
            };
            match previous {
                Some(previous) if !collection.contains(id) => {
                    self.revert::<T>(id, &previous);
                    Some(format!("Couldn't delete {}: {err}", T::KIND.label()))
                }
                _ => {
                    debug!("Ignoring failure of superseded delete for {} {}", T::KIND, id);
                    None
                }
            }
        });
        if let Some(message) = failure {
            self.fail(T::KIND, id, message);
        }
    }

    fn revert<T: StoredFields>(&self, id: &str, previous: &Previous) {
        let collection = T::collection(&self.store);
        match previous.downcast_ref::<Option<Entity<T>>>() {
            Some(Some(entity)) => collection.replace(entity.clone()),
            Some(None) => {
                collection.remove(id);
            }
            None => warn!("Snapshot for {} {} has the wrong type", T::KIND, id),
        }
    }

    fn fail(&self, kind: EntityKind, id: &str, message: String) {
        warn!("{}", message);
        *self.last_error.write() = Some(message.clone());
        self.notifier.notify(Notice::entity_error(kind, id, message));
    }
}

/// The server's copy of `id` from a push confirmation.
fn confirmed_entity<T: StoredFields>(response: &PushResponse, id: &str) -> Option<Entity<T>> {
    let raw = response
        .entities
        .iter()
        .find(|e| e.get("id").and_then(Value::as_str) == Some(id))?;
    match Entity::<T>::from_json(raw.clone()) {
        Ok(entity) => Some(entity),
        Err(e) => {
            warn!("Unreadable confirmation for {} {}: {}", T::KIND, id, e);
            None
        }
    }
}
