//! Per-kind sync operations.
//!
//! The coordinator never names entity kinds. It walks the [`SyncRegistry`],
//! and each [`EntitySync`] entry knows how to pull its kind, decode the raw
//! JSON the server sends, and merge it into the right store collection.

use crate::api::SyncApi;
use crate::error::SyncResult;
use crate::protocol::{BatchRequest, BatchResponse, PullRequest, PullResponse};
use crate::store::{EntityStore, StoredFields};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homestock_types::{
    Category, DeviceId, Entity, EntityKind, InventoryItem, Location, Settings, TodoItem,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// How many entities a delta application actually touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl Applied {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl std::ops::AddAssign for Applied {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.deleted += rhs.deleted;
    }
}

/// Sync operations of one entity kind.
#[async_trait]
pub trait EntitySync: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Fetches the delta for one home.
    async fn pull(
        &self,
        api: &dyn SyncApi,
        home_id: &str,
        since: Option<DateTime<Utc>>,
        device_id: DeviceId,
    ) -> SyncResult<PullResponse>;

    /// Pushes `entities` and fetches the delta in one call.
    async fn batch(
        &self,
        api: &dyn SyncApi,
        home_id: &str,
        since: Option<DateTime<Utc>>,
        device_id: DeviceId,
        entities: Vec<Value>,
    ) -> SyncResult<BatchResponse>;

    /// Merges server-created entities. Pending ids are skipped.
    fn apply_created(&self, store: &EntityStore, entities: Vec<Value>) -> SyncResult<usize>;

    /// Merges server-updated entities. Pending ids are skipped.
    fn apply_updated(&self, store: &EntityStore, entities: Vec<Value>) -> SyncResult<usize>;

    /// Removes server-deleted ids. Pending ids are skipped.
    fn apply_removed(&self, store: &EntityStore, ids: &[String]) -> usize;

    /// Pending ids of this kind according to the store flags.
    fn pending_ids(&self, store: &EntityStore) -> HashSet<String>;

    /// Wire form of the pending entities of `home_id` that are not in
    /// `exclude`.
    fn unsynced(
        &self,
        store: &EntityStore,
        home_id: &str,
        exclude: &HashSet<String>,
    ) -> SyncResult<Vec<Value>>;

    /// Merges the server's confirmation of `sent` and clears pending flags of
    /// entities that were not edited again meanwhile. Returns how many were
    /// confirmed.
    fn confirm(
        &self,
        store: &EntityStore,
        sent: &[Value],
        confirmed: Vec<Value>,
    ) -> SyncResult<usize>;
}

/// [`EntitySync`] for any stored field set.
pub struct TypedSync<T>(PhantomData<fn() -> T>);

impl<T> TypedSync<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypedSync<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn decode<T: StoredFields>(values: Vec<Value>) -> SyncResult<Vec<Entity<T>>> {
    values
        .into_iter()
        .map(|v| Entity::<T>::from_json(v).map_err(Into::into))
        .collect()
}

#[async_trait]
impl<T: StoredFields> EntitySync for TypedSync<T> {
    fn kind(&self) -> EntityKind {
        T::KIND
    }

    async fn pull(
        &self,
        api: &dyn SyncApi,
        home_id: &str,
        since: Option<DateTime<Utc>>,
        device_id: DeviceId,
    ) -> SyncResult<PullResponse> {
        api.pull(PullRequest {
            entity_type: T::KIND,
            since,
            home_id: Some(home_id.to_string()),
            device_id,
        })
        .await
    }

    async fn batch(
        &self,
        api: &dyn SyncApi,
        home_id: &str,
        since: Option<DateTime<Utc>>,
        device_id: DeviceId,
        entities: Vec<Value>,
    ) -> SyncResult<BatchResponse> {
        api.batch(BatchRequest {
            entity_type: T::KIND,
            home_id: home_id.to_string(),
            since,
            device_id,
            entities,
        })
        .await
    }

    fn apply_created(&self, store: &EntityStore, entities: Vec<Value>) -> SyncResult<usize> {
        Ok(T::collection(store).upsert_many(decode::<T>(entities)?))
    }

    fn apply_updated(&self, store: &EntityStore, entities: Vec<Value>) -> SyncResult<usize> {
        Ok(T::collection(store).upsert_many(decode::<T>(entities)?))
    }

    fn apply_removed(&self, store: &EntityStore, ids: &[String]) -> usize {
        T::collection(store).remove_many(ids)
    }

    fn pending_ids(&self, store: &EntityStore) -> HashSet<String> {
        T::collection(store).pending_ids()
    }

    fn unsynced(
        &self,
        store: &EntityStore,
        home_id: &str,
        exclude: &HashSet<String>,
    ) -> SyncResult<Vec<Value>> {
        T::collection(store)
            .in_home(home_id)
            .into_iter()
            .filter(|e| e.is_pending() && !exclude.contains(&e.id))
            .map(|e| e.to_json().map_err(Into::into))
            .collect()
    }

    fn confirm(
        &self,
        store: &EntityStore,
        sent: &[Value],
        confirmed: Vec<Value>,
    ) -> SyncResult<usize> {
        let collection = T::collection(store);
        let sent: HashMap<String, Entity<T>> = decode::<T>(sent.to_vec())?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        let mut count = 0;
        for entity in decode::<T>(confirmed)? {
            let Some(pushed) = sent.get(&entity.id) else {
                continue;
            };
            let still_current = collection
                .snapshot(&entity.id)
                .is_some_and(|current| current.same_content(pushed));
            if !still_current {
                debug!("{} {} changed during batch push, keeping local edit", T::KIND, entity.id);
                continue;
            }
            let id = entity.id.clone();
            collection.reconcile(entity);
            collection.clear_pending(&id);
            count += 1;
        }
        Ok(count)
    }
}

/// Applies a delta in order: created, then updated, then deleted.
pub fn apply_delta(
    entry: &dyn EntitySync,
    store: &EntityStore,
    created: Vec<Value>,
    updated: Vec<Value>,
    deleted: &[String],
) -> SyncResult<Applied> {
    let created = entry.apply_created(store, created)?;
    let updated = entry.apply_updated(store, updated)?;
    let deleted = entry.apply_removed(store, deleted);
    Ok(Applied {
        created,
        updated,
        deleted,
    })
}

/// Ordered set of sync entries, at most one per kind. Registration order is
/// sync order.
#[derive(Clone, Default)]
pub struct SyncRegistry {
    entries: Vec<Arc<dyn EntitySync>>,
}

impl SyncRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// All five kinds, referenced kinds first.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TypedSync::<Category>::new()));
        registry.register(Arc::new(TypedSync::<Location>::new()));
        registry.register(Arc::new(TypedSync::<InventoryItem>::new()));
        registry.register(Arc::new(TypedSync::<TodoItem>::new()));
        registry.register(Arc::new(TypedSync::<Settings>::new()));
        registry
    }

    /// Adds an entry. An existing entry for the same kind is replaced in
    /// place, keeping its position.
    pub fn register(&mut self, entry: Arc<dyn EntitySync>) {
        match self.entries.iter_mut().find(|e| e.kind() == entry.kind()) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, kind: EntityKind) -> Option<&Arc<dyn EntitySync>> {
        self.entries.iter().find(|e| e.kind() == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn EntitySync>> {
        self.entries.iter()
    }

    pub fn kinds(&self) -> Vec<EntityKind> {
        self.entries.iter().map(|e| e.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SyncRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_is_in_dependency_order() {
        let registry = SyncRegistry::standard();
        assert_eq!(registry.kinds(), EntityKind::ALL.to_vec());
    }

    #[test]
    fn register_replaces_in_place() {
        let mut registry = SyncRegistry::standard();
        registry.register(Arc::new(TypedSync::<Location>::new()));
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.kinds()[1], EntityKind::Location);
    }
}
