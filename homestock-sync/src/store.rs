//! In-memory entity collections.
//!
//! The [`EntityStore`] owns the canonical copy of every synchronized entity,
//! one [`Collection`] per kind. Local edits land here synchronously before
//! any network call starts; server deltas are merged through
//! [`Collection::upsert_many`] and [`Collection::remove_many`], which never
//! touch an entity with an unconfirmed local edit.
//!
//! Locks are held only inside these synchronous methods, so every mutation
//! is atomic with respect to the async tasks that call them.

use crate::error::{SyncError, SyncResult};
use homestock_types::{
    Category, Entity, EntityFields, EntityKind, InventoryItem, Location, Settings, TodoItem,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Which local edit an entity is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Create,
    Update,
}

/// What happened to the entities in a [`StoreChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    /// Inserted or modified.
    Upsert,
    Remove,
    /// Only pending flags changed.
    Flags,
}

/// Change notification for observers (UI projections).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub kind: EntityKind,
    pub ids: Vec<String>,
    pub op: StoreOp,
}

/// Result of an optimistic edit.
#[derive(Debug, Clone)]
pub struct Patched<T> {
    pub before: Entity<T>,
    pub after: Entity<T>,
}

/// All entities of one kind, keyed by id.
pub struct Collection<T> {
    entities: RwLock<BTreeMap<String, Entity<T>>>,
    changes: broadcast::Sender<StoreChange>,
}

impl<T: EntityFields> Collection<T> {
    fn new(changes: broadcast::Sender<StoreChange>) -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    fn emit(&self, ids: Vec<String>, op: StoreOp) {
        if ids.is_empty() {
            return;
        }
        // No subscribers is fine.
        let _ = self.changes.send(StoreChange {
            kind: T::KIND,
            ids,
            op,
        });
    }

    /// A copy of the entity.
    pub fn snapshot(&self, id: &str) -> Option<Entity<T>> {
        self.entities.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.read().contains_key(id)
    }

    /// Every entity, ordered by id.
    pub fn all(&self) -> Vec<Entity<T>> {
        self.entities.read().values().cloned().collect()
    }

    /// Entities of one home, ordered by id.
    pub fn in_home(&self, home_id: &str) -> Vec<Entity<T>> {
        self.entities
            .read()
            .values()
            .filter(|e| e.home_id == home_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Ids carrying either pending flag.
    pub fn pending_ids(&self) -> HashSet<String> {
        self.entities
            .read()
            .values()
            .filter(|e| e.is_pending())
            .map(|e| e.id.clone())
            .collect()
    }

    /// Applies a local edit in place and flags it `pending_update`, in one
    /// step, so a concurrent delta can never land between the two. Returns
    /// the entity before and after.
    pub fn apply_optimistic(
        &self,
        id: &str,
        patch: impl FnOnce(&mut T),
    ) -> SyncResult<Patched<T>> {
        let patched = {
            let mut entities = self.entities.write();
            let entity = entities.get_mut(id).ok_or_else(|| SyncError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            })?;
            let before = entity.clone();
            patch(&mut entity.fields);
            entity.pending_update = true;
            Patched {
                before,
                after: entity.clone(),
            }
        };
        self.emit(vec![id.to_string()], StoreOp::Upsert);
        Ok(patched)
    }

    /// Sets a pending flag. Returns false if the entity is gone.
    pub fn mark_pending(&self, id: &str, kind: PendingKind) -> bool {
        let found = {
            let mut entities = self.entities.write();
            match entities.get_mut(id) {
                Some(entity) => {
                    match kind {
                        PendingKind::Create => entity.pending_create = true,
                        PendingKind::Update => entity.pending_update = true,
                    }
                    true
                }
                None => false,
            }
        };
        if found {
            self.emit(vec![id.to_string()], StoreOp::Flags);
        }
        found
    }

    /// Clears both pending flags. Returns false if the entity is gone.
    pub fn clear_pending(&self, id: &str) -> bool {
        let changed = {
            let mut entities = self.entities.write();
            match entities.get_mut(id) {
                Some(entity) if entity.is_pending() => {
                    entity.pending_create = false;
                    entity.pending_update = false;
                    Some(true)
                }
                Some(_) => Some(false),
                None => None,
            }
        };
        if changed == Some(true) {
            self.emit(vec![id.to_string()], StoreOp::Flags);
        }
        changed.is_some()
    }

    /// Inserts an entity created on this device, flagged `pending_create`.
    pub fn insert_local(&self, mut entity: Entity<T>) {
        entity.pending_create = true;
        let id = entity.id.clone();
        self.entities.write().insert(id.clone(), entity);
        self.emit(vec![id], StoreOp::Upsert);
    }

    /// Stores `entity` as given, flags included.
    pub fn replace(&self, entity: Entity<T>) {
        let id = entity.id.clone();
        self.entities.write().insert(id.clone(), entity);
        self.emit(vec![id], StoreOp::Upsert);
    }

    /// Merges a server-confirmed version, keeping the local pending flags.
    /// Returns false if the entity was removed locally in the meantime.
    pub fn reconcile(&self, confirmed: Entity<T>) -> bool {
        let id = confirmed.id.clone();
        let found = {
            let mut entities = self.entities.write();
            match entities.get_mut(&id) {
                Some(current) => {
                    let pending_create = current.pending_create;
                    let pending_update = current.pending_update;
                    *current = confirmed;
                    current.pending_create = pending_create;
                    current.pending_update = pending_update;
                    true
                }
                None => false,
            }
        };
        if found {
            self.emit(vec![id], StoreOp::Upsert);
        }
        found
    }

    /// Merges server-originated entities. Entities with a local edit in
    /// flight are skipped. Returns how many were stored.
    pub fn upsert_many(&self, incoming: Vec<Entity<T>>) -> usize {
        let mut applied = Vec::new();
        {
            let mut entities = self.entities.write();
            for mut entity in incoming {
                if entities.get(&entity.id).is_some_and(Entity::is_pending) {
                    continue;
                }
                entity.pending_create = false;
                entity.pending_update = false;
                applied.push(entity.id.clone());
                entities.insert(entity.id.clone(), entity);
            }
        }
        let count = applied.len();
        self.emit(applied, StoreOp::Upsert);
        count
    }

    /// Removes server-deleted ids. Entities with a local edit in flight are
    /// skipped. Returns how many were removed.
    pub fn remove_many(&self, ids: &[String]) -> usize {
        let mut removed = Vec::new();
        {
            let mut entities = self.entities.write();
            for id in ids {
                if entities.get(id).is_some_and(Entity::is_pending) {
                    continue;
                }
                if entities.remove(id).is_some() {
                    removed.push(id.clone());
                }
            }
        }
        let count = removed.len();
        self.emit(removed, StoreOp::Remove);
        count
    }

    /// Removes one entity unconditionally.
    pub fn remove(&self, id: &str) -> Option<Entity<T>> {
        let removed = self.entities.write().remove(id);
        if removed.is_some() {
            self.emit(vec![id.to_string()], StoreOp::Remove);
        }
        removed
    }

    /// Replaces the whole collection, e.g. when hydrating from the host's
    /// persistence. Flags are kept as given.
    pub fn set_all(&self, entities: Vec<Entity<T>>) {
        let ids: Vec<String> = entities.iter().map(|e| e.id.clone()).collect();
        {
            let mut map = self.entities.write();
            map.clear();
            map.extend(entities.into_iter().map(|e| (e.id.clone(), e)));
        }
        self.emit(ids, StoreOp::Upsert);
    }
}

/// Field sets that have a collection in the [`EntityStore`].
pub trait StoredFields: EntityFields {
    fn collection(store: &EntityStore) -> &Collection<Self>;
}

/// The canonical in-memory copy of every synchronized entity.
pub struct EntityStore {
    items: Collection<InventoryItem>,
    todos: Collection<TodoItem>,
    categories: Collection<Category>,
    locations: Collection<Location>,
    settings: Collection<Settings>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            items: Collection::new(changes.clone()),
            todos: Collection::new(changes.clone()),
            categories: Collection::new(changes.clone()),
            locations: Collection::new(changes.clone()),
            settings: Collection::new(changes.clone()),
            changes,
        }
    }

    /// Receives every mutation from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// The collection holding `T`.
    pub fn collection<T: StoredFields>(&self) -> &Collection<T> {
        T::collection(self)
    }

    pub fn items(&self) -> &Collection<InventoryItem> {
        &self.items
    }

    pub fn todos(&self) -> &Collection<TodoItem> {
        &self.todos
    }

    pub fn categories(&self) -> &Collection<Category> {
        &self.categories
    }

    pub fn locations(&self) -> &Collection<Location> {
        &self.locations
    }

    pub fn settings(&self) -> &Collection<Settings> {
        &self.settings
    }

    /// Pending ids of one kind.
    pub fn pending_ids(&self, kind: EntityKind) -> HashSet<String> {
        match kind {
            EntityKind::InventoryItem => self.items.pending_ids(),
            EntityKind::TodoItem => self.todos.pending_ids(),
            EntityKind::Category => self.categories.pending_ids(),
            EntityKind::Location => self.locations.pending_ids(),
            EntityKind::Settings => self.settings.pending_ids(),
        }
    }

    /// Number of entities of one kind.
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::InventoryItem => self.items.len(),
            EntityKind::TodoItem => self.todos.len(),
            EntityKind::Category => self.categories.len(),
            EntityKind::Location => self.locations.len(),
            EntityKind::Settings => self.settings.len(),
        }
    }
}

macro_rules! stored_fields {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl StoredFields for $ty {
                fn collection(store: &EntityStore) -> &Collection<Self> {
                    &store.$field
                }
            }
        )*
    };
}

stored_fields! {
    InventoryItem => items,
    TodoItem => todos,
    Category => categories,
    Location => locations,
    Settings => settings,
}
