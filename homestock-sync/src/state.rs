//! Persisted sync bookkeeping.
//!
//! The engine needs two things to survive restarts: whether the user has sync
//! turned on, and the incremental-pull cursor per (home, kind). The host
//! owns the storage; the engine talks to it through [`SyncStateStore`].

use chrono::{DateTime, Utc};
use homestock_types::EntityKind;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Key-value storage for sync bookkeeping.
pub trait SyncStateStore: Send + Sync {
    fn sync_enabled(&self) -> bool;

    fn set_sync_enabled(&self, enabled: bool);

    /// Server time of the last applied pull for one kind in one home.
    fn last_sync(&self, home_id: &str, kind: EntityKind) -> Option<DateTime<Utc>>;

    fn set_last_sync(&self, home_id: &str, kind: EntityKind, at: DateTime<Utc>);

    /// Completion time of the last full sync pass.
    fn last_full_sync(&self) -> Option<DateTime<Utc>>;

    fn set_last_full_sync(&self, at: DateTime<Utc>);
}

#[derive(Debug, Default)]
struct Inner {
    disabled: bool,
    cursors: HashMap<(String, EntityKind), DateTime<Utc>>,
    last_full_sync: Option<DateTime<Utc>>,
}

/// In-memory [`SyncStateStore`]. Sync starts enabled.
#[derive(Debug, Default)]
pub struct MemorySyncStateStore {
    inner: RwLock<Inner>,
}

impl MemorySyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every cursor, forcing full pulls.
    pub fn reset_cursors(&self) {
        self.inner.write().cursors.clear();
    }
}

impl SyncStateStore for MemorySyncStateStore {
    fn sync_enabled(&self) -> bool {
        !self.inner.read().disabled
    }

    fn set_sync_enabled(&self, enabled: bool) {
        self.inner.write().disabled = !enabled;
    }

    fn last_sync(&self, home_id: &str, kind: EntityKind) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .cursors
            .get(&(home_id.to_string(), kind))
            .copied()
    }

    fn set_last_sync(&self, home_id: &str, kind: EntityKind, at: DateTime<Utc>) {
        self.inner
            .write()
            .cursors
            .insert((home_id.to_string(), kind), at);
    }

    fn last_full_sync(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_full_sync
    }

    fn set_last_full_sync(&self, at: DateTime<Utc>) {
        self.inner.write().last_full_sync = Some(at);
    }
}
