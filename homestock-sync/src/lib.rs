//! Offline-first sync engine for HomeStock.
//!
//! Keeps a locally mutable copy of the household's inventory, todo list,
//! categories, locations and settings consistent with the HomeStock API
//! while the user keeps editing, online or not.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Client**: HTTP calls with failure classification, jittered
//!   exponential backoff and terminal-failure reports
//! - **Store**: observable in-memory collections with pending flags
//! - **Scheduler**: debounced optimistic pushes, one request per id at a
//!   time, stale responses discarded, failures reverted
//! - **Coordinator**: pulls deltas per home and kind and merges them,
//!   skipping ids with local edits in flight
//! - **Triggers**: periodic, change-debounced and explicit sync requests
//!
//! ## Edit flow
//!
//! 1. The UI calls [`UpdateScheduler::update`]; the store changes at once
//! 2. Edits to the same entity within the debounce window are coalesced
//! 3. The final value is pushed; the response is merged only if the entity
//!    was not edited again meanwhile
//! 4. On failure the entity reverts to its value before the burst and the
//!    [`Notifier`] is told
//!
//! # Example
//!
//! ```no_run
//! use homestock_sync::{
//!     ApiClient, ClientConfig, ClientHooks, EntityStore, MemorySyncStateStore, StaticToken,
//!     SyncCoordinator,
//! };
//! use homestock_types::DeviceId;
//! use std::sync::Arc;
//!
//! # async fn run() -> homestock_sync::SyncResult<()> {
//! let auth = Arc::new(StaticToken::new("token"));
//! let client = ApiClient::new(
//!     ClientConfig::new("https://api.homestock.app"),
//!     ClientHooks::new(auth),
//! )?;
//! let coordinator = SyncCoordinator::new(
//!     Arc::new(client),
//!     Arc::new(EntityStore::new()),
//!     Arc::new(MemorySyncStateStore::new()),
//!     DeviceId::new(),
//! );
//! coordinator.set_active_home("home-1");
//! let report = coordinator.sync_all().await?;
//! println!("{} changes applied", report.applied_total());
//! # Ok(())
//! # }
//! ```

mod api;
mod client;
mod config;
mod coordinator;
mod error;
mod hooks;
pub mod protocol;
mod registry;
mod scheduler;
mod state;
mod store;
mod triggers;

pub use api::SyncApi;
pub use client::{ApiClient, ErrorDetails, Method, RetryAttempt, RetryPolicy, Traced};
pub use config::{
    ClientConfig, EngineConfig, SchedulerConfig, TriggerConfig, CHANGE_QUIET_PERIOD, DEBOUNCE_MS,
    PERIODIC_SYNC_INTERVAL,
};
pub use coordinator::{KindReport, SyncCoordinator, SyncEvent, SyncFailure, SyncReport};
pub use error::{SyncError, SyncResult};
pub use hooks::{
    AccessDeniedHandler, AuthProvider, ClientHooks, ErrorReporter, Notice, NoticeLevel, Notifier,
    StaticToken, TracingHooks,
};
pub use registry::{apply_delta, Applied, EntitySync, SyncRegistry, TypedSync};
pub use scheduler::{InFlightRegistry, UpdateScheduler};
pub use state::{MemorySyncStateStore, SyncStateStore};
pub use store::{Collection, EntityStore, Patched, PendingKind, StoreChange, StoreOp, StoredFields};
pub use triggers::{SyncTriggers, TriggerStatus};
