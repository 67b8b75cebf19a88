//! Core type definitions for HomeStock sync.
//!
//! This crate defines the plain data shared by the sync engine and its hosts:
//! - Entity kinds and their stable wire keys
//! - The `Entity<T>` record wrapper (id, home scope, server timestamp,
//!   client-only pending flags) and the five domain field structs
//! - `SyncDelta`, the created/updated/deleted result of one pull
//! - Device identifiers and entity id generation (UUID v7)
//!
//! Nothing here performs I/O.

mod delta;
mod entity;
mod ids;
mod kind;

pub use delta::{Identified, SyncDelta};
pub use entity::{
    Category, Entity, EntityFields, InventoryItem, Location, Settings, SortOrder, StockStatus,
    TodoItem,
};
pub use ids::{new_entity_id, DeviceId};
pub use kind::EntityKind;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("id {id} appears in more than one of created/updated/deleted")]
    OverlappingDelta { id: String },
}
