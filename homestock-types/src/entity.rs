//! Synchronized entities.
//!
//! Every synchronized record is an [`Entity<T>`]: the sync envelope (id, home
//! scope, server-confirmed timestamp, client-only pending flags) around a
//! domain field struct `T`. On the wire the envelope and the fields are one
//! flat camelCase JSON object; the pending flags never leave the device.

use crate::{new_entity_id, EntityKind};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Domain field set of one entity kind.
///
/// Equality on the field set is what the staleness check compares: two
/// snapshots with equal fields are the same edit as far as sync is concerned.
pub trait EntityFields:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The kind these fields belong to.
    const KIND: EntityKind;
}

/// A synchronized record scoped to one home.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity<T> {
    /// Stable id, assigned by the device for local creations.
    pub id: String,
    /// The home (account scope) this entity belongs to.
    pub home_id: String,
    /// Domain fields.
    #[serde(flatten)]
    pub fields: T,
    /// Server-confirmed modification time. `None` until the server has seen it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Created locally, creation not yet confirmed by the server.
    #[serde(skip)]
    pub pending_create: bool,
    /// Edited locally, edit not yet confirmed by the server.
    #[serde(skip)]
    pub pending_update: bool,
}

impl<T: EntityFields> Entity<T> {
    /// Wraps fields received from (or destined for) the server.
    pub fn new(id: impl Into<String>, home_id: impl Into<String>, fields: T) -> Self {
        Self {
            id: id.into(),
            home_id: home_id.into(),
            fields,
            updated_at: None,
            pending_create: false,
            pending_update: false,
        }
    }

    /// Creates a brand-new entity on this device with a freshly minted id.
    pub fn local(home_id: impl Into<String>, fields: T) -> Self {
        Self::new(new_entity_id(), home_id, fields)
    }

    /// Sets the server timestamp.
    #[must_use]
    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// The kind of this entity.
    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    /// True while a local create or edit is unconfirmed.
    pub fn is_pending(&self) -> bool {
        self.pending_create || self.pending_update
    }

    /// Compares everything a push would transmit: id, scope and every
    /// domain field. Pending flags and `updated_at` are ignored.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id && self.home_id == other.home_id && self.fields == other.fields
    }

    /// Serializes to the wire representation.
    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses the wire representation. Pending flags start cleared.
    pub fn from_json(value: serde_json::Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Stock level of an inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    #[default]
    InStock,
    Low,
    Out,
}

/// Something the household keeps in stock.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub name: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(default)]
    pub status: StockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl EntityFields for InventoryItem {
    const KIND: EntityKind = EntityKind::InventoryItem;
}

/// A shopping-list / todo entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    /// Inventory item this entry restocks, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default)]
    pub position: i32,
}

impl EntityFields for TodoItem {
    const KIND: EntityKind = EntityKind::TodoItem;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub position: i32,
}

impl EntityFields for Category {
    const KIND: EntityKind = EntityKind::Category;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub position: i32,
}

impl EntityFields for Location {
    const KIND: EntityKind = EntityKind::Location;
}

/// How lists are ordered in the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Name,
    Recent,
    Expiry,
}

/// Per-home preferences. A home has exactly one settings entity, whose id is
/// conventionally the home id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub currency: String,
    pub low_stock_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_location_id: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            low_stock_threshold: 1.0,
            default_location_id: None,
            sort_order: SortOrder::default(),
        }
    }
}

impl EntityFields for Settings {
    const KIND: EntityKind = EntityKind::Settings;
}
