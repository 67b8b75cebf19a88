use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of entity types that take part in sync.
///
/// The serialized form is the wire key the server uses in `entityType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "categories")]
    Category,
    #[serde(rename = "locations")]
    Location,
    #[serde(rename = "items")]
    InventoryItem,
    #[serde(rename = "todos")]
    TodoItem,
    #[serde(rename = "settings")]
    Settings,
}

impl EntityKind {
    /// All kinds, in dependency order: referenced kinds come before the
    /// kinds that reference them.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Category,
        EntityKind::Location,
        EntityKind::InventoryItem,
        EntityKind::TodoItem,
        EntityKind::Settings,
    ];

    /// Returns the wire key for this kind.
    pub const fn key(&self) -> &'static str {
        match self {
            EntityKind::Category => "categories",
            EntityKind::Location => "locations",
            EntityKind::InventoryItem => "items",
            EntityKind::TodoItem => "todos",
            EntityKind::Settings => "settings",
        }
    }

    /// Human-readable singular label, used in user-facing notices.
    pub const fn label(&self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::Location => "location",
            EntityKind::InventoryItem => "item",
            EntityKind::TodoItem => "todo",
            EntityKind::Settings => "settings",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.key() == s)
            .ok_or_else(|| crate::Error::UnknownEntityType(s.to_string()))
    }
}
