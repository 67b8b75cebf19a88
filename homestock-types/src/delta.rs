//! Pull deltas.

use crate::{Entity, Error};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Anything that carries an entity id, typed or raw.
pub trait Identified {
    /// The entity id, if present.
    fn ident(&self) -> Option<&str>;
}

impl<T> Identified for Entity<T> {
    fn ident(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl Identified for serde_json::Value {
    fn ident(&self) -> Option<&str> {
        self.get("id").and_then(serde_json::Value::as_str)
    }
}

/// Result of one pull for one (entity kind, home) pair.
///
/// An id appears in at most one of `created`, `updated` and `deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDelta<E> {
    #[serde(default = "Vec::new")]
    pub created: Vec<E>,
    #[serde(default = "Vec::new")]
    pub updated: Vec<E>,
    #[serde(default)]
    pub deleted: Vec<String>,
    /// The server reports nothing changed since the cursor.
    #[serde(default)]
    pub unchanged: bool,
}

impl<E> Default for SyncDelta<E> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            unchanged: false,
        }
    }
}

impl<E> SyncDelta<E> {
    /// A delta saying nothing changed.
    pub fn unchanged() -> Self {
        Self {
            unchanged: true,
            ..Self::default()
        }
    }

    /// Total number of listed changes.
    pub fn change_count(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// True when applying the delta would change nothing.
    pub fn is_trivial(&self) -> bool {
        self.unchanged || self.change_count() == 0
    }

    /// Converts every listed entity, failing on the first error.
    pub fn try_map<U, Er>(
        self,
        mut f: impl FnMut(E) -> Result<U, Er>,
    ) -> Result<SyncDelta<U>, Er> {
        let created = self.created.into_iter().map(&mut f).collect::<Result<_, _>>()?;
        let updated = self.updated.into_iter().map(&mut f).collect::<Result<_, _>>()?;
        Ok(SyncDelta {
            created,
            updated,
            deleted: self.deleted,
            unchanged: self.unchanged,
        })
    }
}

impl<E: Identified> SyncDelta<E> {
    /// Checks the exclusivity invariant, reporting the first offending id.
    pub fn validate(&self) -> crate::Result<()> {
        let mut seen = HashSet::new();
        let ids = self
            .created
            .iter()
            .chain(self.updated.iter())
            .filter_map(Identified::ident)
            .chain(self.deleted.iter().map(String::as_str));
        for id in ids {
            if !seen.insert(id) {
                return Err(Error::OverlappingDelta { id: id.to_string() });
            }
        }
        Ok(())
    }

    /// True when no id appears twice across the three lists.
    pub fn is_exclusive(&self) -> bool {
        self.validate().is_ok()
    }

    /// Drops every change that touches one of `ids`.
    #[must_use]
    pub fn without_ids(self, ids: &HashSet<String>) -> Self {
        if ids.is_empty() {
            return self;
        }
        let keep = |e: &E| e.ident().is_none_or(|id| !ids.contains(id));
        Self {
            created: self.created.into_iter().filter(|e| keep(e)).collect(),
            updated: self.updated.into_iter().filter(|e| keep(e)).collect(),
            deleted: self.deleted.into_iter().filter(|id| !ids.contains(id)).collect(),
            unchanged: self.unchanged,
        }
    }
}
