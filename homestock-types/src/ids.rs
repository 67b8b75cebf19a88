//! Identifier types.
//!
//! Entity ids are opaque strings on the wire so that server-assigned ids of
//! any shape round-trip untouched. Ids minted on the device use UUID v7,
//! which embeds a timestamp for natural ordering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Mints a new entity id for a locally created entity.
#[must_use]
pub fn new_entity_id() -> String {
    Uuid::now_v7().to_string()
}

/// Unique identifier for this device, sent with every pull so the server can
/// exclude the device's own echoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// A fresh id for a newly installed device.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Reads a persisted device id back.
    pub fn parse(s: &str) -> crate::Result<Self> {
        s.parse()
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for DeviceId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Ok(Self(s.trim().parse()?))
    }
}
