//! Wire messages of the HomeStock REST API.
//!
//! Sync endpoints carry entities as raw JSON objects; the
//! [`SyncRegistry`](crate::SyncRegistry) decodes them into typed entities per
//! kind. All bodies are camelCase.

use chrono::{DateTime, Utc};
use homestock_types::{DeviceId, EntityKind, SyncDelta};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path of the login endpoint.
pub const LOGIN_PATH: &str = "/auth/login";
/// Path of the signup endpoint.
pub const SIGNUP_PATH: &str = "/auth/signup";
/// Path of the current-user endpoint.
pub const ME_PATH: &str = "/auth/me";
/// Path of the per-kind status endpoint.
pub const STATUS_PATH: &str = "/sync/entities/status";
/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/sync/entities/pull";
/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/sync/entities/push";
/// Path of the combined push-and-pull endpoint.
pub const BATCH_PATH: &str = "/sync/entities/batch";

/// A delta whose entities are still undecoded JSON.
pub type RawDelta = SyncDelta<Value>;

/// Body of `POST /sync/entities/pull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub entity_type: EntityKind,
    /// Only return changes after this instant. `None` pulls everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_id: Option<String>,
    pub device_id: DeviceId,
}

/// Response of the pull endpoint: a delta plus the server clock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(flatten)]
    pub delta: RawDelta,
    /// Cursor for the next incremental pull.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<DateTime<Utc>>,
}

/// Body of `POST /sync/entities/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub entity_type: EntityKind,
    pub home_id: String,
    #[serde(default)]
    pub entities: Vec<Value>,
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl PushRequest {
    /// Pushes created or updated entities.
    pub fn upsert(entity_type: EntityKind, home_id: impl Into<String>, entities: Vec<Value>) -> Self {
        Self {
            entity_type,
            home_id: home_id.into(),
            entities,
            deleted: Vec::new(),
        }
    }

    /// Pushes deletions.
    pub fn delete(entity_type: EntityKind, home_id: impl Into<String>, ids: Vec<String>) -> Self {
        Self {
            entity_type,
            home_id: home_id.into(),
            entities: Vec::new(),
            deleted: ids,
        }
    }
}

/// Server confirmation of a push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Server-confirmed versions of the pushed entities.
    #[serde(default)]
    pub entities: Vec<Value>,
}

/// Body of `POST /sync/entities/batch`: push local changes and pull the
/// delta in one round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub entity_type: EntityKind,
    pub home_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    pub device_id: DeviceId,
    #[serde(default)]
    pub entities: Vec<Value>,
}

/// Response of the batch endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    #[serde(default)]
    pub delta: RawDelta,
    /// Server-confirmed versions of the pushed entities.
    #[serde(default)]
    pub entities: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<DateTime<Utc>>,
}

/// Credentials for login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Registration payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Login or signup result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// The signed-in account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Homes the account belongs to.
    #[serde(default)]
    pub home_ids: Vec<String>,
    #[serde(default)]
    pub active_home_id: Option<String>,
}

/// Server-side view of one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySyncStatus {
    /// Wire key of the kind. Kept as a string so unknown kinds survive.
    pub entity_type: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Response of the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(default)]
    pub entities: Vec<EntitySyncStatus>,
}

/// JSON error body. `message` is a string, or a list of strings for
/// validation failures.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Value,
}

impl ErrorBody {
    pub(crate) fn text(&self) -> Option<String> {
        match &self.message {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Array(items) => {
                let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                (!parts.is_empty()).then(|| parts.join("; "))
            }
            _ => None,
        }
    }
}
