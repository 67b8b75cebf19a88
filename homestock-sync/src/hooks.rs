//! Collaborators the engine calls out to.
//!
//! The host application injects these at construction time: token source,
//! access-denied and error reporting for the network client, and the toast
//! channel for the update scheduler.

use crate::client::ErrorDetails;
use homestock_types::EntityKind;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Source of the bearer token.
pub trait AuthProvider: Send + Sync {
    /// Current access token, if signed in.
    fn token(&self) -> Option<String>;

    /// Called when an authenticated request got a 401. The host should start
    /// its re-authentication flow.
    fn on_auth_error(&self);

    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}

/// Told about every 403.
pub trait AccessDeniedHandler: Send + Sync {
    fn on_access_denied(&self, endpoint: &str);
}

/// Receives a diagnostic snapshot of every request that failed for good.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, details: &ErrorDetails);
}

/// User-visible notification channel (toasts, banners).
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub kind: Option<EntityKind>,
    pub entity_id: Option<String>,
}

impl Notice {
    /// An error notice about one entity.
    pub fn entity_error(kind: EntityKind, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
            kind: Some(kind),
            entity_id: Some(id.into()),
        }
    }
}

/// In-memory token holder. `on_auth_error` drops the token so that the
/// periodic trigger stops until the host signs in again.
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// A provider with no token.
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl AuthProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn on_auth_error(&self) {
        warn!("Access token rejected, signing out");
        self.clear();
    }
}

/// Logs through `tracing`. Default for every hook the host leaves unset.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHooks;

impl AccessDeniedHandler for TracingHooks {
    fn on_access_denied(&self, endpoint: &str) {
        warn!("Access denied for {}", endpoint);
    }
}

impl ErrorReporter for TracingHooks {
    fn report(&self, details: &ErrorDetails) {
        warn!(
            endpoint = %details.endpoint,
            method = %details.method,
            status = ?details.status,
            attempts = details.requests_issued(),
            duration_ms = details.total_duration.as_millis() as u64,
            "Request failed: {}",
            details.error
        );
    }
}

impl Notifier for TracingHooks {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => info!("{}", notice.message),
            NoticeLevel::Error => warn!("{}", notice.message),
        }
    }
}

/// The collaborators of [`ApiClient`](crate::ApiClient).
#[derive(Clone)]
pub struct ClientHooks {
    pub auth: Arc<dyn AuthProvider>,
    pub access_denied: Arc<dyn AccessDeniedHandler>,
    pub reporter: Arc<dyn ErrorReporter>,
}

impl ClientHooks {
    /// Hooks with the given token source; denial and failure reports go to
    /// the log.
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            auth,
            access_denied: Arc::new(TracingHooks),
            reporter: Arc::new(TracingHooks),
        }
    }

    #[must_use]
    pub fn with_access_denied(mut self, handler: Arc<dyn AccessDeniedHandler>) -> Self {
        self.access_denied = handler;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }
}
