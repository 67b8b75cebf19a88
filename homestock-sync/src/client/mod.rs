//! HTTP client for the HomeStock API.
//!
//! Every call goes through one retry loop:
//!
//! - no response (connect failure, reset, timeout): retried
//! - 401 on an authenticated call: [`AuthProvider::on_auth_error`], fails at once
//! - 403: [`AccessDeniedHandler::on_access_denied`], fails at once
//! - 429 and 5xx: retried
//! - any other 4xx: fails at once
//!
//! Retries back off per [`RetryPolicy`]. A request that fails for good is
//! described in an [`ErrorDetails`] and handed to the [`ErrorReporter`]
//! before the error is returned.
//!
//! [`AuthProvider::on_auth_error`]: crate::AuthProvider::on_auth_error
//! [`AccessDeniedHandler::on_access_denied`]: crate::AccessDeniedHandler::on_access_denied
//! [`ErrorReporter`]: crate::ErrorReporter

mod report;
mod retry;

pub use report::ErrorDetails;
pub use retry::{RetryAttempt, RetryPolicy};
pub use reqwest::Method;

use crate::api::SyncApi;
use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::hooks::ClientHooks;
use crate::protocol::{
    AuthResponse, BatchRequest, BatchResponse, EntitySyncStatus, ErrorBody, LoginRequest,
    PullRequest, PullResponse, PushRequest, PushResponse, SignupRequest, StatusResponse, User,
    BATCH_PATH, LOGIN_PATH, ME_PATH, PULL_PATH, PUSH_PATH, SIGNUP_PATH, STATUS_PATH,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

/// A successful result together with the retries it took.
#[derive(Debug, Clone)]
pub struct Traced<T> {
    pub value: T,
    /// Failed attempts that preceded the success, in order.
    pub attempts: Vec<RetryAttempt>,
}

/// Outcome of a single attempt that did not succeed.
struct Failure {
    error: SyncError,
    status: Option<u16>,
    body: Option<String>,
}

impl Failure {
    fn transport(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else {
            err.to_string()
        };
        Self {
            error: SyncError::Transport(message),
            status: None,
            body: None,
        }
    }
}

/// HomeStock API client.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    config: ClientConfig,
    hooks: ClientHooks,
}

impl ApiClient {
    /// Creates a client. The per-attempt timeout comes from `config`.
    pub fn new(config: ClientConfig, hooks: ClientHooks) -> SyncResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            hooks,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn hooks(&self) -> &ClientHooks {
        &self.hooks
    }

    /// Issues a request and decodes the response.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
        requires_auth: bool,
    ) -> SyncResult<T> {
        self.request_traced(endpoint, method, body, requires_auth)
            .await
            .map(|traced| traced.value)
    }

    /// Like [`request`](Self::request), also returning the retry trail.
    pub async fn request_traced<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
        requires_auth: bool,
    ) -> SyncResult<Traced<T>> {
        let token = if requires_auth {
            Some(self.hooks.auth.token().ok_or(SyncError::NotAuthenticated)?)
        } else {
            None
        };

        let url = format!("{}{}", self.config.base_url, endpoint);
        let policy = &self.config.retry;
        let started = Instant::now();
        let mut attempts: Vec<RetryAttempt> = Vec::new();
        let mut attempt = 0u32;

        loop {
            let failure = match self
                .send_once(&url, endpoint, &method, body.as_ref(), token.as_deref())
                .await
            {
                Ok(value) => return Ok(Traced { value, attempts }),
                Err(failure) => failure,
            };

            if failure.error.is_retryable() && attempt < policy.max_retries {
                let delay = policy.delay_for(attempt);
                debug!(
                    "{} {} failed (attempt {}), retrying in {:?}: {}",
                    method,
                    endpoint,
                    attempt + 1,
                    delay,
                    failure.error
                );
                attempts.push(RetryAttempt {
                    attempt,
                    delay_ms: delay.as_secs_f64() * 1000.0,
                    timestamp: Utc::now(),
                    error: failure.error.to_string(),
                });
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            // 401 hands control to the re-authentication flow instead.
            if !matches!(failure.error, SyncError::Auth(_)) {
                let details = ErrorDetails {
                    endpoint: endpoint.to_string(),
                    method: method.to_string(),
                    headers: request_headers(token.as_deref(), body.is_some()),
                    status: failure.status,
                    response_body: failure.body,
                    attempts,
                    total_duration: started.elapsed(),
                    error: failure.error.to_string(),
                };
                self.hooks.reporter.report(&details);
            }
            return Err(failure.error);
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        url: &str,
        endpoint: &str,
        method: &Method,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<T, Failure> {
        let mut builder = self.http.request(method.clone(), url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(Failure::transport)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(Failure::transport)?;

        if (200..300).contains(&status) {
            let payload = if text.trim().is_empty() { "{}" } else { text.as_str() };
            return serde_json::from_str(payload).map_err(|e| Failure {
                error: SyncError::Serialization(e),
                status: Some(status),
                body: Some(text.clone()),
            });
        }

        let message = error_message(status, &text);
        let error = match status {
            401 if token.is_some() => {
                warn!("{} {} rejected the access token", method, endpoint);
                self.hooks.auth.on_auth_error();
                SyncError::Auth(message)
            }
            401 => SyncError::Client { status, message },
            403 => {
                self.hooks.access_denied.on_access_denied(endpoint);
                SyncError::Forbidden(message)
            }
            _ => SyncError::from_status(status, message),
        };
        Err(Failure {
            error,
            status: Some(status),
            body: Some(text),
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
        requires_auth: bool,
    ) -> SyncResult<T> {
        let body = serde_json::to_value(body)?;
        self.request(endpoint, Method::POST, Some(body), requires_auth)
            .await
    }

    // ── Auth ─────────────────────────────────────────────────────

    /// Exchanges credentials for an access token.
    pub async fn login(&self, email: &str, password: &str) -> SyncResult<AuthResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.post(LOGIN_PATH, &body, false).await
    }

    /// Registers an account and returns its access token.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> SyncResult<AuthResponse> {
        let body = SignupRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.map(str::to_string),
        };
        self.post(SIGNUP_PATH, &body, false).await
    }

    /// The signed-in account.
    pub async fn me(&self) -> SyncResult<User> {
        self.request(ME_PATH, Method::GET, None, true).await
    }

    /// Server-side counts per entity kind.
    pub async fn sync_status(&self) -> SyncResult<Vec<EntitySyncStatus>> {
        let response: StatusResponse = self.request(STATUS_PATH, Method::GET, None, true).await?;
        Ok(response.entities)
    }
}

#[async_trait]
impl SyncApi for ApiClient {
    async fn pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
        self.post(PULL_PATH, &request, true).await
    }

    async fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        self.post(PUSH_PATH, &request, true).await
    }

    async fn batch(&self, request: BatchRequest) -> SyncResult<BatchResponse> {
        self.post(BATCH_PATH, &request, true).await
    }

    async fn status(&self) -> SyncResult<Vec<EntitySyncStatus>> {
        self.sync_status().await
    }
}

/// Headers as sent, credentials masked.
fn request_headers(token: Option<&str>, has_body: bool) -> Vec<(String, String)> {
    let authorization = token.map(|t| format!("Bearer {t}"));
    let mut headers: Vec<(&str, &str)> = Vec::new();
    if let Some(value) = authorization.as_deref() {
        headers.push(("Authorization", value));
    }
    if has_body {
        headers.push(("Content-Type", "application/json"));
    }
    report::redact_headers(headers)
}

/// Human-readable message of an error response.
fn error_message(status: u16, body: &str) -> String {
    let generic = || format!("request failed with status {status}");
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return generic();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => serde_json::from_value::<ErrorBody>(value)
            .ok()
            .and_then(|b| b.text())
            .unwrap_or_else(generic),
        Err(_) => trimmed.to_string(),
    }
}
