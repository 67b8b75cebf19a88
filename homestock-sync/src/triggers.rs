//! When to sync.
//!
//! Three independent sources feed [`SyncCoordinator::sync_all`]:
//!
//! - a periodic timer, firing only while signed in
//! - a "data changed" signal with a sliding quiet period: every signal
//!   restarts the timer and the sync runs once signals stop
//! - explicit requests, each served as is
//!
//! A fourth task watches coordinator events and publishes a
//! [`TriggerStatus`] for the UI.

use crate::config::TriggerConfig;
use crate::coordinator::{SyncCoordinator, SyncEvent, SyncReport};
use crate::hooks::AuthProvider;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// UI-facing sync state, derived from coordinator events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerStatus {
    pub syncing: bool,
    /// Most recent failure, cleared by the next clean pass.
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
}

/// Handle to the running trigger tasks. Dropping it stops them.
pub struct SyncTriggers {
    changed: mpsc::Sender<()>,
    requests: mpsc::UnboundedSender<()>,
    status: watch::Receiver<TriggerStatus>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncTriggers {
    /// Spawns the trigger loops on the current tokio runtime.
    pub fn start(
        coordinator: Arc<SyncCoordinator>,
        auth: Arc<dyn AuthProvider>,
        config: TriggerConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        // Capacity 1: a signal arriving while one is buffered is redundant.
        let (changed_tx, changed_rx) = mpsc::channel(1);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(TriggerStatus::default());

        let events = coordinator.subscribe();
        let tasks = vec![
            tokio::spawn(watch_events(events, status_tx, shutdown.clone())),
            tokio::spawn(periodic_loop(
                coordinator.clone(),
                auth,
                config.clone(),
                shutdown.clone(),
            )),
            tokio::spawn(debounce_loop(
                coordinator.clone(),
                changed_rx,
                config,
                shutdown.clone(),
            )),
            tokio::spawn(request_loop(coordinator, request_rx, shutdown.clone())),
        ];

        Self {
            changed: changed_tx,
            requests: request_tx,
            status: status_rx,
            shutdown,
            tasks,
        }
    }

    /// Local data changed; sync once changes stop for the quiet period.
    pub fn notify_changed(&self) {
        // Full means a signal is already waiting.
        let _ = self.changed.try_send(());
    }

    /// Syncs now.
    pub fn request_sync(&self) {
        let _ = self.requests.send(());
    }

    pub fn status(&self) -> watch::Receiver<TriggerStatus> {
        self.status.clone()
    }

    /// Stops every loop and waits for them to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for SyncTriggers {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_sync(coordinator: &SyncCoordinator, source: &str) {
    debug!("Sync requested by {} trigger", source);
    if let Err(e) = coordinator.sync_all().await {
        warn!("{} sync failed: {}", source, e);
    }
}

async fn periodic_loop(
    coordinator: Arc<SyncCoordinator>,
    auth: Arc<dyn AuthProvider>,
    config: TriggerConfig,
    shutdown: CancellationToken,
) {
    let period = config.periodic_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if auth.is_authenticated() {
                    run_sync(&coordinator, "periodic").await;
                } else {
                    debug!("Skipping periodic sync, not signed in");
                }
            }
        }
    }
}

async fn debounce_loop(
    coordinator: Arc<SyncCoordinator>,
    mut changed: mpsc::Receiver<()>,
    config: TriggerConfig,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            signal = changed.recv() => if signal.is_none() { return },
        }

        // Every further signal restarts the quiet period.
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                signal = changed.recv() => if signal.is_none() { return },
                _ = tokio::time::sleep(config.quiet_period) => break,
            }
        }

        run_sync(&coordinator, "change").await;
    }
}

async fn request_loop(
    coordinator: Arc<SyncCoordinator>,
    mut requests: mpsc::UnboundedReceiver<()>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(()) => run_sync(&coordinator, "explicit").await,
                None => break,
            },
        }
    }
}

async fn watch_events(
    mut events: broadcast::Receiver<SyncEvent>,
    status: watch::Sender<TriggerStatus>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(SyncEvent::Started { .. }) => status.send_modify(|s| s.syncing = true),
            Ok(SyncEvent::Error { message, .. }) => {
                status.send_modify(|s| s.last_error = Some(message));
            }
            Ok(SyncEvent::Aborted { message }) => {
                status.send_modify(|s| {
                    s.syncing = false;
                    s.last_error = Some(message);
                });
            }
            Ok(SyncEvent::Completed(report)) => {
                status.send_modify(|s| {
                    s.syncing = false;
                    if !report.skipped && report.is_success() {
                        s.last_error = None;
                        s.last_synced_at = Some(Utc::now());
                    }
                    s.last_report = Some(report);
                });
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Trigger status missed {} sync events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
