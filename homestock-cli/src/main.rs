//! HomeStock sync operator tool.
//!
//! Wires the sync engine to a real server:
//!
//! ```text
//! homestock login --email sam@example.com --password ...
//! homestock --token $TOKEN status
//! homestock --token $TOKEN sync --kind items
//! homestock --token $TOKEN watch
//! ```
//!
//! The local store is in memory, so `sync` always starts from an empty copy.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::CliConfig;
use homestock_sync::{
    ApiClient, AuthProvider, ClientHooks, EntityStore, MemorySyncStateStore, StaticToken,
    SyncCoordinator, SyncEvent, SyncReport, SyncTriggers, TracingHooks,
};
use homestock_types::DeviceId;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "homestock")]
#[command(about = "HomeStock sync engine operator tool")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// API base URL
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Access token
    #[arg(long, global = true, env = "HOMESTOCK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Home to sync (defaults to the account's active home)
    #[arg(long, global = true)]
    home: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and print the access token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Show the account and per-kind server counts
    Status,
    /// Run one sync pass and print the report
    Sync {
        /// Only sync this kind (categories, locations, items, todos, settings)
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Keep syncing until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    }
    .merge(args.server, args.token, args.home);
    debug!("Using server {}", config.engine.client.base_url);

    match args.command {
        Command::Login { email, password } => login(&config, &email, &password).await,
        Command::Status => status(&config).await,
        Command::Sync { kind } => sync(&config, kind.as_deref()).await,
        Command::Watch => watch(&config).await,
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn connect(config: &CliConfig, auth: Arc<StaticToken>) -> Result<ApiClient> {
    let hooks = ClientHooks::new(auth)
        .with_access_denied(Arc::new(TracingHooks))
        .with_reporter(Arc::new(TracingHooks));
    ApiClient::new(config.engine.client.clone(), hooks).context("Failed to create API client")
}

fn signed_in(config: &CliConfig) -> Result<Arc<StaticToken>> {
    match &config.token {
        Some(token) => Ok(Arc::new(StaticToken::new(token.clone()))),
        None => bail!("Not signed in: pass --token or set HOMESTOCK_TOKEN"),
    }
}

async fn login(config: &CliConfig, email: &str, password: &str) -> Result<()> {
    let client = connect(config, Arc::new(StaticToken::signed_out()))?;
    let auth = client.login(email, password).await.context("Login failed")?;
    if let Some(user) = &auth.user {
        info!("Signed in as {}", user.email);
    }
    println!("{}", auth.access_token);
    Ok(())
}

async fn status(config: &CliConfig) -> Result<()> {
    let client = connect(config, signed_in(config)?)?;
    let user = client.me().await.context("Failed to fetch account")?;
    let counts = client.sync_status().await.context("Failed to fetch sync status")?;

    println!("Account:  {} ({})", user.email, user.id);
    if let Some(name) = &user.name {
        println!("Name:     {}", name);
    }
    println!("Homes:    {}", user.home_ids.join(", "));
    if let Some(active) = &user.active_home_id {
        println!("Active:   {}", active);
    }
    println!();
    for entry in counts {
        let updated = entry
            .last_updated
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!("  {:<12} {:>6}  last updated {}", entry.entity_type, entry.count, updated);
    }
    Ok(())
}

/// Builds a coordinator for the configured home, or the account's active one.
async fn coordinator(config: &CliConfig, auth: Arc<StaticToken>) -> Result<SyncCoordinator> {
    let client = Arc::new(connect(config, auth)?);
    let user = client.me().await.context("Failed to fetch account")?;

    let home = config
        .home
        .clone()
        .or(user.active_home_id.clone())
        .or_else(|| user.home_ids.first().cloned())
        .context("Account has no home; pass --home")?;

    let coordinator = SyncCoordinator::new(
        client,
        Arc::new(EntityStore::new()),
        Arc::new(MemorySyncStateStore::new()),
        DeviceId::new(),
    );
    coordinator.set_active_home(home.clone());
    coordinator.set_other_homes(user.home_ids.into_iter().filter(|h| *h != home).collect());
    info!("Syncing home {}", home);
    Ok(coordinator)
}

async fn sync(config: &CliConfig, kind: Option<&str>) -> Result<()> {
    let coordinator = coordinator(config, signed_in(config)?).await?;
    let report = match kind {
        Some(key) => coordinator.sync_key(key).await,
        None => coordinator.sync_all().await,
    }
    .context("Sync failed")?;

    print_report(&report)?;
    if !report.is_success() {
        bail!("{} sync iterations failed", report.failures.len());
    }
    Ok(())
}

fn print_report(report: &SyncReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to encode report")?;
    println!("{}", json);
    Ok(())
}

async fn watch(config: &CliConfig) -> Result<()> {
    let auth = signed_in(config)?;
    let coordinator = Arc::new(coordinator(config, auth.clone()).await?);
    let mut events = coordinator.subscribe();
    let auth: Arc<dyn AuthProvider> = auth;
    let triggers = SyncTriggers::start(coordinator, auth, config.engine.triggers.clone());
    triggers.request_sync();
    info!(
        "Watching, periodic sync every {:?}; press Ctrl-C to stop",
        config.engine.triggers.periodic_interval
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {} sync events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down");
    triggers.shutdown().await;
    Ok(())
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::Started { kinds } => debug!("Sync started for {} kinds", kinds.len()),
        SyncEvent::Refresh { kinds } => {
            let keys: Vec<&str> = kinds.iter().map(|k| k.key()).collect();
            info!("Local data changed: {}", keys.join(", "));
        }
        SyncEvent::RemoteChanges {
            home_id,
            kind,
            count,
        } => info!("Home {} has {} new {} changes", home_id, count, kind),
        SyncEvent::Error {
            home_id,
            kind,
            message,
        } => warn!("Sync of {} in home {} failed: {}", kind, home_id, message),
        SyncEvent::Aborted { message } => warn!("Sync aborted: {}", message),
        SyncEvent::Completed(report) if report.skipped => info!("Sync is disabled"),
        SyncEvent::Completed(report) => info!(
            "Sync completed: {} applied, {} pushed, {} failures in {:?}",
            report.applied_total(),
            report.pushed_total(),
            report.failures.len(),
            report.duration
        ),
    }
}
