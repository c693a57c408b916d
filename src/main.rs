//! # relay
//!
//! Subscription relay binary. Loads settings, opens the subscription store
//! and starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::ServerConfig;
use relay_settings::{RelaySettings, StoreBackend};
use relay_store::{Database, MemorySubscriptionStore, SqliteSubscriptionStore, SubscriptionStore};
use relay_telemetry::TelemetryConfig;

/// Real-time subscription relay.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Real-time subscription fan-out server")]
struct Cli {
    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` subscription database.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Keep subscriptions in memory instead of `SQLite`.
    #[arg(long)]
    memory_store: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Run the built-in clock producer.
    #[arg(long)]
    produce: bool,
}

impl Cli {
    /// Apply flags over file and environment settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref db) = self.db {
            settings.store.backend = StoreBackend::Sqlite;
            settings.store.path.clone_from(db);
        }
        if self.memory_store {
            settings.store.backend = StoreBackend::Memory;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.produce {
            settings.producer.enabled = true;
        }
    }
}

fn open_store(settings: &RelaySettings) -> Result<Arc<dyn SubscriptionStore>> {
    match settings.store.backend {
        StoreBackend::Sqlite => {
            let path = &settings.store.path;
            let db = Database::open(path)
                .with_context(|| format!("Failed to open database: {}", path.display()))?;
            Ok(Arc::new(SqliteSubscriptionStore::new(db)))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory subscription store, subscriptions will not survive restart");
            Ok(Arc::new(MemorySubscriptionStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match cli.config {
        Some(ref path) => relay_settings::load_settings_from_path(path),
        None => relay_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    let telemetry = relay_telemetry::init_telemetry(TelemetryConfig {
        json: settings.logging.json,
        ..TelemetryConfig::default().with_level_name(&settings.logging.level)
    });

    let store = open_store(&settings)?;
    let config = ServerConfig::from_settings(&settings).context("Invalid server settings")?;

    let handle = relay_server::start(config, store, telemetry.metrics())
        .await
        .context("Failed to start server")?;

    tracing::info!(port = handle.port, "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
