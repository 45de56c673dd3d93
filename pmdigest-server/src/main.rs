//! pmdigest
//!
//! Watches the PM2 event bus and mails throttled, size-bounded digests of
//! process logs and lifecycle transitions.

mod config;
mod ingest;
mod mail;
mod render;
mod shutdown;

use clap::{Parser, ValueEnum};
use config::ConfigLoader;
use ingest::BusIngester;
use mail::Mailer;
use pmdigest_bus::client::BusSubscriber;
use pmdigest_core::config::ConfigStore;
use pmdigest_core::events::inbound_event_channel;
use pmdigest_core::processors::{DigestEngine, DigestSender};
use render::HtmlRenderer;
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// pmdigest - PM2 notification digest daemon
#[derive(Parser, Debug)]
#[command(name = "pmdigest")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "PMDIGEST_CONFIG", default_value = "./pmdigest.toml")]
    config: PathBuf,

    /// PM2 home directory, used to locate the bus socket
    #[arg(long, env = "PM2_HOME")]
    pm2_home: Option<PathBuf>,

    /// Log digests instead of sending them
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.log_format);

    tracing::info!("Starting pmdigest v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.pm2_home.clone()));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", config_loader.config_path());

    // Build the delivery pipeline
    let renderer = HtmlRenderer::new(loaded_config.mail.template.as_deref()).map_err(|e| {
        tracing::error!("Failed to load digest template: {:#}", e);
        e
    })?;
    let mailer = if args.dry_run {
        tracing::warn!("Dry-run mode, digests will be logged and not sent");
        Mailer::dry_run(&loaded_config.mail)
    } else {
        Mailer::smtp(&loaded_config.mail, &loaded_config.smtp).map_err(|e| {
            tracing::error!("Failed to set up SMTP transport: {:#}", e);
            e
        })?
    };
    let sender = DigestSender::new(
        Arc::new(renderer),
        Arc::new(mailer),
        Some(loaded_config.mail.lifecycle_subject.clone()),
    );

    // Connect to the PM2 bus
    let socket = &loaded_config.bus.socket;
    tracing::info!("Connecting to PM2 bus at {}", socket.display());
    let subscriber = BusSubscriber::connect(socket).await.map_err(|e| {
        tracing::error!("Failed to connect to PM2 bus: {}", e);
        e
    })?;

    // Spawn processors
    let target_store = ConfigStore::new(loaded_config.targets);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = inbound_event_channel();

    let engine = DigestEngine::new(loaded_config.engine, target_store.load(), sender);
    let engine_handle = tokio::spawn(engine.run(
        shutdown_rx.clone(),
        event_rx,
        target_store.subscribe(),
    ));
    let ingester_handle = tokio::spawn(BusIngester::new(subscriber, event_tx).run(shutdown_rx));

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(config_loader, target_store)?;

    let result = shutdown_signal().await;

    // Stop processors, then the reload handler
    let _ = shutdown_tx.send(true);
    if let Err(e) = ingester_handle.await {
        tracing::error!("BusIngester task failed: {}", e);
    }
    if let Err(e) = engine_handle.await {
        tracing::error!("DigestEngine task failed: {}", e);
    }
    reload_notify.notify_one();

    tracing::info!("pmdigest shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}
