//! Vegetation Monitor
//!
//! Keeps per-parcel vegetation-index series current:
//! - Scheduled ingestion of raw index values from the imagery provider
//! - Pixel reduction into daily observations
//! - Weekly and monthly rollups with change and anomaly flags
//! - Rule-based alerts published to Redpanda (or the log)

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use validator::Validate;

use gateway::{HttpGateway, ProviderConfig, ProviderGateway};
use monitor_core::Parcel;
use redpanda::{AlertSink, LogSink, RedpandaConfig, RedpandaSink};
use state_store::{MemoryStore, ParcelRegistry, RunStateStore, Store};
use telemetry::{health, init_tracing_from_env};
use worker::{
    AggregationConfig, AggregationEngine, AlertEngine, AlertRules, BackgroundTasks,
    IngestionConfig, IngestionWorker, Scheduler, SchedulerConfig,
};

/// Application configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    provider: ProviderConfig,

    #[serde(default)]
    ingestion: IngestionConfig,

    #[serde(default)]
    scheduler: SchedulerConfig,

    #[serde(default)]
    aggregation: AggregationConfig,

    #[serde(default)]
    alerts: AlertRules,

    #[serde(default)]
    redpanda: RedpandaConfig,

    /// Parcels registered at startup
    #[serde(default)]
    parcels: Vec<Parcel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting Vegetation Monitor v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    info!(
        provider = %config.provider.base_url,
        credentials = config.provider.credentials().is_some(),
        redpanda = config.redpanda.enabled,
        parcels = config.parcels.len(),
        "Loaded configuration"
    );

    let store: Arc<dyn Store> =
        Arc::new(MemoryStore::with_backoff(config.ingestion.failure_backoff));
    seed_parcels(store.as_ref(), &config.parcels).await?;

    let gateway: Arc<dyn ProviderGateway> = Arc::new(
        HttpGateway::new(config.provider.clone()).context("Failed to create provider gateway")?,
    );
    if config.provider.credentials().is_none() {
        warn!("Provider credentials not configured, requests are sent unauthenticated");
    }

    let sink = alert_sink(&config.redpanda).await;
    info!(status = ?health().report().status, "Startup health");

    let alerts = Arc::new(AlertEngine::new(
        store.clone(),
        sink,
        config.alerts.clone(),
    ));
    let ingestion = Arc::new(IngestionWorker::new(
        store.clone(),
        gateway,
        alerts.clone(),
        config.ingestion.clone(),
    ));
    let aggregation = Arc::new(AggregationEngine::new(
        store.clone(),
        alerts,
        config.aggregation.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        store,
        ingestion,
        config.scheduler.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = BackgroundTasks {
        scheduler,
        aggregation,
        aggregation_config: config.aggregation.clone(),
        metrics_log_interval: config.scheduler.metrics_log_interval(),
    }
    .start(shutdown_rx);

    shutdown_signal().await;

    info!("Shutting down...");
    shutdown_tx.send(true).ok();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Background task failed: {}", e);
        }
    }

    telemetry::log_snapshot();
    let report = health().report();
    info!(status = ?report.status, "Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("MONITOR")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // The config crate's nested parsing doesn't work reliably with underscored field names
    if let Ok(client_id) = std::env::var("MONITOR_PROVIDER_CLIENT_ID") {
        config.provider.client_id = Some(client_id);
    }
    if let Ok(client_secret) = std::env::var("MONITOR_PROVIDER_CLIENT_SECRET") {
        config.provider.client_secret = Some(client_secret);
    }
    if let Ok(base_url) = std::env::var("MONITOR_PROVIDER_BASE_URL") {
        config.provider.base_url = base_url;
    }
    if let Ok(brokers) = std::env::var("MONITOR_REDPANDA_BROKERS") {
        config.redpanda.brokers = brokers.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(topic) = std::env::var("MONITOR_REDPANDA_TOPIC") {
        config.redpanda.topic = topic;
    }

    Ok(config)
}

/// Registers configured parcels and gives each a run state. Invalid parcels
/// abort startup.
async fn seed_parcels(store: &dyn Store, parcels: &[Parcel]) -> Result<()> {
    let now = Utc::now();
    for parcel in parcels {
        parcel
            .validate()
            .with_context(|| format!("Invalid parcel {} ({})", parcel.name, parcel.id))?;
        store
            .upsert_parcel(parcel)
            .await
            .with_context(|| format!("Failed to register parcel {}", parcel.id))?;
        store
            .ensure(parcel.id, now)
            .await
            .with_context(|| format!("Failed to create run state for parcel {}", parcel.id))?;
        info!(parcel_id = %parcel.id, name = %parcel.name, "Registered parcel");
    }
    Ok(())
}

/// Redpanda when enabled and reachable, the log otherwise.
async fn alert_sink(config: &RedpandaConfig) -> Arc<dyn AlertSink> {
    if !config.enabled {
        info!("Redpanda disabled, alerts go to the log");
        return Arc::new(LogSink);
    }

    if redpanda::health::check_connection(config).await {
        health().alert_bus.set_healthy();
        info!(brokers = %config.broker_string(), topic = %config.topic, "Redpanda connection: healthy");
    } else {
        // The sink reconnects on first publish.
        health().alert_bus.set_unhealthy("Connection failed");
        error!(brokers = %config.broker_string(), "Redpanda connection: unhealthy");
    }
    Arc::new(RedpandaSink::new(config.clone()))
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
