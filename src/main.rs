//! Probe sidecar binary

use clap::Parser;
use probe_sidecar::{
    load_checks, run_publisher, Config, HttpPublisher, Result, ScraperError, ScraperManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Scrapes a black-box prober for every configured check and forwards the
/// results.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Name of this probe
    #[arg(long, env = "PROBE_NAME")]
    probe_name: Option<String>,

    /// Probe endpoint of the black-box prober
    #[arg(long, env = "PROVIDER_URL")]
    provider_url: Option<String>,

    /// Base URL of the downstream publisher
    #[arg(long, env = "PUBLISHER_URL")]
    publisher_url: Option<String>,

    /// JSON file with the check definitions
    #[arg(long, env = "CHECKS_PATH")]
    checks_path: Option<String>,

    /// Consecutive results needed before a state change is logged
    #[arg(long, env = "HYSTERESIS_THRESHOLD")]
    hysteresis_threshold: Option<u32>,

    /// Capacity of the publish queue
    #[arg(long, env = "PUBLISH_QUEUE_SIZE")]
    publish_queue_size: Option<usize>,

    /// Publisher request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECONDS")]
    http_timeout_seconds: Option<u64>,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::from_env();

        if let Some(probe_name) = self.probe_name {
            config.probe_name = probe_name;
        }
        if let Some(provider_url) = self.provider_url {
            config.provider_url = provider_url;
        }
        if let Some(publisher_url) = self.publisher_url {
            config.publisher_url = publisher_url;
        }
        if let Some(checks_path) = self.checks_path {
            config.checks_path = checks_path;
        }
        if let Some(threshold) = self.hysteresis_threshold {
            config.hysteresis_threshold = threshold;
        }
        if let Some(size) = self.publish_queue_size {
            config.publish_queue_size = size;
        }
        if let Some(seconds) = self.http_timeout_seconds {
            config.http_timeout = Duration::from_secs(seconds);
        }

        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    info!("Starting probe sidecar v{}", env!("CARGO_PKG_VERSION"));

    let config = Args::parse().into_config();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        "Sidecar configuration - Probe: {}, Provider: {}, Publisher: {}, Checks: {}",
        config.probe_name, config.provider_url, config.publisher_url, config.checks_path
    );

    let provider = config.provider().map_err(ScraperError::Config)?;
    let checks = load_checks(&config.checks_path)?;

    let publisher = HttpPublisher::new(
        &config.publisher_url,
        &config.probe_name,
        config.http_timeout,
    )?;
    let (tx, rx) = mpsc::channel(config.publish_queue_size);
    let publisher_task = tokio::spawn(async move {
        run_publisher(rx, &publisher).await;
        publisher.metrics()
    });

    let manager = ScraperManager::new(
        &config.probe_name,
        provider,
        Arc::new(tx),
        config.hysteresis_threshold,
    );

    for check in checks {
        let id = check.id;
        if let Err(e) = manager.add_check(check).await {
            error!(check_id = id, "Failed to start scraper: {}", e);
        }
    }

    for (name, module) in manager.modules().await {
        info!(module = %name, prober = %module.prober, "Module ready for registration");
        if let Ok(json) = serde_json::to_string(&module) {
            debug!(module = %name, config = %json, "Module configuration");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ScraperError::Config(format!("Failed to wait for shutdown signal: {}", e)))?;

    info!("Shutting down probe sidecar");
    manager.shutdown().await;
    drop(manager);

    match publisher_task.await {
        Ok(metrics) => info!(
            "Final publisher metrics - Success rate: {:.1}%, Total attempts: {}",
            metrics.success_rate, metrics.attempts
        ),
        Err(e) => error!("Publisher task failed: {}", e),
    }

    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
