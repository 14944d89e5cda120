//! promtap Binary Entry Point
//!
//! Runs the collection loop until Ctrl+C or SIGTERM.
//! Core functionality is provided by the `promtap` library crate.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use promtap::{
    collector::Controller,
    config::{Config, parse_duration},
    prometheus::PrometheusClient,
    sink::SinkBuilder,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// promtap - Prometheus collection beat
#[derive(Parser, Debug)]
#[command(name = "promtap", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/promtap.yaml",
        env = "PROMTAP_CONFIG"
    )]
    config: String,

    /// Prometheus base address (overrides config file)
    #[arg(long, env = "PROMTAP_ADDRESS")]
    address: Option<String>,

    /// Collection period, e.g. `15s` (overrides config file)
    #[arg(long, env = "PROMTAP_PERIOD", value_parser = parse_duration)]
    period: Option<Duration>,

    /// Collector name written to each event's `type` (overrides config file)
    #[arg(long)]
    name: Option<String>,

    /// Append events to this file instead of stdout (overrides config file)
    #[arg(long)]
    output: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout may carry events.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,promtap=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("promtap - Prometheus collection beat");

    let cli = Cli::parse();

    let mut config = if Path::new(&cli.config).exists() {
        tracing::info!("Loading configuration from: {}", cli.config);
        Config::load(&cli.config)?
    } else {
        tracing::warn!("Config file {} not found, using defaults", cli.config);
        Config::default()
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(address) = cli.address {
        config.address = address;
    }
    if let Some(period) = cli.period {
        config.period = period;
    }
    if let Some(name) = cli.name {
        config.name = name;
    }
    if let Some(output) = cli.output {
        config.output.path = Some(output);
    }
    config.validate()?;

    tracing::info!(
        "Backend: {}, period: {:?}, queries: {}, matchers: {}",
        config.address,
        config.period,
        config.queries.len(),
        config.matchers.len(),
    );

    let handles = SinkBuilder::from_config(&config.output).build()?;
    let client = Arc::new(PrometheusClient::from_config(&config)?);
    let controller = Arc::new(Controller::from_config(
        &config,
        client.clone(),
        client,
        Arc::new(handles.writer.clone()),
    )?);

    tokio::spawn(shutdown_signal(Arc::clone(&controller)));
    tracing::info!("Press Ctrl+C to shutdown");

    controller.run().await?;

    let writer = handles.writer.clone();
    handles.join()?;
    tracing::info!(
        published = writer.published(),
        dropped = writer.dropped(),
        written = writer.written(),
        "Shutdown complete"
    );
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then stop the controller.
async fn shutdown_signal(controller: Arc<Controller>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    controller.stop();
}
