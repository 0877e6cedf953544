//! IoTSight Prometheus exporter binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use iotsight_common::LoggingConfig;
use iotsight_exporter_prometheus::{
    Beestat, Collector, ExporterConfig, HttpServer, OpenWeather, PurpleAir,
};

/// Export home IoT sensor APIs as Prometheus metrics.
#[derive(Parser, Debug)]
#[command(name = "iotsight-exporter-prometheus")]
#[command(about = "Export home IoT sensor APIs as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: String,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides config.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration; missing required settings abort here
    let mut config = ExporterConfig::load_from_file(&args.config)?;

    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }

    // Initialize logging
    let logging = LoggingConfig {
        level: args.log_level.unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    iotsight_common::init_tracing(&logging).map_err(|e| anyhow::anyhow!("{}", e))?;

    info!("Starting IoTSight Prometheus exporter");

    let listen_addr = config
        .server
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Build the configured sources
    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
    if let Some(purpleair) = config.purpleair {
        collectors.push(Arc::new(PurpleAir::new(purpleair)?));
    }
    if let Some(beestat) = config.beestat {
        collectors.push(Arc::new(Beestat::new(beestat)?));
    }
    if let Some(openweather) = config.openweather {
        collectors.push(Arc::new(OpenWeather::new(openweather)?));
    }

    info!(sources = collectors.len(), "Sources configured");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(collectors, listen_addr);
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).unwrap();
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    info!("Exporter stopped");
    Ok(())
}
