use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use stock_forecast::config::Config;
use stock_forecast::market::DashboardState;
use stock_forecast::ml::PredictionEngine;
use stock_forecast::web::DashboardServer;

#[derive(Parser)]
#[command(name = "stock-forecast")]
#[command(about = "Mock stock price dashboard with a pre-trained LSTM price predictor")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Overrides `server.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides `model.source` (path or URL of model.json).
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_file(&cli.config)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(model) = cli.model {
        config.model.source = model;
    }

    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .init();

    info!("Starting stock forecast service");

    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus exporter unavailable: {}", e);
            None
        }
    };

    // The server comes up while the model is still loading.
    let engine = Arc::new(PredictionEngine::from_config(&config.model));
    let load_handle = engine.spawn_load();

    let today = chrono::Utc::now().date_naive();
    let dashboard = DashboardState::new(&config.dashboard, today, &mut StdRng::from_entropy())?;

    let server = DashboardServer::new(
        engine.clone(),
        dashboard,
        &config.server.static_dir,
        metrics_handle,
    );

    let host = config.server.host.clone();
    let port = config.server.port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.start(&host, port).await {
            warn!("Dashboard server error: {}", e);
        }
    });

    info!("Dashboard available at http://localhost:{}", port);
    info!("Predictor available at http://localhost:{}/predictor", port);

    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping services...");

    load_handle.abort();
    server_handle.abort();

    Ok(())
}
