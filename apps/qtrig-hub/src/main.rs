use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use qtrig_hub::telemetry::Telemetry;
use qtrig_hub::{AppState, Cli, Hub, HubConfig, IniSettings};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (ini, ini_error) = match IniSettings::load(&cli.config) {
        Ok(ini) => (ini, None),
        Err(err) => (IniSettings::default(), Some(err)),
    };
    let config_path = cli.config.clone();
    let config = HubConfig::from_cli(cli, ini)?;

    let telemetry = Telemetry::init(config.default_log_level())?;
    if let Some(err) = ini_error {
        warn!(
            path = %config_path.display(),
            error = %err,
            "could not read config file; using defaults"
        );
    }

    info!(
        listen_addr = %config.listen_addr,
        debug = config.debug,
        web_client = %config.web_client.display(),
        "starting qtrig-hub"
    );

    run(config, telemetry.metrics_handle()).await
}

async fn run(config: HubConfig, metrics: PrometheusHandle) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("qtrig-hub listening on {}", config.listen_addr);

    let shutdown_grace = config.shutdown_grace;
    let hub = Hub::new(config.liveness_threshold);
    let state = AppState::new(hub, config, Some(metrics));
    qtrig_hub::serve(listener, state, shutdown_signal()).await?;

    info!(
        grace_seconds = shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
