// =============================================================================
// Sentiment Exporter — Main Entry Point
// =============================================================================
//
// One process ingests one candle type. Startup order:
//   config → adapters → status API → reconciliation run.
// A configuration error exits before any network or file I/O.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod error;
mod market_data;
mod normalizer;
mod pending;
mod ports;
mod provider;
mod reconcile;
mod runtime_config;
mod sink;
mod stats;
mod types;

#[cfg(test)]
mod testkit;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::IngestError;
use crate::provider::{ProviderClient, ProviderStreamClient};
use crate::reconcile::{run_exporter, ExporterPorts, RunOutcome};
use crate::runtime_config::ExporterConfig;
use crate::sink::{FileCheckpointStore, HttpSink};
use crate::stats::IngestStats;

const CONFIG_PATH: &str = "exporter_config.json";

#[tokio::main]
async fn main() -> ExitCode {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Sentiment Exporter — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // A missing file means defaults; an unreadable or malformed one is fatal.
    let mut config = match ExporterConfig::load(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => return fail(e),
    };

    let settings = match config.apply_env().and_then(|()| config.validate()) {
        Ok(settings) => settings,
        Err(e) => return fail(e),
    };

    info!(
        candle_type = %settings.candle_type,
        resolution = %settings.resolution,
        window_secs = settings.window_secs,
        assets = ?settings.assets,
        mode = %settings.mode,
        "Exporter configured"
    );

    // ── 2. Adapters ──────────────────────────────────────────────────────
    let ports = match build_ports(&config, &settings) {
        Ok(ports) => ports,
        Err(e) => return fail(e),
    };

    // ── 3. Status API ────────────────────────────────────────────────────
    let stats = Arc::new(IngestStats::new(settings.candle_type));
    info!(run_id = %stats.run_id(), "Run started");

    let api_stats = stats.clone();
    let bind_addr = config.status_bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_stats);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "Failed to bind status API");
                return;
            }
        };
        info!(addr = %bind_addr, "Status API listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Status API failed");
        }
    });

    // ── 4. Reconciliation run ────────────────────────────────────────────
    let now = chrono::Utc::now().timestamp();
    let result = tokio::select! {
        result = run_exporter(&settings, ports, stats.clone(), now) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Shutdown signal received — stopping");
            info!(snapshot = ?stats.snapshot(), "Sentiment Exporter shut down");
            return ExitCode::SUCCESS;
        }
    };

    match result {
        Ok(RunOutcome::HistoricalComplete { position }) => {
            info!(position = ?position, snapshot = ?stats.snapshot(), "Historical export complete");
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn build_ports(
    config: &ExporterConfig,
    settings: &reconcile::ExporterSettings,
) -> Result<ExporterPorts, IngestError> {
    let query = ProviderClient::new(
        config.provider_url.as_str(),
        &config.provider_api_key,
        settings.connect_timeout,
    )
    .map_err(IngestError::connection)?;
    let stream = ProviderStreamClient::new(
        config.provider_stream_url.as_str(),
        config.provider_api_key.as_str(),
    );
    let sink = HttpSink::new(config.sink_url.as_str(), Duration::from_secs(30))
        .map_err(IngestError::connection)?;
    let checkpoint = FileCheckpointStore::new(&config.checkpoint_path, settings.candle_type);
    info!(path = %checkpoint.path().display(), "Checkpoint file");

    Ok(ExporterPorts {
        query: Arc::new(query),
        stream: Arc::new(stream),
        sink: Arc::new(sink),
        checkpoint: Arc::new(checkpoint),
    })
}

fn fail(e: IngestError) -> ExitCode {
    error!(error = %e, "Exporter stopped");
    ExitCode::from(e.exit_code())
}
