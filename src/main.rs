use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use editgate::admission::AdmissionController;
use editgate::backend::{EditBackend, ForwardingBackend, UnavailableBackend};
use editgate::config::{EditGateConfig, LogFormat};
use editgate::http::{AppState, HttpServer};

/// Admission-controlled gateway for the image edit service.
#[derive(Debug, Parser)]
#[command(name = "editgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = EditGateConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.http_addr {
        config.server.http_addr = addr;
    }

    init_tracing(config.logging.format);

    info!("Starting Editgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        max_requests_per_window = config.rate_limiting.max_requests_per_window,
        failure_threshold = config.circuit_breaker.failure_threshold,
        max_global_requests = config.load_shedding.max_global_requests,
        "Configuration loaded"
    );

    let controller = Arc::new(AdmissionController::new(&config));
    info!("Admission controller initialized");

    let backend: Arc<dyn EditBackend> = match config.upstream.url.as_deref() {
        Some(url) => {
            info!(url = %url, "Forwarding edits upstream");
            Arc::new(ForwardingBackend::new(url, config.upstream.timeout())?)
        }
        None => {
            warn!("No upstream configured, every edit will fail");
            Arc::new(UnavailableBackend)
        }
    };

    let state = AppState {
        controller,
        backend,
        upstream_timeout: config.upstream.timeout(),
    };

    HttpServer::new(config.server.http_addr, state)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Editgate stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
