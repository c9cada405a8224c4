mod config;
mod env;
mod handlers;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bucketdemo_common::{set_default_retry_params, Storage};

use config::ServerConfig;
use env::ProcessEnv;
use state::AppState;

const DEFAULT_CONFIG_PATH: &str = "bucketdemo.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    info!("bucketdemo-server starting");

    // Explicit config path: first argument, then BUCKETDEMO_CONFIG
    let explicit_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BUCKETDEMO_CONFIG").ok());
    let config = match explicit_path {
        Some(path) => ServerConfig::load(Path::new(&path))?,
        None => ServerConfig::load_or_default(Path::new(DEFAULT_CONFIG_PATH))?,
    };

    let retry_params = config.retry.to_params()?;
    info!(
        initial_delay_ms = retry_params.initial_delay.as_millis() as u64,
        max_delay_ms = retry_params.max_delay.as_millis() as u64,
        backoff_factor = retry_params.backoff_factor,
        max_retry_period_s = retry_params.max_retry_period.as_secs_f64(),
        "Default retry params set"
    );
    set_default_retry_params(retry_params)?;

    let backend = bucketdemo_backend::from_config(&config.backend)?;
    info!(backend = ?config.backend, "Storage backend ready");

    // Cancelled on Ctrl+C so pending retry waits do not hold up shutdown
    let shutdown = CancellationToken::new();
    let storage = Storage::new(backend).with_cancellation(shutdown.clone());
    let state = Arc::new(AppState::new(
        storage,
        config.default_bucket.clone(),
        Arc::new(ProcessEnv),
    ));

    let app = routes::build_router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port = config.port, "Listening on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("bucketdemo-server stopped");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal");
    token.cancel();
}
