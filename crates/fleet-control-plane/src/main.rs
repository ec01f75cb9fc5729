//! Fleet Control Plane Server

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fleet_control_plane::cloud::MockManager;
use fleet_control_plane::{
    create_router, monitor, AppState, Args, CloudRegistry, Config, LogNotifier, Notifier, Seed,
    WebhookNotifier,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load config
    let config = Config::from(Args::parse());
    config.validate()?;
    let http_addr: SocketAddr = config.bind_addr.parse()?;

    let seed = match &config.seed_path {
        Some(path) => {
            let seed = Seed::load(path)
                .map_err(|e| format!("Failed to load seed from '{}': {}", path.display(), e))?;
            info!(path = %path.display(), "Seed file loaded");
            seed
        }
        None => Seed::default(),
    };

    // Mock instances must exist before the manager is handed to the registry
    let mock = MockManager::default();
    seed.register_mock_instances(&mock);
    let cloud = CloudRegistry::from_config(&config, mock)?;

    let notifier: Arc<dyn Notifier> = match &config.admin_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => {
            warn!("No admin webhook configured - notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let providers = cloud.providers();
    let state = AppState::new(config, cloud, notifier);
    seed.apply(&state).await;

    tokio::spawn(monitor::run_background(state.clone()));

    info!(http_addr = %http_addr, providers = ?providers, "Starting fleet control plane");

    let listener = TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    if let Err(e) = axum::serve(listener, create_router(state)).await {
        tracing::error!(error = %e, "HTTP server error");
    }

    Ok(())
}
