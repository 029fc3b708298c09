use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modreport_core::{
    load_config, load_config_from_env, validate_config, AdmissionQueue, BridgeBrowser, Browser,
    Config, ConfigError, MessageRouter, ReportOrchestrator,
};
use modreport_server::api::create_router;
use modreport_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("modreport {} starting", VERSION);

    // Determine config path
    let config_path = std::env::var("MODREPORT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration; a missing file means defaults (plus env overrides)
    info!("Loading configuration from {:?}", config_path);
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound(_)) => {
            info!("No configuration file found, using defaults");
            load_config_from_env().context("Failed to load configuration from environment")?
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to load config from {:?}", config_path));
        }
    };

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;
    log_config(&config);

    // Admission queue
    let queue = Arc::new(AdmissionQueue::new(&config.queue));
    queue.start().await;
    info!("Admission queue started");

    // Browser bridge (the shim attaches over /api/v1/bridge)
    let bridge = Arc::new(BridgeBrowser::new(config.bridge.command_timeout()));
    let browser: Arc<dyn Browser> = bridge.clone();

    // Report pipeline
    let orchestrator = Arc::new(ReportOrchestrator::new(
        &config,
        Arc::clone(&queue),
        Arc::clone(&browser),
    ));
    let router = Arc::new(MessageRouter::new(Arc::clone(&orchestrator), browser));

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&queue),
        bridge,
        orchestrator,
        router,
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown; the queue closes before the drain
    let shutdown_queue = Arc::clone(&queue);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Server shutting down...");
            shutdown_queue.stop().await;
            info!("Admission queue stopped");
        })
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

fn log_config(config: &Config) {
    info!(
        release_interval_ms = config.queue.release_interval_ms,
        capacity = config.queue.capacity,
        entry_timeout_ms = config.queue.entry_timeout().as_millis() as u64,
        "Queue configured"
    );
    info!(
        load_timeout_ms = config.tabs.load_timeout_ms,
        submit_dwell_ms = config.page.submit_dwell_ms,
        ack_timeout_ms = config.page.ack_timeout_ms,
        "Report timings configured"
    );
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
