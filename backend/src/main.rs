//! Temporada Backend Server
//!
//! Serves the marketplace API: catalogue, reservations, payments, document
//! and voucher review, and the back office.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;

use temporada_server::auth::OAuthClient;
use temporada_server::config::Config;
use temporada_server::lifecycle::run_sweeper;
use temporada_server::middleware::RateLimiter;
use temporada_server::payment::StripeGateway;
use temporada_server::state::AppState;
use temporada_server::storage::HttpObjectStore;
use temporada_server::store::PgStore;
use temporada_server::{db, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        database = %config.database_url_masked(),
        "Starting Temporada server"
    );

    let db_pool = db::create_pool(&config)
        .await
        .context("Failed to connect to database")?;
    db::run_migrations(&db_pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database connected successfully");

    let store = Arc::new(PgStore::new(db_pool.clone()));
    let gateway = Arc::new(StripeGateway::from_config(&config));
    let object_store = Arc::new(HttpObjectStore::from_config(&config));
    let identity = Arc::new(OAuthClient::from_config(&config));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid HOST/PORT")?;
    let sweep_interval = Duration::from_secs(config.sweeper_interval_seconds);
    let rate_limiter = RateLimiter::new(config.rate_limit_rps);

    let app_state = AppState::build(config, db_pool, store, gateway, object_store, identity);

    tokio::spawn(run_sweeper(app_state.sweeper(), sweep_interval));
    tokio::spawn(rate_limiter.clone().run_cleanup(Duration::from_secs(60)));

    let app = routes::build_router(app_state, rate_limiter);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("WebSocket available at ws://{}/ws", addr);
    tracing::info!("Health check at http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
