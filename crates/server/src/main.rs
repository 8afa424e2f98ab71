//! slotvote server entry point.

use std::sync::Arc;

use axum::{Router, routing::get};
use slotvote_api::{LiveRegistry, live_handler, middleware::AppState, router as api_router};
use slotvote_common::Config;
use slotvote_core::VoteService;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotvote=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting slotvote server...");

    let config = Config::load()?;

    info!("Connecting to database...");
    let db = slotvote_db::init(&config.database).await?;

    info!("Running migrations...");
    slotvote_db::migrate(&db).await?;

    let live = LiveRegistry::new();
    let vote_service = VoteService::new(Arc::new(db), config.database.lock_timeout_ms)
        .with_publisher(Arc::new(live.clone()));

    let state = AppState {
        vote_service,
        live,
        live_config: config.live.clone(),
    };

    let app = Router::new()
        .route("/live", get(live_handler))
        .nest("/api", api_router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
