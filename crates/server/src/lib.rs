//! Convo Chat Server Library
//!
//! Realtime delivery and presence for a chat backend: a WebSocket hub that
//! tracks connections, rooms and typing, plus the HTTP API that feeds it.

pub mod chat;
pub mod core;
pub mod realtime;

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::core::store::SqliteStore;
use crate::core::{AppState, ServerConfig};

/// Assemble the full application router for the given state.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(state.config.frontend_url.as_deref());

    Router::new()
        .merge(crate::core::router())
        .merge(crate::chat::router(state.clone()))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    match frontend_url.map(http::HeaderValue::from_str) {
        Some(Ok(origin)) => CorsLayer::permissive().allow_origin(AllowOrigin::exact(origin)),
        Some(Err(e)) => {
            warn!("[Config] FRONTEND_URL is not a valid origin ({}), allowing any", e);
            CorsLayer::permissive()
        }
        None => CorsLayer::permissive(),
    }
}

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,convo_server=debug")),
        )
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    let config = ServerConfig::from_env();
    info!("=== Convo Server ===");
    info!("Database: {}", config.database_url);
    match config.typing_timeout {
        Some(timeout) => info!("Typing auto-stop after {:?}", timeout),
        None => info!("Typing auto-stop disabled"),
    }

    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);

    let addr = config.http_addr;
    let state = AppState::new(config, store.clone());
    let hub = state.hub.clone();

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, draining side effects");
    hub.shutdown().await;
    store.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
