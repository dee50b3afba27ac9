//! # Compose Gateway
//!
//! WebSocket relay between SDK processes and browser sessions, plus a
//! small HTTP surface for health checks and operator diagnostics.

mod api;
mod db;
mod services;
mod ws;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::db::postgres::PgStore;
use crate::db::Store;
use crate::services::api_key::ApiKeyHasher;
use crate::services::error_log::TracingErrorLog;
use crate::services::session::JwtSessionValidator;
use crate::ws::Gateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    let config = cg_common::AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .json()
        .init();

    tracing::info!("Starting Compose gateway...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    tracing::info!("Connected to PostgreSQL");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let validator = Arc::new(JwtSessionValidator::new(store.clone(), &config.auth));

    let gateway = Arc::new(Gateway::new(
        &config.gateway,
        store,
        validator,
        ApiKeyHasher::new(config.auth.api_key_secret.as_str()),
        Arc::new(TracingErrorLog),
    ));

    if config.server.internal_token.is_none() {
        tracing::info!("No internal token configured, internal routes disabled");
    }

    let app = gateway
        .router()
        .merge(api::router(
            gateway.clone(),
            config.server.internal_token.clone(),
        ))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(gateway))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, after every socket has been told to
/// reconnect elsewhere.
async fn shutdown_signal(gateway: Arc<Gateway>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    gateway.handle_sigterm().await;
}
