use rootcause::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use thor_server::{app, config::ServerConfig, db::PgStore, error::StartupError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Report<StartupError>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load().map_err(|e| StartupError::Config {
        reason: e.to_string(),
    })?;
    tracing::info!(app_url = %config.app_url, "loaded configuration");
    tracing::debug!(config = ?config);

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(config.request_timeout())
        .connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Database {
            reason: e.to_string(),
        })?;

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| StartupError::Migration {
            reason: e.to_string(),
        })?;

    let state = app::build_state(&config, Arc::new(PgStore::new(db_pool))).await?;
    let router = app::router(state, config.request_timeout());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: config.listen_addr.clone(),
            reason: e.to_string(),
        })?;
    tracing::info!("listening on {}", config.listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Serve {
            reason: e.to_string(),
        })?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
