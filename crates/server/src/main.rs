mod api;
mod bootstrap;
mod health;
mod webhook;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;

use cadence_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use cadence_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    tokio::spawn(Arc::clone(&app.engine.scheduler).run());
    tracing::info!(
        event_name = "scheduler_started",
        drain_interval_secs = app.config.scheduler.drain_interval_secs,
        "queue scheduler started"
    );

    let router = Router::new()
        .merge(webhook::router(webhook::WebhookState {
            ingestor: Arc::clone(&app.engine.ingestor),
        }))
        .merge(api::router(api::ApiState {
            queue: Arc::clone(&app.engine.queue),
            channels: Arc::clone(&app.engine.channels),
            transport: Arc::clone(&app.engine.transport),
        }));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "server_started",
        bind_address = %address,
        "cadence-server started"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(event_name = "server_stopping", "cadence-server stopping");
    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
