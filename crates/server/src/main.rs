mod bootstrap;
mod health;
mod services;
mod sweep;
mod webhook;

use anyhow::Result;
use remedi_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use remedi_core::config::LogFormat::*;
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
    // Load config and initialize logging before any other operations.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    webhook::spawn(
        &app.config.server.bind_address,
        app.config.server.webhook_port,
        app.controller.clone(),
    )
    .await?;

    sweep::spawn(
        app.db_pool.clone(),
        app.config.session.attachment_ttl_minutes,
        app.config.session.sweep_interval_minutes,
        app.audit.clone(),
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        subject_id = "unknown",
        "remedi-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        subject_id = "unknown",
        "remedi-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
