use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use payflow_core::config::{AppConfig, LoadOptions};
use payflow_core::stages::SweepPolicy;
use payflow_db::repositories::SqlPaymentRequestRepository;
use payflow_server::{bootstrap_with_config, health, StageScheduler};

fn init_logging(config: &AppConfig) {
    use payflow_core::config::LogFormat::*;
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

    let app = bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let scheduler_handle = if app.config.scheduler.enabled {
        let policy = SweepPolicy {
            stage_expiry: chrono::Duration::hours(app.config.scheduler.draft_expiry_hours),
            trash_retention: chrono::Duration::days(app.config.scheduler.trash_retention_days),
        };
        let requests = Arc::new(SqlPaymentRequestRepository::new(app.db_pool.clone()));
        let scheduler = Arc::new(StageScheduler::new(requests, policy));
        let handle = scheduler.spawn(Duration::from_secs(app.config.scheduler.tick_secs));
        tracing::info!(
            event_name = "system.scheduler.started",
            tick_secs = app.config.scheduler.tick_secs,
            "stage scheduler started"
        );
        Some(handle)
    } else {
        tracing::info!(
            event_name = "system.scheduler.disabled",
            "stage scheduler disabled by configuration"
        );
        None
    };

    tracing::info!(event_name = "system.server.started", "payflow-server started");
    wait_for_shutdown().await?;
    tracing::info!(event_name = "system.server.stopping", "payflow-server stopping");

    if let Some(handle) = scheduler_handle {
        handle.abort();
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
