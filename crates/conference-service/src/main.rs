//! Conference Service
//!
//! Entry point for the voice conference orchestrator daemon.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Install the Prometheus metrics recorder (standalone exporter)
//! 3. Connect the database pool (statement timeout, bounded lifetimes)
//! 4. Connect the Redis event publisher
//! 5. Connect and subscribe the switch event-socket client
//! 6. Spawn the reconciler and the four periodic tasks under child
//!    cancellation tokens
//! 7. Wait for shutdown signal, cancel, drain briefly, exit

#![warn(clippy::pedantic)]

use conference_service::config::Config;
use conference_service::events::{EventPublisher, RedisEventPublisher};
use conference_service::observability::metrics;
use conference_service::reconciler::Reconciler;
use conference_service::tasks::{
    start_empty_conference_monitor, start_recurrence_scheduler, start_reminder_scheduler,
    start_stale_conference_janitor, JanitorConfig, MonitorConfig,
};
use std::sync::Arc;
use std::time::Duration;
use switch_events::tcp::{SwitchSocketConfig, TcpSwitchClient};
use switch_events::{SwitchClient, SwitchEventType};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Statement timeout applied to every database query, in seconds.
const DB_STATEMENT_TIMEOUT_SECS: u32 = 5;

/// Grace window for in-flight task iterations after cancellation.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conference_service=debug,switch_events=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conference Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        switch_address = %config.switch_address,
        event_channel = %config.event_channel,
        metrics_bind_address = %config.metrics_bind_address,
        monitor_interval_secs = config.monitor_interval.as_secs(),
        reminder_interval_secs = config.reminder_interval.as_secs(),
        janitor_interval_secs = config.janitor_interval.as_secs(),
        max_conference_age_hours = config.max_conference_age_hours,
        "Configuration loaded successfully"
    );

    // Install the Prometheus recorder before any metrics are recorded
    metrics::init_metrics_recorder(&config.metrics_bind_address)
        .map_err(|e| anyhow::anyhow!(e))?;
    info!(addr = %config.metrics_bind_address, "Metrics exporter started");

    // Initialize database connection pool with query timeout
    info!("Connecting to database...");
    let db_url_with_timeout = add_query_timeout(&config.database_url, DB_STATEMENT_TIMEOUT_SECS);
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_url_with_timeout)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    info!("Database connection established");

    // Connect the event publisher
    info!("Connecting to event bus...");
    let publisher: Arc<dyn EventPublisher> = Arc::new(
        RedisEventPublisher::connect(&config.redis_url, config.event_channel.clone())
            .await
            .map_err(|e| {
                error!("Failed to connect event publisher: {}", e);
                anyhow::anyhow!(e.to_string())
            })?,
    );
    info!("Event bus connection established");

    // Connect the switch event socket and subscribe
    info!(address = %config.switch_address, "Connecting to telephony switch...");
    let mut socket_config = SwitchSocketConfig::new(
        config.switch_address.clone(),
        config.switch_password.clone(),
    );
    socket_config.query_timeout = config.switch_query_timeout;

    let switch: Arc<dyn SwitchClient> = Arc::new(
        TcpSwitchClient::connect(socket_config).await.map_err(|e| {
            error!("Failed to connect to switch: {}", e);
            anyhow::anyhow!(e.to_string())
        })?,
    );

    let switch_events = switch
        .subscribe(&[
            SwitchEventType::ChannelCreate,
            SwitchEventType::ChannelAnswer,
            SwitchEventType::ChannelHangup,
            SwitchEventType::ConferenceMemberAdd,
            SwitchEventType::ConferenceMemberFlags,
        ])
        .await
        .map_err(|e| {
            error!("Failed to subscribe to switch events: {}", e);
            anyhow::anyhow!(e.to_string())
        })?;
    info!("Subscribed to switch events");

    // Spawn the reconciler and the periodic tasks under child tokens
    let shutdown_token = CancellationToken::new();

    let reconciler = Reconciler::new(
        pool.clone(),
        Arc::clone(&switch),
        Arc::clone(&publisher),
        config.switch_query_timeout,
    );
    tokio::spawn(reconciler.run(switch_events, shutdown_token.child_token()));

    tokio::spawn(start_empty_conference_monitor(
        pool.clone(),
        Arc::clone(&switch),
        Arc::clone(&publisher),
        MonitorConfig {
            interval: config.monitor_interval,
            connect_timeout: config.connect_timeout,
            empty_timeout: config.empty_timeout,
            switch_query_timeout: config.switch_query_timeout,
        },
        shutdown_token.child_token(),
    ));

    tokio::spawn(start_reminder_scheduler(
        pool.clone(),
        Arc::clone(&publisher),
        config.reminder_interval,
        shutdown_token.child_token(),
    ));

    tokio::spawn(start_stale_conference_janitor(
        pool.clone(),
        Arc::clone(&publisher),
        JanitorConfig {
            interval: config.janitor_interval,
            max_age_hours: config.max_conference_age_hours,
        },
        shutdown_token.child_token(),
    ));

    tokio::spawn(start_recurrence_scheduler(
        pool.clone(),
        config.recurrence_interval,
        shutdown_token.child_token(),
    ));

    info!("Conference Service running - press Ctrl+C to shutdown");

    // Wait for shutdown signal
    shutdown_signal().await;

    // Propagate cancellation to the reconciler and every task, then give
    // in-flight iterations a moment to finish or roll back.
    info!("Shutdown signal received, initiating graceful shutdown...");
    shutdown_token.cancel();
    tokio::time::sleep(SHUTDOWN_DRAIN).await;

    info!("Conference Service shutdown complete");
    Ok(())
}

/// Adds statement_timeout to the database URL.
/// This ensures queries don't hang indefinitely.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
