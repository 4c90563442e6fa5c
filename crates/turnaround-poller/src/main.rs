use anyhow::{Context, Result};
use notification_service::{NotificationConfig, Notifier};
use sqlx::postgres::PgPoolOptions;
use tokio::signal::unix::{signal, SignalKind};

use turnaround_poller::{DatabaseConfig, PgEventStore, Poller, PollerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting turnaround notification poller");

    // 2. Load configuration
    let config = PollerConfig::from_env()?;
    let db_config = DatabaseConfig::from_env()?;
    let notification_config = NotificationConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Poll interval: {}s", config.poll_interval_seconds);
    tracing::info!(
        "  Staleness: threshold {}s, cooldown {}s, every {} cycles",
        config.stale_threshold_seconds,
        config.stale_cooldown_seconds,
        config.staleness_every_cycles
    );
    tracing::info!(
        "  Confirmed lookback: {} (bootstrap {})",
        config.confirmed_lookback,
        config.bootstrap_lookback
    );

    // 3. Connect the datastore pool
    tracing::info!("Connecting to PostgreSQL ({})...", db_config.display_target());
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect_with(db_config.connect_options()?)
        .await
        .context("Failed to connect to database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database connectivity check failed: {}", e))?;
    tracing::info!("Startup check: database OK (schema {})", db_config.schema);

    let store = PgEventStore::new(pool.clone(), db_config.schema.clone())?;

    // 4. Notifier
    let notifier = Notifier::telegram(&notification_config)?;

    // 5. Run until SIGINT / SIGTERM
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };

    let mut poller = Poller::new(store, notifier, config);
    let result = poller.run(shutdown).await;

    poller.into_notifier().close().await;
    pool.close().await;
    tracing::info!("Database connection closed");

    result?;
    tracing::info!("Turnaround poller shut down.");
    Ok(())
}
