use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    // Scheduling
    pub poll_interval_seconds: u64,        // 30
    pub staleness_every_cycles: u64,       // 2 (staleness runs every other cycle)

    // Staleness detection
    pub stale_threshold_seconds: u64,      // 900 (15 minutes)
    pub stale_cooldown_seconds: u64,       // 900 (re-alert at most every 15 minutes)

    // Confirmed turnaround lookback
    pub confirmed_lookback: i64,           // 20 rows per cycle
    pub bootstrap_lookback: i64,           // 50 rows at startup

    // Telemetry
    pub metrics_log_interval_cycles: u64,  // 20
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            staleness_every_cycles: 2,
            stale_threshold_seconds: 900,
            stale_cooldown_seconds: 900,
            confirmed_lookback: 20,
            bootstrap_lookback: 50,
            metrics_log_interval_cycles: 20,
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            poll_interval_seconds: env::var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("POLL_INTERVAL_SECS must be an integer")?,
            staleness_every_cycles: env::var("STALENESS_EVERY_CYCLES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("STALENESS_EVERY_CYCLES must be an integer")?,
            stale_threshold_seconds: env::var("STALE_THRESHOLD_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .context("STALE_THRESHOLD_SECS must be an integer")?,
            stale_cooldown_seconds: env::var("STALE_COOLDOWN_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .context("STALE_COOLDOWN_SECS must be an integer")?,
            confirmed_lookback: env::var("CONFIRMED_LOOKBACK")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("CONFIRMED_LOOKBACK must be an integer")?,
            bootstrap_lookback: env::var("BOOTSTRAP_LOOKBACK")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("BOOTSTRAP_LOOKBACK must be an integer")?,
            metrics_log_interval_cycles: env::var("METRICS_LOG_INTERVAL_CYCLES")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("METRICS_LOG_INTERVAL_CYCLES must be an integer")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_seconds == 0 {
            bail!("POLL_INTERVAL_SECS must be greater than zero");
        }
        if self.staleness_every_cycles == 0 {
            bail!("STALENESS_EVERY_CYCLES must be greater than zero");
        }
        if self.confirmed_lookback <= 0 || self.bootstrap_lookback <= 0 {
            bail!("CONFIRMED_LOOKBACK and BOOTSTRAP_LOOKBACK must be positive");
        }
        // A shorter baseline leaves rows in the per-cycle window that were never seen
        if self.bootstrap_lookback < self.confirmed_lookback {
            bail!(
                "BOOTSTRAP_LOOKBACK ({}) must be at least CONFIRMED_LOOKBACK ({})",
                self.bootstrap_lookback,
                self.confirmed_lookback
            );
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_seconds)
    }

    pub fn stale_cooldown(&self) -> Duration {
        Duration::from_secs(self.stale_cooldown_seconds)
    }
}

/// PostgreSQL connection settings for the datastore the poller reads.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub schema: String,
    pub max_connections: u32,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("schema", &self.schema)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("DB_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()
                .context("DB_PORT must be a port number")?,
            database: env::var("DB_NAME").unwrap_or_else(|_| "polymarket".to_string()),
            user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: env::var("DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
            schema: env::var("DB_SCHEMA").unwrap_or_else(|_| "polymarket".to_string()),
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("DB_MAX_CONNECTIONS must be an integer")?,
        })
    }

    /// Connection options; `DATABASE_URL` wins over the discrete `DB_*` settings.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match &self.database_url {
            Some(url) => url.parse().context("Invalid DATABASE_URL"),
            None => Ok(PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .database(&self.database)
                .username(&self.user)
                .password(&self.password)),
        }
    }

    /// Human-readable target for logs, never including credentials.
    pub fn display_target(&self) -> String {
        match &self.database_url {
            Some(_) => "DATABASE_URL".to_string(),
            None => format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database),
        }
    }
}
