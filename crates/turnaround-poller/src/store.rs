use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;

/// A market currently flagged as a possible turnaround.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PossibleTurnaround {
    pub market_id: i64,
    pub question: String,
    pub min_up: Option<f64>,
    pub min_down: Option<f64>,
    pub last_up_price: Option<f64>,
    pub last_down_price: Option<f64>,
}

/// A finalized turnaround from the confirmed log.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ConfirmedTurnaround {
    pub id: i64,
    pub question: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Age of the newest price snapshot, measured by the datastore clock.
#[derive(Debug, Clone, PartialEq)]
pub struct Freshness {
    pub age: Duration,
    pub last_observed: DateTime<Utc>,
}

/// Read-only view over the turnaround datastore.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn possible_turnaround_ids(&self) -> Result<Vec<i64>>;

    async fn possible_turnarounds(&self) -> Result<Vec<PossibleTurnaround>>;

    /// Most recent confirmed turnarounds, newest first.
    async fn confirmed_turnarounds(&self, limit: i64) -> Result<Vec<ConfirmedTurnaround>>;

    /// `None` when the snapshot stream holds no rows yet.
    async fn latest_snapshot(&self) -> Result<Option<Freshness>>;
}

/// PostgreSQL-backed store. Every query checks a connection out of the pool and
/// returns it as soon as the rows are read.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
    schema: String,
}

impl PgEventStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        validate_identifier(&schema)?;
        Ok(Self { pool, schema })
    }
}

/// Schema names are spliced into SQL text, so only plain identifiers pass.
fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') || name.len() > 63 {
        bail!("Invalid schema name: {:?}", name);
    }
    Ok(())
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn possible_turnaround_ids(&self) -> Result<Vec<i64>> {
        let ids: Vec<(i64,)> = sqlx::query_as(&format!(
            "SELECT market_id::bigint FROM {}.posible_turnarounds",
            self.schema
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn possible_turnarounds(&self) -> Result<Vec<PossibleTurnaround>> {
        let rows = sqlx::query_as::<_, PossibleTurnaround>(&format!(
            r#"
            SELECT market_id::bigint AS market_id,
                   question,
                   min_up::float8 AS min_up,
                   min_down::float8 AS min_down,
                   last_up_price::float8 AS last_up_price,
                   last_down_price::float8 AS last_down_price
            FROM {}.posible_turnarounds
            "#,
            self.schema
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn confirmed_turnarounds(&self, limit: i64) -> Result<Vec<ConfirmedTurnaround>> {
        let rows = sqlx::query_as::<_, ConfirmedTurnaround>(&format!(
            r#"
            SELECT id::bigint AS id,
                   question,
                   start_time::timestamptz AS start_time,
                   end_time::timestamptz AS end_time
            FROM {}.confirmed_turnarounds
            ORDER BY id DESC
            LIMIT $1
            "#,
            self.schema
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn latest_snapshot(&self) -> Result<Option<Freshness>> {
        let (age_seconds, last_ts): (Option<f64>, Option<DateTime<Utc>>) =
            sqlx::query_as(&format!(
                r#"
                SELECT EXTRACT(EPOCH FROM (now() - max("timestamp")))::float8 AS age_seconds,
                       max("timestamp")::timestamptz AS last_ts
                FROM {}.price_snapshots
                "#,
                self.schema
            ))
            .fetch_one(&self.pool)
            .await?;

        Ok(freshness_from_row(age_seconds, last_ts))
    }
}

fn freshness_from_row(
    age_seconds: Option<f64>,
    last_ts: Option<DateTime<Utc>>,
) -> Option<Freshness> {
    let (age_seconds, last_observed) = (age_seconds?, last_ts?);
    // Snapshots stamped ahead of the database clock count as brand new
    let age = if age_seconds.is_finite() && age_seconds > 0.0 {
        Duration::from_secs_f64(age_seconds)
    } else {
        Duration::ZERO
    };
    Some(Freshness { age, last_observed })
}
