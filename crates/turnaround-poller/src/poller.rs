use std::collections::HashSet;
use std::future::Future;

use anyhow::{Context, Result};
use notification_service::Notifier;
use tokio::time::{self, Instant};

use crate::config::PollerConfig;
use crate::messages;
use crate::metrics::{AlertKind, PollerMetrics};
use crate::staleness::{StalenessTracker, StalenessTransition};
use crate::store::EventStore;

/// Polls the datastore and announces new turnarounds and snapshot staleness.
///
/// All dedup state lives in memory and is rebuilt by [`Poller::bootstrap`] on
/// every start; the datastore is the source of truth.
pub struct Poller<S: EventStore> {
    store: S,
    notifier: Notifier,
    config: PollerConfig,
    /// Mirror of the possible-turnaround view as of the last successful check.
    seen_possible: HashSet<i64>,
    /// Every confirmed id seen since start; never shrinks.
    seen_confirmed: HashSet<i64>,
    staleness: StalenessTracker,
    metrics: PollerMetrics,
    cycle: u64,
}

impl<S: EventStore> Poller<S> {
    pub fn new(store: S, notifier: Notifier, config: PollerConfig) -> Self {
        let staleness = StalenessTracker::new(config.stale_threshold(), config.stale_cooldown());
        let metrics = PollerMetrics::new(config.metrics_log_interval_cycles);
        Self {
            store,
            notifier,
            config,
            seen_possible: HashSet::new(),
            seen_confirmed: HashSet::new(),
            staleness,
            metrics,
            cycle: 0,
        }
    }

    pub fn metrics(&self) -> &PollerMetrics {
        &self.metrics
    }

    pub fn staleness(&self) -> &StalenessTracker {
        &self.staleness
    }

    /// Hand back the notifier so the caller can close it.
    pub fn into_notifier(self) -> Notifier {
        self.notifier
    }

    /// Seed the seen sets from current datastore state so existing rows are not
    /// re-announced on restart.
    pub async fn bootstrap(&mut self) -> Result<()> {
        let possible = self
            .store
            .possible_turnaround_ids()
            .await
            .context("Failed to load possible turnarounds")?;
        self.seen_possible = possible.into_iter().collect();
        tracing::info!("Bootstrapped {} possible turnarounds", self.seen_possible.len());

        let confirmed = self
            .store
            .confirmed_turnarounds(self.config.bootstrap_lookback)
            .await
            .context("Failed to load confirmed turnarounds")?;
        self.seen_confirmed = confirmed.into_iter().map(|row| row.id).collect();
        tracing::info!(
            "Bootstrapped {} confirmed turnarounds",
            self.seen_confirmed.len()
        );

        Ok(())
    }

    /// Alert on ids absent from the previous result, then mirror the current view.
    pub async fn check_possible_turnarounds(&mut self) -> Result<usize> {
        let rows = self.store.possible_turnarounds().await?;

        let current: HashSet<i64> = rows.iter().map(|row| row.market_id).collect();
        let mut new_ids: HashSet<i64> = current.difference(&self.seen_possible).copied().collect();

        let mut sent = 0;
        for row in &rows {
            if !new_ids.remove(&row.market_id) {
                continue;
            }
            tracing::info!("New possible turnaround: market {}", row.market_id);
            let delivered = self.notifier.send(&messages::possible_turnaround(row)).await;
            self.metrics.record_alert(AlertKind::Possible, delivered);
            sent += 1;
        }

        // Replace, not merge: a market that drops out and comes back alerts again
        self.seen_possible = current;
        Ok(sent)
    }

    /// Alert once per confirmed id; the set only grows.
    pub async fn check_confirmed_turnarounds(&mut self) -> Result<usize> {
        let rows = self
            .store
            .confirmed_turnarounds(self.config.confirmed_lookback)
            .await?;

        let mut sent = 0;
        for row in &rows {
            if !self.seen_confirmed.insert(row.id) {
                continue;
            }
            tracing::info!("New confirmed turnaround: id {}", row.id);
            let delivered = self.notifier.send(&messages::confirmed_turnaround(row)).await;
            self.metrics.record_alert(AlertKind::Confirmed, delivered);
            sent += 1;
        }

        Ok(sent)
    }

    pub async fn check_data_staleness(&mut self) -> Result<StalenessTransition> {
        let Some(freshness) = self.store.latest_snapshot().await? else {
            tracing::debug!("No price snapshots yet, skipping staleness check");
            return Ok(StalenessTransition::Unchanged);
        };

        let transition = self.staleness.observe(freshness.age, Instant::now());
        match transition {
            StalenessTransition::Entered | StalenessTransition::Reminder => {
                tracing::warn!(
                    "Price snapshots stale for {}s (last {})",
                    freshness.age.as_secs(),
                    freshness.last_observed
                );
                let msg = messages::data_stale(freshness.age, freshness.last_observed);
                let delivered = self.notifier.send(&msg).await;
                self.metrics.record_alert(AlertKind::Stale, delivered);
            }
            StalenessTransition::Recovered { outage } => {
                tracing::info!("Price snapshots resumed after ~{}s", outage.as_secs());
                let delivered = self.notifier.send(&messages::data_restored(outage)).await;
                self.metrics.record_alert(AlertKind::Recovered, delivered);
            }
            StalenessTransition::Unchanged => {}
        }

        Ok(transition)
    }

    /// One scheduler tick. A failing check is logged and the remaining checks still run.
    pub async fn run_cycle(&mut self) {
        let cycle_start = PollerMetrics::start_timer();

        if let Err(e) = self.check_possible_turnarounds().await {
            tracing::error!("Error checking possible turnarounds: {:#}", e);
            self.metrics.record_check_failure();
        }

        if let Err(e) = self.check_confirmed_turnarounds().await {
            tracing::error!("Error checking confirmed turnarounds: {:#}", e);
            self.metrics.record_check_failure();
        }

        if self.cycle.is_multiple_of(self.config.staleness_every_cycles) {
            if let Err(e) = self.check_data_staleness().await {
                tracing::error!("Error checking data staleness: {:#}", e);
                self.metrics.record_check_failure();
            }
        }

        self.cycle += 1;
        self.metrics.finish_cycle(cycle_start);
    }

    /// Bootstrap, then poll until `shutdown` resolves.
    ///
    /// Shutdown is observed at the inter-cycle sleep; a cycle in progress runs to
    /// completion first.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Turnaround poller starting...");
        self.bootstrap().await.context("Poller bootstrap failed")?;
        tracing::info!(
            "Turnaround poller running (every {}s, staleness every {} cycles)",
            self.config.poll_interval_seconds,
            self.config.staleness_every_cycles
        );

        tokio::pin!(shutdown);
        let interval = self.config.poll_interval();

        loop {
            self.run_cycle().await;

            tokio::select! {
                _ = time::sleep(interval) => {}
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping poller");
                    break;
                }
            }
        }

        self.metrics.log_metrics();
        Ok(())
    }
}
