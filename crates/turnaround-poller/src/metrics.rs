use std::time::Instant;

/// Which class of alert a delivery belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Possible,
    Confirmed,
    Stale,
    Recovered,
}

/// Structured telemetry for the poller.
/// Tracks per-cycle timing and aggregate delivery/check counters.
#[derive(Debug, Default)]
pub struct PollerMetrics {
    pub cycles_run: u64,
    pub possible_alerts: u64,
    pub confirmed_alerts: u64,
    pub stale_alerts: u64,
    pub recovery_alerts: u64,
    pub delivery_failures: u64,
    pub check_failures: u64,
    pub last_cycle_duration_ms: u64,
    log_interval_cycles: u64,
}

impl PollerMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            log_interval_cycles,
            ..Self::default()
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_alert(&mut self, kind: AlertKind, delivered: bool) {
        if !delivered {
            self.delivery_failures += 1;
            return;
        }
        match kind {
            AlertKind::Possible => self.possible_alerts += 1,
            AlertKind::Confirmed => self.confirmed_alerts += 1,
            AlertKind::Stale => self.stale_alerts += 1,
            AlertKind::Recovered => self.recovery_alerts += 1,
        }
    }

    pub fn record_check_failure(&mut self) {
        self.check_failures += 1;
    }

    pub fn alerts_sent(&self) -> u64 {
        self.possible_alerts + self.confirmed_alerts + self.stale_alerts + self.recovery_alerts
    }

    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_cycle_duration_ms = cycle_start.elapsed().as_millis() as u64;
        self.cycles_run += 1;

        if self.log_interval_cycles > 0 && self.cycles_run.is_multiple_of(self.log_interval_cycles) {
            self.log_metrics();
        }
    }

    /// Emit structured telemetry via tracing
    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            alerts_sent = self.alerts_sent(),
            possible_alerts = self.possible_alerts,
            confirmed_alerts = self.confirmed_alerts,
            stale_alerts = self.stale_alerts,
            recovery_alerts = self.recovery_alerts,
            delivery_failures = self.delivery_failures,
            check_failures = self.check_failures,
            last_cycle_ms = self.last_cycle_duration_ms,
            "Poller metrics summary"
        );
    }
}
