//! Staleness detection for the price snapshot stream.
//!
//! Two states with hysteresis: entering `Stale` alerts once, staying stale
//! re-alerts only after the cooldown, and leaving it sends a single recovery
//! notice.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessState {
    Fresh,
    Stale { last_alert: Instant },
}

/// What the caller should announce after an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessTransition {
    Unchanged,
    /// Fresh -> Stale.
    Entered,
    /// Still stale and the cooldown has elapsed.
    Reminder,
    /// Stale -> Fresh; `outage` is measured from the last staleness alert.
    Recovered { outage: Duration },
}

#[derive(Debug, Clone)]
pub struct StalenessTracker {
    state: StalenessState,
    threshold: Duration,
    cooldown: Duration,
}

impl StalenessTracker {
    pub fn new(threshold: Duration, cooldown: Duration) -> Self {
        Self {
            state: StalenessState::Fresh,
            threshold,
            cooldown,
        }
    }

    pub fn state(&self) -> StalenessState {
        self.state
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.state, StalenessState::Stale { .. })
    }

    /// Feed the current snapshot age and advance the state machine.
    pub fn observe(&mut self, age: Duration, now: Instant) -> StalenessTransition {
        match (self.state, age > self.threshold) {
            (StalenessState::Fresh, true) => {
                self.state = StalenessState::Stale { last_alert: now };
                StalenessTransition::Entered
            }
            (StalenessState::Stale { last_alert }, true) => {
                if now.saturating_duration_since(last_alert) > self.cooldown {
                    self.state = StalenessState::Stale { last_alert: now };
                    StalenessTransition::Reminder
                } else {
                    StalenessTransition::Unchanged
                }
            }
            (StalenessState::Stale { last_alert }, false) => {
                self.state = StalenessState::Fresh;
                StalenessTransition::Recovered {
                    outage: now.saturating_duration_since(last_alert),
                }
            }
            (StalenessState::Fresh, false) => StalenessTransition::Unchanged,
        }
    }
}

/// Whole minutes for display, never less than one.
pub fn display_minutes(duration: Duration) -> u64 {
    (duration.as_secs() / 60).max(1)
}
