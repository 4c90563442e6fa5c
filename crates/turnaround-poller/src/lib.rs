pub mod config;
pub mod messages;
pub mod metrics;
pub mod poller;
pub mod staleness;
pub mod store;

pub use config::{DatabaseConfig, PollerConfig};
pub use metrics::PollerMetrics;
pub use poller::Poller;
pub use staleness::{StalenessState, StalenessTracker, StalenessTransition};
pub use store::{ConfirmedTurnaround, EventStore, Freshness, PgEventStore, PossibleTurnaround};
