//! Telegram HTML message bodies.
//!
//! Question text is passed through as stored; only the markup emitted here is
//! guaranteed to be well formed.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::staleness::display_minutes;
use crate::store::{ConfirmedTurnaround, PossibleTurnaround};

fn price(value: Option<f64>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}

pub fn possible_turnaround(row: &PossibleTurnaround) -> String {
    format!(
        "\u{1f504} <b>Possible turnaround detected</b>\n\n\
         {}\n\
         UP: {} \u{2192} {} | DOWN: {} \u{2192} {}",
        row.question,
        price(row.min_up),
        price(row.last_up_price),
        price(row.min_down),
        price(row.last_down_price),
    )
}

pub fn confirmed_turnaround(row: &ConfirmedTurnaround) -> String {
    let window = match (row.start_time, row.end_time) {
        (Some(start), Some(end)) => {
            let end_fmt = if end.date_naive() == start.date_naive() {
                "%H:%M"
            } else {
                "%Y-%m-%d %H:%M"
            };
            format!(
                "\nWindow: {} \u{2013} {} UTC",
                start.format("%Y-%m-%d %H:%M"),
                end.format(end_fmt)
            )
        }
        _ => String::new(),
    };

    format!(
        "\u{2705} <b>Turnaround confirmed!</b>\n\n\
         {}\n\
         Market ID: {}{}",
        row.question, row.id, window
    )
}

pub fn data_stale(age: Duration, last_observed: DateTime<Utc>) -> String {
    format!(
        "\u{26a0}\u{fe0f} <b>No data for {}+ minutes</b>\n\n\
         Last snapshot: {}",
        age.as_secs() / 60,
        last_observed.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

pub fn data_restored(outage: Duration) -> String {
    format!(
        "\u{2705} <b>Data restored</b>\n\n\
         Outage: ~{} minutes",
        display_minutes(outage)
    )
}
