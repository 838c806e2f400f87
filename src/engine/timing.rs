// src/engine/timing.rs

//! Countdown arithmetic. Remaining time is always derived from
//! `started_at + duration - now`, never from a client-decremented counter.

use chrono::{DateTime, Utc};

/// Whole seconds elapsed since `started_at`, never negative.
pub fn elapsed_seconds(started_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - started_at).num_seconds().max(0)
}

/// `max(0, duration - (now - started_at))`, or `None` when untimed.
pub fn remaining_seconds(
    started_at: DateTime<Utc>,
    duration_seconds: Option<i64>,
    now: DateTime<Utc>,
) -> Option<i64> {
    duration_seconds.map(|d| (d - elapsed_seconds(started_at, now)).max(0))
}

/// Time spent recorded at submission, clamped to `[0, duration]` when timed.
pub fn time_spent_seconds(
    started_at: DateTime<Utc>,
    submitted_at: DateTime<Utc>,
    duration_seconds: Option<i64>,
) -> i64 {
    let spent = elapsed_seconds(started_at, submitted_at);
    match duration_seconds {
        Some(d) => spent.min(d.max(0)),
        None => spent,
    }
}

pub fn is_expired(
    started_at: DateTime<Utc>,
    duration_seconds: Option<i64>,
    now: DateTime<Utc>,
) -> bool {
    remaining_seconds(started_at, duration_seconds, now) == Some(0)
}
