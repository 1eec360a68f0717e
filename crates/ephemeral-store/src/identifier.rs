//! Unique, time-derived record identifiers

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

const IDENTIFIER_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Issues strictly increasing acceptance times
///
/// Identifiers have microsecond resolution. When two submissions land in the
/// same microsecond (or the clock steps backwards) the later one is bumped to
/// one microsecond past the previous issue, so blob keys never collide.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start after `last`, typically the newest persisted record
    pub fn seeded(last: Option<DateTime<Utc>>) -> Self {
        Self {
            last: Mutex::new(last.map(truncate_to_micros)),
        }
    }

    /// Next acceptance time; its [`format_identifier`] is unique
    pub fn next(&self, clock: &dyn Clock) -> DateTime<Utc> {
        let now = truncate_to_micros(clock.now());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let issued = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(issued);
        issued
    }
}

/// Render an acceptance time as an identifier, e.g. `20260101T120000.123456Z`
pub fn format_identifier(accepted_at: DateTime<Utc>) -> String {
    accepted_at.format(IDENTIFIER_FORMAT).to_string()
}

fn truncate_to_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    let excess = i64::from(t.timestamp_subsec_nanos() % 1_000);
    t - Duration::nanoseconds(excess)
}
