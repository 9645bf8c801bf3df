//! Clock abstraction and identifier generation (C1).
//!
//! Generalizes the reference's pervasive `chrono::Utc::now()` /
//! `Uuid::new_v4()` pairing into an injectable trait so backoff and timeout
//! logic can be exercised deterministically in tests.

use chrono::{DateTime, Utc};
use std::time::Instant;
use uuid::Uuid;

/// Source of wall-clock and monotonic time for the core's time-dependent
/// logic (backoff scheduling, timeouts, metrics timestamps).
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    fn monotonic_now(&self) -> Instant;
}

/// Default [`Clock`] backed by the real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}

/// Produces a `<prefix>-<uuid v4>` identifier, matching the reference's
/// `Uuid::new_v4()` id style with a type-discriminating prefix.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}
