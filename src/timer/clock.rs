//! Time sources for the session timer

use std::time::Instant;

use chrono::{DateTime, Utc};

/// Source of monotonic and wall-clock time.
///
/// The tick task samples `now()` once per tick; a value earlier than the
/// previous sample is treated as a clock fault.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic time
    fn now(&self) -> Instant;

    /// Wall-clock time, used for session timestamps
    fn wall_clock(&self) -> DateTime<Utc>;
}

/// Production clock backed by tokio's time driver, so paused test time
/// applies to it as well
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
