//! Timer state, snapshots and the events broadcast to observers

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TimerError;

/// Rest states of the session timer.
///
/// Cancelling and finishing are one-shot events, not rest states: both
/// return the timer to `Idle`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    #[default]
    Idle,
    Running,
    Paused,
}

impl TimerState {
    /// Whether a session exists, i.e. the keep-alive guarantee should be held
    pub fn is_live(&self) -> bool {
        matches!(self, TimerState::Running | TimerState::Paused)
    }
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimerState::Idle => "idle",
            TimerState::Running => "running",
            TimerState::Paused => "paused",
        })
    }
}

/// Point-in-time view of the timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub state: TimerState,
    pub elapsed_seconds: u64,
    /// Wall-clock time the current session left `Idle`
    pub started_at: Option<DateTime<Utc>>,
    pub keep_alive_held: bool,
    /// Set when the tick task stopped on its own; cleared by the next `start`
    pub fault: Option<String>,
}

impl TimerSnapshot {
    pub fn idle() -> Self {
        Self {
            state: TimerState::Idle,
            elapsed_seconds: 0,
            started_at: None,
            keep_alive_held: false,
            fault: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }
}

impl Default for TimerSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

/// Everything an attached observer receives, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEvent {
    /// Delivered once, right after attaching
    Snapshot(TimerSnapshot),
    StateChanged {
        from: TimerState,
        to: TimerState,
        elapsed_seconds: u64,
    },
    Tick {
        elapsed_seconds: u64,
    },
    Finished {
        elapsed_seconds: u64,
    },
    Cancelled {
        discarded_seconds: u64,
    },
    TickFault {
        reason: String,
        elapsed_seconds: u64,
    },
}

/// Outcome of `start`, `pause` or `cancel`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: TimerState,
    pub to: TimerState,
    pub elapsed_seconds: u64,
    /// Non-fatal problem raised while transitioning, e.g. a failed keep-alive
    pub warning: Option<TimerError>,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.warning.is_none()
    }
}

/// The terminal value handed out by `finish`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedSession {
    pub elapsed_seconds: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}
