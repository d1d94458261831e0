//! External command signals and their mapping onto the timer
//!
//! A UI exposes a single Start/Stop control plus Cancel. The signal that
//! control sends depends on the current state; `resolve` turns a signal and
//! a state into one explicit engine operation.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::engine::SessionTimer;
use crate::state::{TimerSnapshot, TimerState, Transition};

/// Intent arriving from outside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Start,
    /// Pause while running, otherwise start
    Stop,
    Cancel,
}

impl Signal {
    /// The signal a single Start/Stop control sends in `state`
    pub fn toggle_for(state: TimerState) -> Signal {
        match state {
            TimerState::Running => Signal::Stop,
            TimerState::Idle | TimerState::Paused => Signal::Start,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signal::Start => "start",
            Signal::Stop => "stop",
            Signal::Cancel => "cancel",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSignal(pub String);

impl fmt::Display for UnknownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown signal: {}", self.0)
    }
}

impl std::error::Error for UnknownSignal {}

impl FromStr for Signal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = s.trim().to_ascii_lowercase();
        let action = action.strip_prefix("action_service_").unwrap_or(&action);
        match action {
            "start" => Ok(Signal::Start),
            "stop" => Ok(Signal::Stop),
            "cancel" => Ok(Signal::Cancel),
            _ => Err(UnknownSignal(s.to_string())),
        }
    }
}

/// Engine call a signal resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Pause,
    Cancel,
}

/// Map a signal onto an engine operation, or `None` when the signal has
/// nothing to do in `state`
pub fn resolve(signal: Signal, state: TimerState) -> Option<Operation> {
    match (signal, state) {
        (Signal::Start, TimerState::Idle | TimerState::Paused) => Some(Operation::Start),
        (Signal::Start, TimerState::Running) => None,
        (Signal::Stop, TimerState::Running) => Some(Operation::Pause),
        (Signal::Stop, TimerState::Idle | TimerState::Paused) => Some(Operation::Start),
        (Signal::Cancel, _) => Some(Operation::Cancel),
    }
}

/// Label of the Start/Stop control
pub fn toggle_label(state: TimerState) -> &'static str {
    match state {
        TimerState::Running => "Stop",
        TimerState::Paused => "Resume",
        TimerState::Idle => "Start",
    }
}

/// Finish is offered only for a timed, non-running session
pub fn finish_enabled(snapshot: &TimerSnapshot) -> bool {
    snapshot.elapsed_seconds > 0 && !snapshot.is_running()
}

/// Cancel follows the same rule as finish
pub fn cancel_enabled(snapshot: &TimerSnapshot) -> bool {
    finish_enabled(snapshot)
}

/// Applies external signals to the shared timer
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    timer: SessionTimer,
}

impl CommandDispatcher {
    pub fn new(timer: SessionTimer) -> Self {
        Self { timer }
    }

    pub fn timer(&self) -> &SessionTimer {
        &self.timer
    }

    /// Apply a signal. Returns `None` when it resolved to nothing.
    ///
    /// The state check and the engine call are separate steps; the engine
    /// rejects anything that became invalid in between.
    pub fn dispatch(&self, signal: Signal) -> Option<Transition> {
        let state = self.timer.state();
        let Some(operation) = resolve(signal, state) else {
            debug!("Signal {} has no effect while {}", signal, state);
            return None;
        };

        let transition = match operation {
            Operation::Start => self.timer.start(),
            Operation::Pause => self.timer.pause(),
            Operation::Cancel => self.timer.cancel(),
        };

        if let Some(warning) = &transition.warning {
            warn!("Signal {} applied with warning: {}", signal, warning);
        }
        if transition.from.is_live() != transition.to.is_live() {
            info!(
                "Signal {} {} the session (keep-alive {})",
                signal,
                if transition.to.is_live() { "opened" } else { "closed" },
                if transition.to.is_live() { "acquired" } else { "released" },
            );
        }

        Some(transition)
    }
}
