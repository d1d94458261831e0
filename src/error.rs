//! Error types for the session timer and its collaborators

use thiserror::Error;

use crate::state::TimerState;

/// Errors surfaced by the timer engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// An operation was invoked from a state that does not permit it.
    /// No state mutation happened.
    #[error("cannot {operation} while {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: TimerState,
    },

    /// The host keep-alive guarantee could not be obtained. The transition
    /// still happened; this is reported as a warning.
    #[error("keep-alive acquisition failed: {0}")]
    KeepAliveAcquisitionFailed(String),

    /// The engine was constructed outside of a tokio runtime
    #[error("no tokio runtime available to drive the tick task")]
    RuntimeUnavailable,
}

/// Errors raised by a session repository
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session store lock poisoned")]
    Poisoned,
}
