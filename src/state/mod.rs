//! State management module
//!
//! This module contains the timer's data model and the process-wide
//! application state that owns the timer.

pub mod app_state;
pub mod timer_state;

// Re-export main types
pub use app_state::{AppState, FinishOutcome};
pub use timer_state::{FinishedSession, TimerEvent, TimerSnapshot, TimerState, Transition};
