//! Study Timer - A process-wide study session timer
//!
//! This library provides a stopwatch for study sessions that keeps running
//! independently of the interfaces observing it. Any number of observers can
//! attach to the one timer, send it start/stop/cancel signals, and finish a
//! paused session to hand its duration to a session repository.

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod state;
mod tasks;
pub mod timer;
pub mod utils;

// Re-export commonly used types
pub use api::create_router;
pub use config::Config;
pub use error::{StoreError, TimerError};
pub use state::{AppState, TimerEvent, TimerSnapshot, TimerState};
pub use timer::{CommandDispatcher, SessionTimer, Signal};
pub use utils::signals::shutdown_signal;
