//! API request and response structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    services::SessionRecord,
    state::{TimerSnapshot, TimerState, Transition},
    timer::{cancel_enabled, finish_enabled, toggle_label, Signal},
};

/// Format whole seconds as `HH:MM:SS`
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

/// Timer view for a session screen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerResponse {
    #[serde(flatten)]
    pub snapshot: TimerSnapshot,
    pub display: String,
    pub toggle_label: String,
    pub toggle_signal: Signal,
    pub finish_enabled: bool,
    pub cancel_enabled: bool,
}

impl TimerResponse {
    pub fn new(snapshot: TimerSnapshot) -> Self {
        Self {
            display: format_elapsed(snapshot.elapsed_seconds),
            toggle_label: toggle_label(snapshot.state).to_string(),
            toggle_signal: Signal::toggle_for(snapshot.state),
            finish_enabled: finish_enabled(&snapshot),
            cancel_enabled: cancel_enabled(&snapshot),
            snapshot,
        }
    }
}

/// Response to an external signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResponse {
    pub signal: Signal,
    /// False when the signal had nothing to do in the current state
    pub applied: bool,
    pub from: TimerState,
    pub to: TimerState,
    pub warning: Option<String>,
    pub timer: TimerResponse,
}

impl SignalResponse {
    pub fn new(signal: Signal, transition: Option<Transition>, snapshot: TimerSnapshot) -> Self {
        let (applied, from, to, warning) = match transition {
            Some(t) => (!t.is_noop(), t.from, t.to, t.warning.map(|w| w.to_string())),
            None => (false, snapshot.state, snapshot.state, None),
        };
        Self {
            signal,
            applied,
            from,
            to,
            warning,
            timer: TimerResponse::new(snapshot),
        }
    }
}

/// Body of `POST /timer/finish`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinishRequest {
    pub subject_id: Option<i64>,
    pub related_to_subject: Option<String>,
}

/// Response to a finished session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishResponse {
    pub status: String,
    pub message: String,
    pub session: SessionRecord,
    pub display: String,
}

impl FinishResponse {
    pub fn saved(session: SessionRecord) -> Self {
        Self {
            status: "saved".to_string(),
            message: "Session saved successfully".to_string(),
            display: format_elapsed(session.duration_seconds),
            session,
        }
    }

    pub fn unsaved(session: SessionRecord, reason: &str) -> Self {
        Self {
            status: "error".to_string(),
            message: format!("Couldn't save session. {}", reason),
            display: format_elapsed(session.duration_seconds),
            session,
        }
    }
}

/// Query string of `GET /sessions` and `GET /sessions/total`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsQuery {
    pub subject_id: Option<i64>,
    pub limit: Option<usize>,
}

/// Total studied time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTotalResponse {
    pub subject_id: Option<i64>,
    pub total_seconds: u64,
    pub display: String,
}

impl SessionTotalResponse {
    pub fn new(subject_id: Option<i64>, total_seconds: u64) -> Self {
        Self {
            subject_id,
            total_seconds,
            display: format_elapsed(total_seconds),
        }
    }
}

/// Error body for rejected requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(message: String) -> Self {
        Self {
            status: "error".to_string(),
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Server status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub timer: TimerResponse,
    pub observers: usize,
    pub uptime: String,
    pub port: u16,
    pub host: String,
    pub last_action: Option<String>,
    pub last_action_time: Option<DateTime<Utc>>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    /// Create a new health response
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
