//! Process-wide application state

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::{
    error::TimerError,
    services::{SessionRecord, SessionRepository},
    timer::{CommandDispatcher, SessionTimer, Signal},
};

use super::Transition;

/// State shared by every request handler. Owns the one session timer of
/// the process, so it outlives any individual observer.
#[derive(Debug)]
pub struct AppState {
    pub timer: SessionTimer,
    pub dispatcher: CommandDispatcher,
    pub sessions: Arc<dyn SessionRepository>,
    /// Server metadata
    pub start_time: Instant,
    pub port: u16,
    pub host: String,
    /// Last action tracking
    pub last_action: Mutex<Option<String>>,
    pub last_action_time: Mutex<Option<DateTime<Utc>>>,
}

/// Result of finishing a session and handing it to the repository
#[derive(Debug, Clone)]
pub struct FinishOutcome {
    pub record: SessionRecord,
    /// Why the record could not be saved. The timer is idle either way.
    pub save_error: Option<String>,
}

impl AppState {
    pub fn new(
        timer: SessionTimer,
        sessions: Arc<dyn SessionRepository>,
        port: u16,
        host: String,
    ) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(timer.clone()),
            timer,
            sessions,
            start_time: Instant::now(),
            port,
            host,
            last_action: Mutex::new(None),
            last_action_time: Mutex::new(None),
        }
    }

    fn record_action(&self, action: &str) {
        if let Ok(mut last_action) = self.last_action.lock() {
            *last_action = Some(action.to_string());
        }
        if let Ok(mut last_time) = self.last_action_time.lock() {
            *last_time = Some(Utc::now());
        }
    }

    /// Apply an external signal to the timer
    pub fn dispatch(&self, signal: Signal) -> Option<Transition> {
        self.record_action(&signal.to_string());
        self.dispatcher.dispatch(signal)
    }

    /// Finish the paused session and submit it to the session repository
    pub fn finish_session(
        &self,
        subject_id: Option<i64>,
        related_to_subject: Option<String>,
    ) -> Result<FinishOutcome, TimerError> {
        let finished = self.timer.finish()?;
        self.record_action("finish");

        let mut record = SessionRecord::from_finished(&finished, subject_id, related_to_subject);
        let save_error = match self.sessions.insert_session(record.clone()) {
            Ok(id) => {
                info!("Session {} of {}s saved", id, record.duration_seconds);
                record.session_id = Some(id);
                None
            }
            Err(e) => {
                error!("Couldn't save session: {}", e);
                Some(e.to_string())
            }
        };

        Ok(FinishOutcome { record, save_error })
    }

    /// Calculate server uptime as a formatted string
    pub fn get_uptime(&self) -> String {
        let duration = self.start_time.elapsed();
        let hours = duration.as_secs() / 3600;
        let minutes = (duration.as_secs() % 3600) / 60;
        let seconds = duration.as_secs() % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    /// Get last action information
    pub fn get_last_action(&self) -> (Option<String>, Option<DateTime<Utc>>) {
        let last_action = self.last_action.lock().ok().and_then(|a| a.clone());
        let last_action_time = self.last_action_time.lock().ok().and_then(|t| *t);
        (last_action, last_action_time)
    }
}
