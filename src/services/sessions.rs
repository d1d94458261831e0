//! Storage collaborator that receives finished study sessions

use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::PathBuf,
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{error::StoreError, state::FinishedSession};

/// A persisted study session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Assigned by the repository when the session is inserted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub related_to_subject: String,
    pub occurred_at_epoch_millis: i64,
    pub duration_seconds: u64,
}

impl SessionRecord {
    /// Build the record for a session the timer just finished
    pub fn from_finished(
        finished: &FinishedSession,
        subject_id: Option<i64>,
        related_to_subject: Option<String>,
    ) -> Self {
        Self {
            session_id: None,
            subject_id,
            related_to_subject: related_to_subject.unwrap_or_default(),
            occurred_at_epoch_millis: finished.finished_at.timestamp_millis(),
            duration_seconds: finished.elapsed_seconds,
        }
    }

    fn belongs_to(&self, subject_id: Option<i64>) -> bool {
        subject_id.map_or(true, |id| self.subject_id == Some(id))
    }
}

/// Sessions shown on the dashboard
pub const RECENT_SESSIONS: usize = 5;

/// Sessions shown for a single subject
pub const RECENT_SUBJECT_SESSIONS: usize = 10;

/// Saved study sessions.
///
/// Stores implement insertion, listing and deletion; the queries are built
/// on `all_sessions`. A `subject_id` of `None` means every subject.
pub trait SessionRepository: fmt::Debug + Send + Sync + 'static {
    /// Store a session and return the id it was given
    fn insert_session(&self, record: SessionRecord) -> Result<i64, StoreError>;

    /// All sessions, most recent first
    fn all_sessions(&self) -> Result<Vec<SessionRecord>, StoreError>;

    /// Remove a session. `false` if no session has that id.
    fn delete_session(&self, session_id: i64) -> Result<bool, StoreError>;

    /// The `limit` most recent sessions, optionally for one subject
    fn recent_sessions(
        &self,
        subject_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self
            .all_sessions()?
            .into_iter()
            .filter(|record| record.belongs_to(subject_id))
            .take(limit)
            .collect())
    }

    /// Total studied time in seconds, optionally for one subject
    fn total_duration_seconds(&self, subject_id: Option<i64>) -> Result<u64, StoreError> {
        Ok(self
            .all_sessions()?
            .iter()
            .filter(|record| record.belongs_to(subject_id))
            .map(|record| record.duration_seconds)
            .sum())
    }
}

fn newest_first(sessions: &mut [SessionRecord]) {
    sessions.sort_by(|a, b| b.occurred_at_epoch_millis.cmp(&a.occurred_at_epoch_millis));
}

/// Keeps sessions for the lifetime of the process
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<Vec<SessionRecord>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRepository for InMemorySessionRepository {
    fn insert_session(&self, mut record: SessionRecord) -> Result<i64, StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned)?;
        let id = next_id(&sessions);
        record.session_id = Some(id);
        debug!("Storing session {} of {}s in memory", id, record.duration_seconds);
        sessions.push(record);
        Ok(id)
    }

    fn all_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned)?;
        let mut all = sessions.clone();
        newest_first(&mut all);
        Ok(all)
    }

    fn delete_session(&self, session_id: i64) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned)?;
        let before = sessions.len();
        sessions.retain(|record| record.session_id != Some(session_id));
        Ok(sessions.len() != before)
    }
}

fn next_id(sessions: &[SessionRecord]) -> i64 {
    sessions
        .iter()
        .filter_map(|record| record.session_id)
        .max()
        .unwrap_or(0)
        + 1
}

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonLinesSessionRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSessionRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Every stored line in file order. Callers hold `write_lock`.
    fn read_lines(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut all: Vec<SessionRecord> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            all.push(serde_json::from_str(&line)?);
        }
        Ok(all)
    }
}

impl SessionRepository for JsonLinesSessionRepository {
    fn insert_session(&self, mut record: SessionRecord) -> Result<i64, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let id = next_id(&self.read_lines()?);
        record.session_id = Some(id);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        info!("Session {} of {}s appended to {}", id, record.duration_seconds, self.path.display());
        Ok(id)
    }

    fn all_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut all = self.read_lines()?;
        newest_first(&mut all);
        Ok(all)
    }

    fn delete_session(&self, session_id: i64) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let all = self.read_lines()?;
        let kept: Vec<&SessionRecord> = all
            .iter()
            .filter(|record| record.session_id != Some(session_id))
            .collect();
        if kept.len() == all.len() {
            return Ok(false);
        }

        // Rewrite beside the original and swap, so a crash leaves one complete file
        let staging = self.path.with_extension("jsonl.tmp");
        let mut contents = String::new();
        for record in kept {
            contents.push_str(&serde_json::to_string(record)?);
            contents.push('\n');
        }
        fs::write(&staging, contents)?;
        fs::rename(&staging, &self.path)?;

        info!("Session {} deleted from {}", session_id, self.path.display());
        Ok(true)
    }
}
