//! External collaborators of the session timer
//!
//! This module contains the host keep-alive capability, host checks, and the
//! repository finished sessions are handed to.

pub mod keep_alive;
pub mod sessions;
pub mod system;

// Re-export main types
pub use keep_alive::{KeepAlive, NoopKeepAlive, SystemdInhibitor};
pub use sessions::{
    InMemorySessionRepository, JsonLinesSessionRepository, SessionRecord, SessionRepository,
    RECENT_SESSIONS, RECENT_SUBJECT_SESSIONS,
};
pub use system::check_inhibit_available;
