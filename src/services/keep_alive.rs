//! Host keep-alive guarantee
//!
//! While a study session is live the host must not idle or suspend. The
//! engine acquires the guarantee when a session starts and releases it when
//! the session is cancelled or finished; implementations only need to do the
//! host-specific part.

use std::{
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::Mutex,
    thread,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Capability that keeps the hosting process alive while a session is live
pub trait KeepAlive: Send + Sync + 'static {
    /// Obtain the guarantee. Called at most once per session by the engine.
    fn acquire(&self) -> Result<(), String>;

    /// Give the guarantee back. Only called after a successful `acquire`.
    fn release(&self);
}

/// Keep-alive that does nothing, for hosts without a suspension mechanism
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKeepAlive;

impl KeepAlive for NoopKeepAlive {
    fn acquire(&self) -> Result<(), String> {
        debug!("Keep-alive acquire (noop)");
        Ok(())
    }

    fn release(&self) {
        debug!("Keep-alive release (noop)");
    }
}

/// How long a freshly spawned inhibitor must survive before the block is
/// considered taken. A refused inhibit (polkit, no logind) exits well within it.
pub const INHIBIT_GRACE: Duration = Duration::from_millis(150);

/// Holds a `systemd-inhibit` block on idle and sleep for as long as the
/// guarantee is held
#[derive(Debug)]
pub struct SystemdInhibitor {
    program: PathBuf,
    who: String,
    why: String,
    grace: Duration,
    child: Mutex<Option<Child>>,
}

impl SystemdInhibitor {
    pub fn new(who: impl Into<String>, why: impl Into<String>) -> Self {
        Self::with_program("systemd-inhibit", who, why)
    }

    /// Same as `new` but runs `program` instead of the `systemd-inhibit` on `PATH`
    pub fn with_program(
        program: impl Into<PathBuf>,
        who: impl Into<String>,
        why: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            who: who.into(),
            why: why.into(),
            grace: INHIBIT_GRACE,
            child: Mutex::new(None),
        }
    }

    fn spawn(&self) -> Result<Child, String> {
        let mut spawned = Command::new(&self.program)
            .args([
                "--what=idle:sleep",
                "--mode=block",
                &format!("--who={}", self.who),
                &format!("--why={}", self.why),
                "sleep",
                "infinity",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("Failed to execute {}: {}", self.program.display(), e))?;

        // Spawning only proves the binary exists; the block is taken once it stays up
        thread::sleep(self.grace);
        match spawned.try_wait() {
            Ok(None) => Ok(spawned),
            Ok(Some(status)) => Err(format!(
                "{} exited before taking the inhibit lock ({})",
                self.program.display(),
                status
            )),
            Err(e) => {
                let _ = spawned.kill();
                let _ = spawned.wait();
                Err(format!("Failed to check {}: {}", self.program.display(), e))
            }
        }
    }
}

impl KeepAlive for SystemdInhibitor {
    fn acquire(&self) -> Result<(), String> {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(held) = child.as_mut() {
            match held.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => {
                    warn!("systemd-inhibit pid {} exited ({}), inhibiting again", held.id(), status);
                    *child = None;
                }
                Err(e) => {
                    warn!("Failed to check systemd-inhibit pid {}: {}", held.id(), e);
                    return Ok(());
                }
            }
        }

        let spawned = self.spawn()?;
        info!("Suspension inhibited (systemd-inhibit pid {})", spawned.id());
        *child = Some(spawned);
        Ok(())
    }

    fn release(&self) {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mut inhibitor) = child.take() else {
            return;
        };

        if let Err(e) = inhibitor.kill() {
            warn!("Failed to stop systemd-inhibit: {}", e);
        }
        match inhibitor.wait() {
            Ok(status) => info!("Suspension inhibit released ({})", status),
            Err(e) => warn!("Failed to reap systemd-inhibit: {}", e),
        }
    }
}

impl Drop for SystemdInhibitor {
    fn drop(&mut self) {
        self.release();
    }
}
