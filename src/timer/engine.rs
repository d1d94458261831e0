//! Session timer engine
//!
//! A process-wide stopwatch for study sessions. One `SessionTimer` is shared
//! by every observer; cloning it shares the same engine.
//!
//! ## State transitions
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --start--> Running
//! Running|Paused --cancel--> Idle          (elapsed discarded)
//! Paused --finish--> Idle                  (elapsed handed to the caller)
//! ```
//!
//! All mutations, ticks included, happen under one lock. Events are
//! broadcast before the lock is released, so observers see them in the
//! order they happened.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{runtime::Handle, sync::watch};
use tracing::{debug, error, info, warn};

use super::{
    attachment::{Attachment, AttachmentHandle, Detach, ObserverRegistry},
    clock::Clock,
};
use crate::{
    error::TimerError,
    services::KeepAlive,
    state::{FinishedSession, TimerEvent, TimerSnapshot, TimerState, Transition},
    tasks::ticker::{TickSink, Ticker},
};

/// Interval between two ticks
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the shared session timer
#[derive(Clone)]
pub struct SessionTimer {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    keep_alive: Arc<dyn KeepAlive>,
    runtime: Handle,
    tick_interval: Duration,
    snapshot_tx: watch::Sender<TimerSnapshot>,
}

#[derive(Default)]
struct Inner {
    state: TimerState,
    elapsed_seconds: u64,
    started_at: Option<DateTime<Utc>>,
    keep_alive_held: bool,
    fault: Option<String>,
    /// Bumped whenever a run ends; ticks from older runs are discarded
    generation: u64,
    ticker: Option<Ticker>,
    observers: ObserverRegistry,
}

impl Inner {
    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            state: self.state,
            elapsed_seconds: self.elapsed_seconds,
            started_at: self.started_at,
            keep_alive_held: self.keep_alive_held,
            fault: self.fault.clone(),
        }
    }

    /// End the current run: stop its tick task and invalidate in-flight ticks
    fn end_run(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
        self.generation += 1;
    }

    fn reset(&mut self) {
        self.state = TimerState::Idle;
        self.elapsed_seconds = 0;
        self.started_at = None;
        self.fault = None;
    }
}

impl SessionTimer {
    /// Create an idle timer. Must be called from within a tokio runtime,
    /// which will drive the tick task.
    pub fn new(clock: Arc<dyn Clock>, keep_alive: Arc<dyn KeepAlive>) -> Result<Self, TimerError> {
        Self::with_tick_interval(clock, keep_alive, TICK_INTERVAL)
    }

    pub fn with_tick_interval(
        clock: Arc<dyn Clock>,
        keep_alive: Arc<dyn KeepAlive>,
        tick_interval: Duration,
    ) -> Result<Self, TimerError> {
        let runtime = Handle::try_current().map_err(|_| TimerError::RuntimeUnavailable)?;
        let (snapshot_tx, _) = watch::channel(TimerSnapshot::idle());

        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                clock,
                keep_alive,
                runtime,
                tick_interval,
                snapshot_tx,
            }),
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn snapshot(&self) -> TimerSnapshot {
        self.shared.lock().snapshot()
    }

    pub fn state(&self) -> TimerState {
        self.shared.lock().state
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.shared.lock().elapsed_seconds
    }

    /// Latest-value feed of the timer. Intermediate values may be skipped;
    /// use `attach` for a feed that sees every event.
    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    // ── Attachments ──────────────────────────────────────────────────

    /// Attach an observer. Its first event is a snapshot of the current
    /// state and elapsed time. Dropping the attachment detaches it.
    pub fn attach(&self) -> Attachment {
        let owner: Weak<dyn Detach> = Arc::downgrade(&self.shared) as Weak<Shared>;
        let mut inner = self.shared.lock();
        let snapshot = inner.snapshot();
        inner.observers.register(TimerEvent::Snapshot(snapshot), owner)
    }

    /// Detach an observer. The timer itself is unaffected.
    pub fn detach(&self, handle: AttachmentHandle) -> bool {
        self.shared.lock().observers.remove(handle)
    }

    pub fn observer_count(&self) -> usize {
        self.shared.lock().observers.len()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start a new session from `Idle`, or resume from `Paused`.
    /// While already running the state is left alone, but a keep-alive that
    /// could not be acquired earlier is tried again.
    pub fn start(&self) -> Transition {
        let mut inner = self.shared.lock();
        let from = inner.state;

        match from {
            TimerState::Running => {
                debug!("Start ignored, timer already running");
                let was_held = inner.keep_alive_held;
                let warning = self.shared.acquire_keep_alive(&mut inner);
                if !was_held && inner.keep_alive_held {
                    self.shared.snapshot_tx.send_replace(inner.snapshot());
                }
                return Transition {
                    warning,
                    ..noop(from, inner.elapsed_seconds)
                };
            }
            TimerState::Idle => {
                inner.elapsed_seconds = 0;
                inner.started_at = Some(self.shared.clock.wall_clock());
                info!("Study session started");
            }
            TimerState::Paused => {
                info!("Study session resumed at {}s", inner.elapsed_seconds);
            }
        }

        inner.fault = None;
        inner.state = TimerState::Running;
        let generation = inner.generation;
        inner.ticker = Some(Ticker::spawn(
            &self.shared.runtime,
            Arc::downgrade(&self.shared),
            Arc::clone(&self.shared.clock),
            generation,
            self.shared.tick_interval,
        ));
        let warning = self.shared.acquire_keep_alive(&mut inner);

        let elapsed_seconds = inner.elapsed_seconds;
        self.shared.publish(
            &mut inner,
            [TimerEvent::StateChanged {
                from,
                to: TimerState::Running,
                elapsed_seconds,
            }],
        );

        Transition {
            from,
            to: TimerState::Running,
            elapsed_seconds,
            warning,
        }
    }

    /// Pause a running session, freezing elapsed time
    pub fn pause(&self) -> Transition {
        let mut inner = self.shared.lock();
        let from = inner.state;
        if from != TimerState::Running {
            debug!("Pause ignored, timer is {}", from);
            return noop(from, inner.elapsed_seconds);
        }

        inner.end_run();
        inner.state = TimerState::Paused;
        let elapsed_seconds = inner.elapsed_seconds;
        info!("Study session paused at {}s", elapsed_seconds);

        self.shared.publish(
            &mut inner,
            [TimerEvent::StateChanged {
                from,
                to: TimerState::Paused,
                elapsed_seconds,
            }],
        );

        Transition {
            from,
            to: TimerState::Paused,
            elapsed_seconds,
            warning: None,
        }
    }

    /// Abort the session, discarding elapsed time. A no-op while idle.
    pub fn cancel(&self) -> Transition {
        let mut inner = self.shared.lock();
        let from = inner.state;
        if from == TimerState::Idle {
            debug!("Cancel ignored, no session in progress");
            return noop(from, 0);
        }

        inner.end_run();
        let discarded_seconds = inner.elapsed_seconds;
        inner.reset();
        self.shared.release_keep_alive(&mut inner);
        info!("Study session cancelled, {}s discarded", discarded_seconds);

        self.shared.publish(
            &mut inner,
            [
                TimerEvent::Cancelled { discarded_seconds },
                TimerEvent::StateChanged {
                    from,
                    to: TimerState::Idle,
                    elapsed_seconds: 0,
                },
            ],
        );

        Transition {
            from,
            to: TimerState::Idle,
            elapsed_seconds: 0,
            warning: None,
        }
    }

    /// End a paused session and hand its elapsed time to the caller.
    ///
    /// Requires `Paused` with a non-zero elapsed time. Once this returns the
    /// duration is no longer held by the timer.
    pub fn finish(&self) -> Result<FinishedSession, TimerError> {
        let mut inner = self.shared.lock();
        let from = inner.state;

        if from != TimerState::Paused {
            warn!("Finish rejected, timer is {}", from);
            return Err(TimerError::InvalidStateTransition {
                operation: "finish",
                state: from,
            });
        }
        if inner.elapsed_seconds == 0 {
            warn!("Finish rejected, nothing was timed");
            return Err(TimerError::InvalidStateTransition {
                operation: "finish an empty session",
                state: from,
            });
        }

        inner.end_run();
        let finished = FinishedSession {
            elapsed_seconds: inner.elapsed_seconds,
            started_at: inner.started_at,
            finished_at: self.shared.clock.wall_clock(),
        };
        inner.reset();
        self.shared.release_keep_alive(&mut inner);
        info!("Study session finished after {}s", finished.elapsed_seconds);

        self.shared.publish(
            &mut inner,
            [
                TimerEvent::Finished {
                    elapsed_seconds: finished.elapsed_seconds,
                },
                TimerEvent::StateChanged {
                    from,
                    to: TimerState::Idle,
                    elapsed_seconds: 0,
                },
            ],
        );

        Ok(finished)
    }
}

impl fmt::Debug for SessionTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTimer")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

fn noop(state: TimerState, elapsed_seconds: u64) -> Transition {
    Transition {
        from: state,
        to: state,
        elapsed_seconds,
        warning: None,
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves Inner consistent, so a panic
        // elsewhere does not invalidate it
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish<const N: usize>(&self, inner: &mut Inner, events: [TimerEvent; N]) {
        for event in &events {
            inner.observers.broadcast(event);
        }
        self.snapshot_tx.send_replace(inner.snapshot());
    }

    fn acquire_keep_alive(&self, inner: &mut Inner) -> Option<TimerError> {
        if inner.keep_alive_held {
            return None;
        }
        match self.keep_alive.acquire() {
            Ok(()) => {
                inner.keep_alive_held = true;
                debug!("Keep-alive acquired");
                None
            }
            Err(e) => {
                warn!("Keep-alive acquisition failed, timer keeps running: {}", e);
                Some(TimerError::KeepAliveAcquisitionFailed(e))
            }
        }
    }

    fn release_keep_alive(&self, inner: &mut Inner) {
        if inner.keep_alive_held {
            self.keep_alive.release();
            inner.keep_alive_held = false;
            debug!("Keep-alive released");
        }
    }
}

impl Detach for Shared {
    fn detach(&self, handle: AttachmentHandle) {
        if self.lock().observers.remove(handle) {
            debug!("Observer {} detached on drop", handle.id());
        }
    }
}

impl TickSink for Shared {
    fn on_tick(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.state != TimerState::Running || inner.generation != generation {
            return false;
        }

        inner.elapsed_seconds += 1;
        let elapsed_seconds = inner.elapsed_seconds;
        self.publish(&mut inner, [TimerEvent::Tick { elapsed_seconds }]);
        true
    }

    fn on_fault(&self, generation: u64, reason: String) {
        let mut inner = self.lock();
        if inner.state != TimerState::Running || inner.generation != generation {
            return;
        }

        inner.end_run();
        inner.state = TimerState::Paused;
        inner.fault = Some(reason.clone());
        let elapsed_seconds = inner.elapsed_seconds;
        error!("Ticking stopped at {}s: {}", elapsed_seconds, reason);

        self.publish(
            &mut inner,
            [
                TimerEvent::TickFault {
                    reason,
                    elapsed_seconds,
                },
                TimerEvent::StateChanged {
                    from: TimerState::Running,
                    to: TimerState::Paused,
                    elapsed_seconds,
                },
            ],
        );
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        if inner.keep_alive_held {
            info!("Session timer dropped with a live session, releasing keep-alive");
            self.keep_alive.release();
            inner.keep_alive_held = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::{
        services::keep_alive::testing::RecordingKeepAlive,
        timer::{clock::testing::ManualClock, TokioClock},
    };

    fn timer() -> (SessionTimer, Arc<RecordingKeepAlive>) {
        let keep_alive = Arc::new(RecordingKeepAlive::default());
        let timer = SessionTimer::new(Arc::new(TokioClock), keep_alive.clone()).unwrap();
        (timer, keep_alive)
    }

    /// Wait until the attachment has seen `n` more ticks
    async fn ticks(attachment: &mut Attachment, n: u64) -> u64 {
        let mut seen = 0;
        let mut last = 0;
        while seen < n {
            if let Some(TimerEvent::Tick { elapsed_seconds }) = attachment.recv().await {
                seen += 1;
                last = elapsed_seconds;
            }
        }
        last
    }

    /// Sleep half a second past `secs`, so ticks and the wake-up never coincide
    fn wait(secs: u64) -> tokio::time::Sleep {
        tokio::time::sleep(Duration::from_millis(secs * 1000 + 500))
    }

    #[test]
    fn needs_a_runtime() {
        let result = SessionTimer::new(Arc::new(TokioClock), Arc::new(RecordingKeepAlive::default()));
        assert_eq!(result.unwrap_err(), TimerError::RuntimeUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn start_pause_finish_returns_elapsed() {
        let (timer, keep_alive) = timer();
        let mut attachment = timer.attach();

        let started = timer.start();
        assert_eq!(started.from, TimerState::Idle);
        assert_eq!(started.to, TimerState::Running);
        assert!(started.warning.is_none());
        assert_eq!(ticks(&mut attachment, 3).await, 3);

        timer.pause();
        let finished = timer.finish().unwrap();
        assert_eq!(finished.elapsed_seconds, 3);
        assert!(finished.started_at.is_some());

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.state, TimerState::Idle);
        assert_eq!(snapshot.elapsed_seconds, 0);
        assert_eq!((keep_alive.acquired(), keep_alive.released()), (1, 1));

        timer.start();
        assert_eq!(timer.elapsed_seconds(), 0);
        assert_eq!(ticks(&mut attachment, 1).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_is_frozen_while_paused() {
        let (timer, _) = timer();
        timer.start();
        wait(4).await;
        timer.pause();
        assert_eq!(timer.elapsed_seconds(), 4);

        wait(10).await;
        assert_eq!(timer.elapsed_seconds(), 4);
        assert_eq!(timer.state(), TimerState::Paused);

        let resumed = timer.start();
        assert_eq!(resumed.from, TimerState::Paused);
        assert_eq!(resumed.elapsed_seconds, 4);
        wait(2).await;
        assert_eq!(timer.elapsed_seconds(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_and_finish_then_fails() {
        let (timer, keep_alive) = timer();
        timer.start();
        wait(2).await;

        let cancelled = timer.cancel();
        assert_eq!(cancelled.from, TimerState::Running);
        assert_eq!(timer.snapshot(), TimerSnapshot::idle());
        assert_eq!((keep_alive.acquired(), keep_alive.released()), (1, 1));

        assert_eq!(
            timer.finish().unwrap_err(),
            TimerError::InvalidStateTransition {
                operation: "finish",
                state: TimerState::Idle,
            }
        );

        wait(5).await;
        assert_eq!(timer.elapsed_seconds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_from_paused_and_idle() {
        let (timer, keep_alive) = timer();
        assert!(timer.cancel().is_noop());
        assert_eq!(keep_alive.released(), 0);

        timer.start();
        wait(1).await;
        timer.pause();
        timer.cancel();
        assert_eq!(timer.snapshot(), TimerSnapshot::idle());
        assert_eq!((keep_alive.acquired(), keep_alive.released()), (1, 1));

        assert!(timer.cancel().is_noop());
        assert_eq!(keep_alive.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_requires_a_paused_non_empty_session() {
        let (timer, _) = timer();
        timer.start();
        wait(3).await;

        let err = timer.finish().unwrap_err();
        assert!(matches!(
            err,
            TimerError::InvalidStateTransition {
                state: TimerState::Running,
                ..
            }
        ));
        assert_eq!(timer.state(), TimerState::Running);
        assert_eq!(timer.elapsed_seconds(), 3);

        timer.cancel();
        timer.start();
        timer.pause();
        assert!(timer.finish().is_err());
        assert_eq!(timer.state(), TimerState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_keeps_a_single_ticker() {
        let (timer, keep_alive) = timer();
        timer.start();
        assert!(timer.start().is_noop());
        assert!(timer.start().is_noop());

        wait(6).await;
        assert_eq!(timer.elapsed_seconds(), 6);
        assert_eq!(keep_alive.acquired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_resume_cycles_do_not_leak_ticks() {
        let (timer, _) = timer();
        for _ in 0..5 {
            timer.start();
            tokio::time::sleep(Duration::from_millis(500)).await;
            timer.pause();
        }
        // Each run was shorter than one interval
        assert_eq!(timer.elapsed_seconds(), 0);

        timer.start();
        wait(2).await;
        assert_eq!(timer.elapsed_seconds(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn late_attachment_sees_current_values() {
        let (timer, _) = timer();
        let mut first = timer.attach();
        timer.start();
        ticks(&mut first, 5).await;

        let mut second = timer.attach();
        match second.recv().await {
            Some(TimerEvent::Snapshot(snapshot)) => {
                assert_eq!(snapshot.state, TimerState::Running);
                assert_eq!(snapshot.elapsed_seconds, 5);
                assert!(snapshot.keep_alive_held);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn observers_receive_identical_ordered_events() {
        let (timer, _) = timer();
        let mut a = timer.attach();
        let mut b = timer.attach();

        timer.start();
        wait(2).await;
        timer.pause();
        timer.finish().unwrap();

        let expected = vec![
            TimerEvent::Snapshot(TimerSnapshot::idle()),
            TimerEvent::StateChanged {
                from: TimerState::Idle,
                to: TimerState::Running,
                elapsed_seconds: 0,
            },
            TimerEvent::Tick { elapsed_seconds: 1 },
            TimerEvent::Tick { elapsed_seconds: 2 },
            TimerEvent::StateChanged {
                from: TimerState::Running,
                to: TimerState::Paused,
                elapsed_seconds: 2,
            },
            TimerEvent::Finished { elapsed_seconds: 2 },
            TimerEvent::StateChanged {
                from: TimerState::Paused,
                to: TimerState::Idle,
                elapsed_seconds: 0,
            },
        ];
        assert_eq!(a.drain(), expected);
        assert_eq!(b.drain(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn headless_timer_keeps_ticking() {
        let (timer, _) = timer();
        let attachment = timer.attach();
        timer.start();
        wait(2).await;

        assert!(timer.detach(attachment.handle()));
        assert_eq!(timer.observer_count(), 0);
        tokio::time::sleep(Duration::from_secs(3)).await;

        let mut again = timer.attach();
        assert_eq!(
            again.try_recv(),
            Some(TimerEvent::Snapshot(TimerSnapshot {
                state: TimerState::Running,
                elapsed_seconds: 5,
                ..timer.snapshot()
            }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_one_engine() {
        let (timer, _) = timer();
        let other = timer.clone();
        timer.start();
        wait(3).await;
        assert_eq!(other.elapsed_seconds(), 3);
        other.pause();
        assert_eq!(timer.state(), TimerState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_failure_is_a_warning() {
        let keep_alive = Arc::new(RecordingKeepAlive::refusing());
        let timer = SessionTimer::new(Arc::new(TokioClock), keep_alive.clone()).unwrap();

        let started = timer.start();
        assert_eq!(started.to, TimerState::Running);
        assert!(matches!(
            started.warning,
            Some(TimerError::KeepAliveAcquisitionFailed(_))
        ));
        wait(2).await;
        assert_eq!(timer.elapsed_seconds(), 2);
        assert!(!timer.snapshot().keep_alive_held);

        // Nothing was acquired, so nothing is released
        timer.cancel();
        assert_eq!(keep_alive.released(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_is_retried_on_resume() {
        let keep_alive = Arc::new(RecordingKeepAlive::refusing());
        let timer = SessionTimer::new(Arc::new(TokioClock), keep_alive.clone()).unwrap();
        timer.start();
        timer.pause();

        keep_alive.refuse.store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(timer.start().warning.is_none());
        assert!(keep_alive.held());

        timer.pause();
        timer.start();
        assert_eq!(keep_alive.acquired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_timer_releases_keep_alive() {
        let (timer, keep_alive) = timer();
        timer.start();
        assert!(keep_alive.held());
        drop(timer);
        assert!(!keep_alive.held());
    }

    #[tokio::test(start_paused = true)]
    async fn clock_fault_pauses_and_reports() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 8, 7, 0, 0).unwrap()));
        let keep_alive = Arc::new(RecordingKeepAlive::default());
        let timer = SessionTimer::new(clock.clone(), keep_alive.clone()).unwrap();
        let mut attachment = timer.attach();

        timer.start();
        assert_eq!(ticks(&mut attachment, 2).await, 2);

        clock.rewind();
        let fault = loop {
            match attachment.recv().await {
                Some(TimerEvent::TickFault { reason, elapsed_seconds }) => break (reason, elapsed_seconds),
                Some(_) => continue,
                None => panic!("attachment closed"),
            }
        };
        assert_eq!(fault.1, 2);

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.state, TimerState::Paused);
        assert_eq!(snapshot.fault.as_deref(), Some(fault.0.as_str()));
        assert!(keep_alive.held());

        assert!(timer.start().warning.is_none());
        assert!(timer.snapshot().fault.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn latest_value_feed_follows_transitions() {
        let (timer, _) = timer();
        let mut feed = timer.subscribe();
        assert_eq!(feed.borrow_and_update().state, TimerState::Idle);

        timer.start();
        feed.changed().await.unwrap();
        assert_eq!(feed.borrow_and_update().state, TimerState::Running);

        wait(1).await;
        assert_eq!(feed.borrow().elapsed_seconds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_is_retried_while_running() {
        let keep_alive = Arc::new(RecordingKeepAlive::refusing());
        let timer = SessionTimer::new(Arc::new(TokioClock), keep_alive.clone()).unwrap();
        timer.start();

        let again = timer.start();
        assert_eq!((again.from, again.to), (TimerState::Running, TimerState::Running));
        assert!(matches!(
            again.warning,
            Some(TimerError::KeepAliveAcquisitionFailed(_))
        ));
        assert!(!keep_alive.held());

        keep_alive.refuse.store(false, std::sync::atomic::Ordering::SeqCst);
        let retried = timer.start();
        assert!(retried.is_noop());
        assert!(keep_alive.held());
        assert!(timer.snapshot().keep_alive_held);
        assert!(timer.subscribe().borrow().keep_alive_held);

        assert!(timer.start().is_noop());
        assert_eq!(keep_alive.acquired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_from_an_ended_run_are_rejected() {
        let (timer, _) = timer();
        let mut attachment = timer.attach();
        timer.start();
        wait(2).await;
        let first_run = timer.shared.lock().generation;

        timer.pause();
        attachment.drain();
        assert!(!timer.shared.on_tick(first_run));
        assert_eq!(timer.elapsed_seconds(), 2);

        timer.start();
        let second_run = timer.shared.lock().generation;
        assert_ne!(first_run, second_run);
        assert!(!timer.shared.on_tick(first_run));
        assert_eq!(timer.elapsed_seconds(), 2);

        timer.cancel();
        assert!(!timer.shared.on_tick(second_run));
        // Even the current generation does nothing while idle
        let current = timer.shared.lock().generation;
        assert!(!timer.shared.on_tick(current));
        assert_eq!(timer.elapsed_seconds(), 0);

        let events = attachment.drain();
        assert!(!events.iter().any(|e| matches!(e, TimerEvent::Tick { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_attachment_detaches() {
        let (timer, _) = timer();
        let kept = timer.attach();
        let dropped = timer.attach();
        assert_eq!(timer.observer_count(), 2);

        drop(dropped);
        assert_eq!(timer.observer_count(), 1);

        // Detaching explicitly first makes the drop a no-op
        assert!(timer.detach(kept.handle()));
        drop(kept);
        assert_eq!(timer.observer_count(), 0);
    }

    mod sequences {
        use proptest::prelude::*;

        use super::*;

        #[derive(Debug, Clone, Copy)]
        enum Command {
            Start,
            Pause,
            Cancel,
            Finish,
            Tick,
        }

        fn command() -> impl Strategy<Value = Command> {
            prop_oneof![
                Just(Command::Start),
                Just(Command::Pause),
                Just(Command::Cancel),
                Just(Command::Finish),
                Just(Command::Tick),
            ]
        }

        proptest! {
            #[test]
            fn commands_and_ticks_keep_the_timer_consistent(
                commands in proptest::collection::vec(command(), 0..48)
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .start_paused(true)
                    .build()
                    .unwrap();
                let _guard = runtime.enter();

                // Ticks are applied by hand, the spawned task never gets to run
                let keep_alive = Arc::new(RecordingKeepAlive::default());
                let timer = SessionTimer::with_tick_interval(
                    Arc::new(TokioClock),
                    keep_alive.clone(),
                    Duration::from_secs(3600),
                )
                .unwrap();
                let mut attachment = timer.attach();
                attachment.drain();

                let mut state = TimerState::Idle;
                let mut elapsed = 0u64;

                for command in commands {
                    let before = state;
                    match command {
                        Command::Start => {
                            let transition = timer.start();
                            prop_assert_eq!(transition.to, TimerState::Running);
                            if state == TimerState::Idle {
                                elapsed = 0;
                            }
                            state = TimerState::Running;
                        }
                        Command::Pause => {
                            timer.pause();
                            if state == TimerState::Running {
                                state = TimerState::Paused;
                            }
                        }
                        Command::Cancel => {
                            timer.cancel();
                            state = TimerState::Idle;
                            elapsed = 0;
                        }
                        Command::Finish => {
                            let result = timer.finish();
                            if state == TimerState::Paused && elapsed > 0 {
                                prop_assert_eq!(result.unwrap().elapsed_seconds, elapsed);
                                state = TimerState::Idle;
                                elapsed = 0;
                            } else {
                                prop_assert!(result.is_err());
                            }
                        }
                        Command::Tick => {
                            let generation = timer.shared.lock().generation;
                            let applied = timer.shared.on_tick(generation);
                            prop_assert_eq!(applied, state == TimerState::Running);
                            if applied {
                                elapsed += 1;
                            }
                        }
                    }

                    let snapshot = timer.snapshot();
                    prop_assert_eq!(snapshot.state, state);
                    prop_assert_eq!(snapshot.elapsed_seconds, elapsed);
                    prop_assert_eq!(snapshot.keep_alive_held, state.is_live());
                    prop_assert_eq!(
                        keep_alive.acquired() - keep_alive.released(),
                        usize::from(state.is_live())
                    );
                    prop_assert_eq!(
                        timer.shared.lock().ticker.is_some(),
                        state == TimerState::Running
                    );

                    let events = attachment.drain();
                    if before != state {
                        let last = events.last().cloned();
                        prop_assert!(
                            matches!(last, Some(TimerEvent::StateChanged { to, .. }) if to == state),
                            "{:?} after {:?}", events, command
                        );
                    }
                }
            }
        }
    }
}
