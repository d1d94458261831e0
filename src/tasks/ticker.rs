//! The tick task owned by a running session timer

use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::oneshot,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error};

use crate::timer::Clock;

/// Receiver of tick task output.
///
/// `generation` identifies the run that spawned the task; the sink discards
/// anything from a run it has already left.
pub(crate) trait TickSink: Send + Sync + 'static {
    /// Apply one tick. Returning `false` ends the task.
    fn on_tick(&self, generation: u64) -> bool;

    /// The task is stopping because it can no longer tick reliably
    fn on_fault(&self, generation: u64, reason: String);
}

/// Handle to one running tick task
#[derive(Debug)]
pub(crate) struct Ticker {
    stop: Option<oneshot::Sender<()>>,
    _task: JoinHandle<()>,
}

impl Ticker {
    /// Spawn a task that ticks every `period`, first one `period` from now
    pub(crate) fn spawn<S: TickSink>(
        runtime: &Handle,
        sink: Weak<S>,
        clock: Arc<dyn Clock>,
        generation: u64,
        period: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        // Deadline is fixed here, not when the task is first polled
        let first = Instant::now() + period;
        let task = runtime.spawn(tick_task(sink, clock, generation, first, period, stop_rx));

        debug!("Tick task for run {} spawned", generation);
        Self {
            stop: Some(stop_tx),
            _task: task,
        }
    }

    /// Ask the task to stop. Any tick it already started is rejected by the
    /// sink through the generation check.
    pub(crate) fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn tick_task<S: TickSink>(
    sink: Weak<S>,
    clock: Arc<dyn Clock>,
    generation: u64,
    first: Instant,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut interval = interval_at(first, period);
    // A stalled task owes one tick per elapsed period, so catch up at once
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut last_sample = clock.now();

    loop {
        tokio::select! {
            biased;

            _ = &mut stop => {
                debug!("Tick task for run {} stopped", generation);
                break;
            }

            _ = interval.tick() => {
                let Some(sink) = sink.upgrade() else {
                    debug!("Timer dropped, tick task for run {} exiting", generation);
                    break;
                };

                let sample = clock.now();
                if sample < last_sample {
                    error!("Clock went backwards during run {}, stopping tick task", generation);
                    sink.on_fault(generation, "clock went backwards".to_string());
                    break;
                }
                last_sample = sample;

                if !sink.on_tick(generation) {
                    debug!("Run {} is over, tick task exiting", generation);
                    break;
                }
            }
        }
    }
}
