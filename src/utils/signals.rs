//! Unix signal handling: graceful shutdown and timer command signals

use std::io;

use futures::stream::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook_tokio::Signals;
use tracing::{info, warn};

use crate::timer::{CommandDispatcher, Signal};

/// Wait for shutdown signals (SIGTERM, SIGINT)
pub async fn shutdown_signal() -> io::Result<i32> {
    let mut signals = Signals::new([SIGTERM, SIGINT])?;

    match signals.next().await {
        Some(signal) => {
            info!("Received signal: {}", signal);
            Ok(signal)
        }
        None => Err(io::Error::new(io::ErrorKind::Other, "signal stream closed")),
    }
}

/// Timer signal carried by a Unix signal, if any
pub fn command_for(unix_signal: i32) -> Option<Signal> {
    match unix_signal {
        SIGUSR1 => Some(Signal::Stop),
        SIGUSR2 => Some(Signal::Cancel),
        _ => None,
    }
}

/// Forward SIGUSR1 (start/stop toggle) and SIGUSR2 (cancel) to the timer
pub async fn signal_commands(dispatcher: CommandDispatcher) -> io::Result<()> {
    let mut signals = Signals::new([SIGUSR1, SIGUSR2])?;
    info!("Listening for SIGUSR1 (start/stop) and SIGUSR2 (cancel)");

    while let Some(unix_signal) = signals.next().await {
        let Some(signal) = command_for(unix_signal) else {
            warn!("Ignoring unexpected signal {}", unix_signal);
            continue;
        };

        info!("Received signal {}, dispatching {}", unix_signal, signal);
        if let Some(transition) = dispatcher.dispatch(signal) {
            info!("Timer {} -> {} at {}s", transition.from, transition.to, transition.elapsed_seconds);
        }
    }

    Ok(())
}
