//! Study Timer - A process-wide study session timer
//!
//! This is the main entry point for the study-timer daemon.

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use study_timer::{
    api::create_router,
    config::{Config, KeepAliveMode},
    services::{
        check_inhibit_available, InMemorySessionRepository, JsonLinesSessionRepository, KeepAlive,
        NoopKeepAlive, SessionRepository, SystemdInhibitor,
    },
    state::AppState,
    timer::{SessionTimer, TokioClock},
    utils::{shutdown_signal, signal_commands},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing with appropriate log level
    tracing_subscriber::fmt()
        .with_env_filter(format!("study_timer={},tower_http=info", config.log_level()))
        .init();

    info!("Starting study-timer v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: host={}, port={}, keep_alive={:?}",
          config.host, config.port, config.keep_alive);

    let keep_alive: Arc<dyn KeepAlive> = match config.keep_alive {
        KeepAliveMode::Systemd => {
            // A missing inhibitor only costs the guarantee, not the timer
            if let Err(e) = check_inhibit_available().await {
                warn!("{}", e);
            }
            Arc::new(SystemdInhibitor::new("study-timer", "Study session in progress"))
        }
        KeepAliveMode::None => Arc::new(NoopKeepAlive),
    };

    let sessions: Arc<dyn SessionRepository> = match &config.sessions_file {
        Some(path) => {
            info!("Saving sessions to {}", path.display());
            Arc::new(JsonLinesSessionRepository::new(path))
        }
        None => Arc::new(InMemorySessionRepository::new()),
    };

    // The one timer of this process
    let timer = SessionTimer::new(Arc::new(TokioClock), keep_alive)?;
    let state = Arc::new(AppState::new(timer, sessions, config.port, config.host.clone()));

    // Forward SIGUSR1/SIGUSR2 to the timer
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_commands(dispatcher).await {
            error!("Signal command listener failed: {}", e);
        }
    });

    // Create HTTP router with all endpoints
    let app = create_router(Arc::clone(&state));

    // Bind to the specified address
    let addr = config.address();
    let listener = TcpListener::bind(&addr).await?;

    info!("Server running on http://{}", addr);
    info!("Endpoints:");
    info!("  POST /signal/:action - start, stop (toggle) or cancel the timer");
    info!("  POST /timer/finish   - Finish the paused session and save it");
    info!("  GET  /timer          - Current timer state");
    info!("  GET  /timer/events   - Live timer events (server-sent events)");
    info!("  GET  /sessions       - Saved sessions (?subject_id=&limit=)");
    info!("  GET  /sessions/total - Total studied time (?subject_id=)");
    info!("  DELETE /sessions/:id - Delete a saved session");
    info!("  GET  /status         - Server status");
    info!("  GET  /health         - Health check");

    // Setup graceful shutdown
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        result = shutdown_signal() => {
            match result {
                Ok(_) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signals: {}", e),
            }
        }
    }

    let snapshot = state.timer.snapshot();
    if snapshot.state.is_live() {
        warn!("Shutting down with a {} session of {}s, it will not be saved",
              snapshot.state, snapshot.elapsed_seconds);
        state.timer.cancel();
    }

    info!("Server shutdown complete");
    Ok(())
}
