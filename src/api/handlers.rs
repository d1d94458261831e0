//! HTTP endpoint handlers

use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive as SseKeepAlive, Sse},
        Json,
    },
};
use futures::stream::{self, Stream};
use tracing::{error, info, warn};

use crate::{
    error::StoreError,
    services::SessionRecord,
    state::{AppState, TimerEvent},
    timer::Signal,
};
use super::responses::{
    ErrorResponse, FinishRequest, FinishResponse, HealthResponse, SessionTotalResponse,
    SessionsQuery, SignalResponse, StatusResponse, TimerResponse,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: String) -> ApiError {
    (status, Json(ErrorResponse::new(message)))
}

/// Handle POST /signal/:action - Apply an external start/stop/cancel signal
pub async fn signal_handler(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
) -> Result<Json<SignalResponse>, ApiError> {
    let signal: Signal = action.parse().map_err(|e| {
        warn!("Rejected signal request: {}", e);
        api_error(StatusCode::BAD_REQUEST, format!("{}", e))
    })?;

    let transition = state.dispatch(signal);
    info!("Signal endpoint called - {}", signal);
    Ok(Json(SignalResponse::new(signal, transition, state.timer.snapshot())))
}

/// Handle POST /timer/finish - Finish the paused session and save it
pub async fn finish_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<FinishRequest>>,
) -> Result<Json<FinishResponse>, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();

    match state.finish_session(request.subject_id, request.related_to_subject) {
        Ok(outcome) => {
            info!("Finish endpoint called - {}s recorded", outcome.record.duration_seconds);
            Ok(Json(match outcome.save_error {
                None => FinishResponse::saved(outcome.record),
                Some(reason) => FinishResponse::unsaved(outcome.record, &reason),
            }))
        }
        Err(e) => {
            warn!("Finish rejected: {}", e);
            Err(api_error(StatusCode::CONFLICT, e.to_string()))
        }
    }
}

/// Handle GET /timer - Current timer view
pub async fn timer_handler(State(state): State<Arc<AppState>>) -> Json<TimerResponse> {
    Json(TimerResponse::new(state.timer.snapshot()))
}

/// Server-sent event name for a timer event
fn event_name(event: &TimerEvent) -> &'static str {
    match event {
        TimerEvent::Snapshot(_) => "snapshot",
        TimerEvent::StateChanged { .. } => "state_changed",
        TimerEvent::Tick { .. } => "tick",
        TimerEvent::Finished { .. } => "finished",
        TimerEvent::Cancelled { .. } => "cancelled",
        TimerEvent::TickFault { .. } => "tick_fault",
    }
}

/// Handle GET /timer/events - Live timer events as server-sent events
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    // The attachment lives inside the stream and detaches when the connection drops
    let attachment = state.timer.attach();
    info!("Event stream {} opened", attachment.handle().id());

    let events = stream::unfold(attachment, |mut attachment| async move {
        let event = attachment.recv().await?;
        let sse = Event::default().event(event_name(&event)).json_data(&event);
        Some((sse, attachment))
    });

    Sse::new(events).keep_alive(SseKeepAlive::default())
}

fn store_error(e: StoreError) -> ApiError {
    error!("Session store failed: {}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Handle GET /sessions - Saved sessions, most recent first.
/// `subject_id` narrows to one subject, `limit` keeps only the newest.
pub async fn sessions_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    state
        .sessions
        .recent_sessions(query.subject_id, query.limit.unwrap_or(usize::MAX))
        .map(Json)
        .map_err(store_error)
}

/// Handle GET /sessions/total - Total studied time, overall or for `subject_id`
pub async fn session_total_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<SessionTotalResponse>, ApiError> {
    let total = state
        .sessions
        .total_duration_seconds(query.subject_id)
        .map_err(store_error)?;
    Ok(Json(SessionTotalResponse::new(query.subject_id, total)))
}

/// Handle DELETE /sessions/:id - Remove a saved session
pub async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.delete_session(session_id).map_err(store_error)? {
        info!("Session {} deleted", session_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no session with id {}", session_id),
        ))
    }
}

/// Handle GET /status - Return current server status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let (last_action, last_action_time) = state.get_last_action();

    Json(StatusResponse {
        timer: TimerResponse::new(state.timer.snapshot()),
        observers: state.timer.observer_count(),
        uptime: state.get_uptime(),
        port: state.port,
        host: state.host.clone(),
        last_action,
        last_action_time,
    })
}

/// Handle GET /health - Health check endpoint
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
