//! # API Endpoint Handlers

use super::{
    AppState,
    types::{
        AskResponse, BusyRequest, CommandResponse, DeviceRequest, HealthResponse, IndexRequest,
        IndexResponse, MountResponse, PauseRequest, PauseResponse, PowerRequest, QueryResponse,
        ReadyRequest, ResumeRequest, StatusResponse, UpdateResponse,
    },
};
use crate::engine::EngineError;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use quarry_core::{ChangeSet, Config, Query, QuarryError};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// HTTP status for an engine error.
fn error_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Core(
            QuarryError::InvalidConfig(_)
            | QuarryError::InvalidPattern(_)
            | QuarryError::InvalidResource(_)
            | QuarryError::Glob(_),
        ) => StatusCode::BAD_REQUEST,
        EngineError::Core(QuarryError::ConstraintViolation { .. }) => StatusCode::CONFLICT,
        EngineError::Core(_) | EngineError::Monitor(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Reply for requests that carry no data back.
fn command_reply(result: Result<(), EngineError>) -> (StatusCode, Json<CommandResponse>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(CommandResponse::success())),
        Err(e) => (error_status(&e), Json(CommandResponse::error(e.to_string()))),
    }
}

// =============================================================================
// HEALTH & STATUS
// =============================================================================

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.status();
    let graph = state.engine.graph().read().await;
    let graphs = graph
        .graph_names()
        .into_iter()
        .map(|g| {
            let count = graph.subject_count(&g);
            (g.to_string(), count)
        })
        .collect();

    let response = StatusResponse {
        engine,
        quads: graph.quad_count(),
        graphs,
    };
    (StatusCode::OK, Json(response))
}

// =============================================================================
// LIFECYCLE
// =============================================================================

pub async fn start_handler(State(state): State<AppState>) -> impl IntoResponse {
    command_reply(state.engine.start())
}

pub async fn stop_handler(State(state): State<AppState>) -> impl IntoResponse {
    command_reply(state.engine.stop())
}

/// Index a location and answer once every path under it has been handled.
pub async fn index_handler(
    State(state): State<AppState>,
    Json(request): Json<IndexRequest>,
) -> impl IntoResponse {
    if !request.path.is_absolute() {
        return (
            StatusCode::BAD_REQUEST,
            Json(IndexResponse::error(request.path, "path must be absolute")),
        );
    }

    let path = request.path.clone();
    match state
        .engine
        .index(request.path, request.recursive, request.graphs)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(IndexResponse::from_outcome(outcome))),
        Err(e) => (error_status(&e), Json(IndexResponse::error(path, e.to_string()))),
    }
}

// =============================================================================
// PAUSE / RESUME
// =============================================================================

pub async fn pause_handler(
    State(state): State<AppState>,
    Json(request): Json<PauseRequest>,
) -> impl IntoResponse {
    if request.application.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(PauseResponse::error("application must not be empty")),
        );
    }
    match state
        .engine
        .inhibit(request.application, request.reason)
        .await
    {
        Ok(cookie) => (StatusCode::OK, Json(PauseResponse::success(cookie))),
        Err(e) => (error_status(&e), Json(PauseResponse::error(e.to_string()))),
    }
}

pub async fn resume_handler(
    State(state): State<AppState>,
    Json(request): Json<ResumeRequest>,
) -> impl IntoResponse {
    match state.engine.uninhibit(request.cookie).await {
        Ok(true) => (StatusCode::OK, Json(CommandResponse::success())),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(CommandResponse::error(format!(
                "no pause with cookie {}",
                request.cookie
            ))),
        ),
        Err(e) => (error_status(&e), Json(CommandResponse::error(e.to_string()))),
    }
}

// =============================================================================
// SYSTEM SIGNALS
// =============================================================================

pub async fn power_handler(
    State(state): State<AppState>,
    Json(request): Json<PowerRequest>,
) -> impl IntoResponse {
    command_reply(
        state
            .engine
            .set_power(request.on_battery, request.low_battery),
    )
}

pub async fn ready_handler(
    State(state): State<AppState>,
    Json(request): Json<ReadyRequest>,
) -> impl IntoResponse {
    command_reply(state.engine.set_ready(request.ready))
}

pub async fn low_memory_handler(State(state): State<AppState>) -> impl IntoResponse {
    command_reply(state.engine.low_memory())
}

/// Replace the running configuration. Only the differences are applied.
pub async fn config_handler(
    State(state): State<AppState>,
    Json(config): Json<Config>,
) -> impl IntoResponse {
    command_reply(state.engine.reconfigure(config).await)
}

// =============================================================================
// DEVICES
// =============================================================================

pub async fn mount_handler(
    State(state): State<AppState>,
    Json(request): Json<DeviceRequest>,
) -> impl IntoResponse {
    match state.engine.mount(request.root).await {
        Ok(indexed) => (
            StatusCode::OK,
            Json(MountResponse {
                success: true,
                indexed,
                error: None,
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(MountResponse {
                success: false,
                indexed: false,
                error: Some(e.to_string()),
            }),
        ),
    }
}

pub async fn unmount_handler(
    State(state): State<AppState>,
    Json(request): Json<DeviceRequest>,
) -> impl IntoResponse {
    command_reply(state.engine.unmount(request.root))
}

pub async fn busy_handler(
    State(state): State<AppState>,
    Json(request): Json<BusyRequest>,
) -> impl IntoResponse {
    let root = request.root.clone();
    match state.engine.set_busy(request.root, request.busy).await {
        Ok(true) => (StatusCode::OK, Json(CommandResponse::success())),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(CommandResponse::error(format!(
                "{} is not a data source",
                root.display()
            ))),
        ),
        Err(e) => (error_status(&e), Json(CommandResponse::error(e.to_string()))),
    }
}

// =============================================================================
// QUERIES & UPDATES
// =============================================================================

pub async fn query_handler(
    State(state): State<AppState>,
    Json(query): Json<Query>,
) -> impl IntoResponse {
    let graph = state.engine.graph().read().await;
    match graph.query(&query) {
        Ok(rows) => (StatusCode::OK, Json(QueryResponse::with_rows(rows))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(QueryResponse::error(format!("Query failed: {}", e))),
        ),
    }
}

pub async fn ask_handler(
    State(state): State<AppState>,
    Json(query): Json<Query>,
) -> impl IntoResponse {
    let graph = state.engine.graph().read().await;
    match graph.ask(&query) {
        Ok(result) => (
            StatusCode::OK,
            Json(AskResponse {
                success: true,
                result,
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(AskResponse {
                success: false,
                result: false,
                error: Some(format!("Query failed: {}", e)),
            }),
        ),
    }
}

/// Commit a change set after whatever the engine has buffered.
pub async fn update_handler(
    State(state): State<AppState>,
    Json(changes): Json<ChangeSet>,
) -> impl IntoResponse {
    match state.engine.update(changes).await {
        Ok(report) => (StatusCode::OK, Json(UpdateResponse::success(report))),
        Err(e) => (error_status(&e), Json(UpdateResponse::error(e.to_string()))),
    }
}

// =============================================================================
// SIGNALS
// =============================================================================

/// Stream engine signals as server-sent events. A subscriber that falls
/// behind skips the signals it missed.
pub async fn signals_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.engine.subscribe()).filter_map(|received| {
        let signal = received.ok()?;
        Event::default()
            .event(signal.name())
            .json_data(&signal)
            .ok()
            .map(Ok)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
