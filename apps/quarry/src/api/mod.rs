//! # Control Surface
//!
//! HTTP/JSON front of a running engine, built on axum.
//!
//! ## Endpoints
//!
//! - `GET  /health` - liveness, never authenticated
//! - `GET  /status` - engine state, queue sizes, data sources, graph sizes
//! - `POST /start`, `POST /stop` - resume or hold dispatching
//! - `POST /index` - index a location now and wait for the result
//! - `POST /pause`, `POST /resume` - take or release an inhibitor cookie
//! - `POST /power`, `POST /ready` - battery and readiness signals
//! - `POST /config` - switch to a new configuration
//! - `POST /devices/mount`, `/devices/unmount`, `/devices/busy`
//! - `POST /low-memory` - flush pending commits now
//! - `POST /query`, `POST /ask` - pattern queries over the graph
//! - `POST /update` - commit a change set
//! - `GET  /signals` - server-sent stream of engine signals
//!
//! ## Environment
//!
//! - `QUARRY_CORS_ORIGINS`: comma-separated origins, or `*` (default: localhost only)
//! - `QUARRY_API_KEY`: when set, every endpoint but `/health` needs it as a bearer token

mod auth;
mod handlers;
mod types;

pub use auth::get_api_key_from_env;
pub use types::{
    AskResponse, BusyRequest, CommandResponse, DeviceRequest, HealthResponse, IndexRequest,
    IndexResponse, MountResponse, PauseRequest, PauseResponse, PowerRequest, QueryResponse,
    ReadyRequest, ResumeRequest, StatusResponse, UpdateResponse,
};

use crate::engine::EngineHandle;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use quarry_core::QuarryError;
use std::future::Future;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

impl AppState {
    #[must_use]
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// CORS policy from `QUARRY_CORS_ORIGINS`.
///
/// `*` allows every origin; a comma-separated list allows those origins;
/// unset (or a list with nothing parseable) allows localhost only.
fn build_cors_layer() -> CorsLayer {
    let origins = std::env::var("QUARRY_CORS_ORIGINS").ok();

    match origins.as_deref() {
        Some("*") => {
            tracing::warn!("CORS: allowing every origin (QUARRY_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(list) => {
            let allowed: Vec<HeaderValue> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => {
                        tracing::info!(origin, "CORS: allowing origin");
                        Some(value)
                    }
                    Err(e) => {
                        tracing::warn!(origin, error = %e, "CORS: ignoring invalid origin");
                        None
                    }
                })
                .collect();
            if allowed.is_empty() {
                tracing::warn!("CORS: no usable origin in QUARRY_CORS_ORIGINS, using localhost");
                build_localhost_cors()
            } else {
                restricted_cors(allowed)
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    restricted_cors(origins)
}

fn restricted_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Build the router with every endpoint.
///
/// Layers, outermost first: tracing, CORS, body limit, then authentication
/// when `QUARRY_API_KEY` is set.
pub fn create_router(state: AppState) -> Router {
    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication disabled, every endpoint is open. \
             Set QUARRY_API_KEY to require a bearer token."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/start", post(handlers::start_handler))
        .route("/stop", post(handlers::stop_handler))
        .route("/index", post(handlers::index_handler))
        .route("/pause", post(handlers::pause_handler))
        .route("/resume", post(handlers::resume_handler))
        .route("/power", post(handlers::power_handler))
        .route("/ready", post(handlers::ready_handler))
        .route("/config", post(handlers::config_handler))
        .route("/devices/mount", post(handlers::mount_handler))
        .route("/devices/unmount", post(handlers::unmount_handler))
        .route("/devices/busy", post(handlers::busy_handler))
        .route("/low-memory", post(handlers::low_memory_handler))
        .route("/query", post(handlers::query_handler))
        .route("/ask", post(handlers::ask_handler))
        .route("/update", post(handlers::update_handler))
        .route("/signals", get(handlers::signals_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve the control surface on `addr` until `shutdown` resolves.
pub async fn run_server(
    addr: &str,
    engine: EngineHandle,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), QuarryError> {
    let router = create_router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| QuarryError::Io(format!("bind {}: {}", addr, e)))?;

    tracing::info!(addr, "Control surface listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| QuarryError::Io(format!("server error: {}", e)))
}
