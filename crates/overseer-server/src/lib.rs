//! # overseer-server
//!
//! HTTP surface for the governance engine. Provides:
//!
//! - `POST /api/v1/governance`, the action API keyed by `action`
//! - `GET /api/v1/events`, committed transitions as Server-Sent Events
//! - `GET /health` and `GET /metrics` (Prometheus text)
//!
//! Bearer tokens resolve to owners through `server.tokens`. Reviewer and
//! admin actions additionally need the owner in `server.reviewers` or
//! `server.admins`; a missing role looks exactly like a missing record.

pub mod actions;
pub mod error;
pub mod metrics;

use axum::{
    Extension, Router,
    extract::{Request, State, rejection::JsonRejection},
    http::HeaderMap,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response, Sse, sse::Event as SseEvent, sse::KeepAlive},
    routing::{get, post},
};
use futures::stream::Stream;
use overseer_config::OverseerConfig;
use overseer_core::{GovernanceError, GovernanceEvent, Result};
use overseer_engine::{GovernanceEngine, spawn_reapers};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::actions::{ACTIONS, Action, Role};
use crate::error::ApiError;

/// Shared server state.
pub struct AppState {
    pub engine: GovernanceEngine,
    /// Same handle the engine reads, so token and role edits apply on reload.
    pub config: Arc<RwLock<OverseerConfig>>,
    pub metrics: metrics::Metrics,
}

/// The owner a bearer token resolved to.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
}

/// Build the Axum router.
pub fn build_router(engine: GovernanceEngine, config: Arc<RwLock<OverseerConfig>>) -> Router {
    let metrics = metrics::Metrics::new();
    metrics.spawn_collector(engine.events());
    let cors = config.read().server.cors;

    let state = Arc::new(AppState {
        engine,
        config,
        metrics,
    });

    let api_routes = Router::new()
        .route("/api/v1/governance", post(governance_handler))
        .route("/api/v1/events", get(events_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

/// Resolve `Authorization: Bearer <token>` to an owner before any handler runs.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let owner = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| {
            state
                .config
                .read()
                .server
                .owner_for_token(token.trim())
                .map(str::to_string)
        });

    match owner {
        Some(owner) => {
            request.extensions_mut().insert(Caller(owner));
            next.run(request).await
        }
        None => {
            warn!(path = %request.uri().path(), "unauthorized request, invalid or missing token");
            state.metrics.inc_http_requests();
            state.metrics.inc_http_errors();
            ApiError(GovernanceError::Unauthorized).into_response()
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: state.metrics.uptime_secs(),
    })
}

/// Prometheus-compatible metrics endpoint.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> (
    axum::http::StatusCode,
    [(axum::http::header::HeaderName, &'static str); 1],
    String,
) {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render_prometheus(),
    )
}

async fn governance_handler(
    State(state): State<Arc<AppState>>,
    Extension(Caller(caller)): Extension<Caller>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> std::result::Result<Json<Value>, ApiError> {
    state.metrics.inc_http_requests();
    let result = run_action(&state, caller, body).await;
    if result.is_err() {
        state.metrics.inc_http_errors();
    }
    Ok(Json(result?))
}

async fn run_action(
    state: &AppState,
    caller: String,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Value> {
    let body = match body {
        Ok(Json(body)) => body,
        Err(e) => {
            let err = GovernanceError::Validation(e.body_text());
            return Err(reject(&state.engine, &caller, "request", err).await);
        }
    };
    let name = request_name(&body);
    let action = match Action::parse(body) {
        Ok(action) => action,
        Err(e) => return Err(reject(&state.engine, &caller, name, e).await),
    };

    let permitted = {
        let config = state.config.read();
        match action.role() {
            Role::Owner => true,
            Role::Reviewer => config.server.is_reviewer(&caller),
            Role::Admin => config.server.is_admin(&caller),
        }
    };

    let engine = state.engine.clone();
    let owner = caller.clone();
    let joined = tokio::task::spawn_blocking(move || {
        if !permitted {
            warn!(caller = %owner, action = name, "caller lacks the role for this action");
            let err = GovernanceError::not_found("action", name);
            engine.record_failure(&owner, &owner, name, "action", "-", &err);
            return Err(err);
        }
        // Engine operations audit their own rejections
        action.dispatch(&engine, &owner)
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) => {
            let err = GovernanceError::Internal(format!("action task failed: {e}"));
            Err(reject(&state.engine, &caller, name, err).await)
        }
    }
}

/// The action name for audit entries, or `request` when the body names none
/// we know.
fn request_name(body: &Value) -> &'static str {
    body.get("action")
        .and_then(Value::as_str)
        .and_then(|name| ACTIONS.iter().find(|known| **known == name).copied())
        .unwrap_or("request")
}

/// Audit a request rejected before it reached the engine, then hand the
/// error back for the response.
async fn reject(
    engine: &GovernanceEngine,
    caller: &str,
    action: &'static str,
    err: GovernanceError,
) -> GovernanceError {
    let engine = engine.clone();
    let caller = caller.to_string();
    tokio::task::spawn_blocking(move || {
        engine.record_failure(&caller, &caller, action, "action", "-", &err);
        err
    })
    .await
    .unwrap_or_else(|e| GovernanceError::Internal(format!("audit task failed: {e}")))
}

/// Stream committed transitions visible to the caller: their own, global
/// rule changes, and, for reviewers, every approval event.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    Extension(Caller(caller)): Extension<Caller>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let reviewer = state.config.read().server.is_reviewer(&caller);
    let mut rx = state.engine.subscribe();
    info!(%caller, reviewer, "event stream opened");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !visible_to(&event, &caller, reviewer) {
                        continue;
                    }
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(SseEvent::default().event(event_name(&event)).data(data));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%caller, skipped, "event stream lagged");
                    yield Ok(SseEvent::default().event("lagged").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn visible_to(event: &GovernanceEvent, caller: &str, reviewer: bool) -> bool {
    match event.owner() {
        None => true,
        Some(owner) if owner == caller => true,
        Some(_) => {
            reviewer
                && matches!(
                    event,
                    GovernanceEvent::ApprovalRequested { .. } | GovernanceEvent::ApprovalResolved { .. }
                )
        }
    }
}

fn event_name(event: &GovernanceEvent) -> &'static str {
    match event {
        GovernanceEvent::SessionOpened { .. } => "session_opened",
        GovernanceEvent::SessionClosed { .. } => "session_closed",
        GovernanceEvent::TaskSubmitted { .. } => "task_submitted",
        GovernanceEvent::TaskStatusChanged { .. } => "task_status_changed",
        GovernanceEvent::ApprovalRequested { .. } => "approval_requested",
        GovernanceEvent::ApprovalResolved { .. } => "approval_resolved",
        GovernanceEvent::CostPosted { .. } => "cost_posted",
        GovernanceEvent::RuleChanged { .. } => "rule_changed",
    }
}

/// Start the reapers and serve until Ctrl-C.
pub async fn start_server(engine: GovernanceEngine, config: Arc<RwLock<OverseerConfig>>) -> Result<()> {
    let listen = config.read().server.listen.clone();
    if config.read().server.tokens.is_empty() {
        warn!("no tokens configured under [server.tokens], every API call will be rejected");
    }

    let reapers = spawn_reapers(&engine);
    let router = build_router(engine, config);

    info!(listen = %listen, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| GovernanceError::Internal(format!("failed to bind {listen}: {e}")))?;

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await;
    reapers.shutdown();
    served.map_err(|e| GovernanceError::Internal(format!("server error: {e}")))
}
