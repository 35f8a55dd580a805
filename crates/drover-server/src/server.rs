//! Axum routes for task submission, review and status

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::Json,
    routing::{get, patch, post, put},
    Router,
};
use drover_core::{ConfigUpdate, RuntimeSettings, TaskRecord, TaskSubmission, TaskSummary};
use drover_orchestrator::{BridgeStatus, Confirmation, HubBridge, ReviewReport};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::api::{
    parse_body, parse_optional_body, HealthResponse, ModeRequest, ModeResponse, RejectRequest,
    TaskCreatedResponse,
};
use crate::error::ApiError;

pub type SharedBridge = Arc<HubBridge>;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the API router
pub fn router(bridge: SharedBridge) -> Router {
    let cors = cors_layer(&bridge.config().cors_origins);
    Router::new()
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/approve", post(approve_task))
        .route("/api/tasks/:id/reject", post(reject_task))
        .route("/api/tasks/:id/review", get(review_task))
        .route("/api/tasks/:id/confirm", post(confirm_task))
        .route("/api/tasks/:id/reject-review", post(reject_review))
        .route("/api/tasks/:id/continue", post(continue_task))
        .route("/api/mode", put(set_mode))
        .route("/api/config", patch(update_config))
        .route("/api/status", get(status))
        .route("/api/health", get(health))
        .layer(cors)
        .with_state(bridge)
}

/// Cross-origin access only for the configured origins
///
/// The mutating routes carry no auth, so an empty list sends no CORS headers
/// and browsers refuse cross-origin calls.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE])
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(bridge: SharedBridge, addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(bridge);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Drover API listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// POST /api/tasks
pub async fn create_task(
    State(bridge): State<SharedBridge>,
    body: Bytes,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), ApiError> {
    let submission: TaskSubmission = parse_body(&body)?;
    let task = bridge.submit(submission).await?;
    Ok((
        StatusCode::CREATED,
        Json(TaskCreatedResponse {
            task_id: task.id,
            status: task.state,
        }),
    ))
}

/// GET /api/tasks/{id}
pub async fn get_task(State(bridge): State<SharedBridge>, Path(id): Path<String>) -> ApiResult<TaskRecord> {
    Ok(Json(bridge.record(&id).await?))
}

/// POST /api/tasks/{id}/approve
pub async fn approve_task(
    State(bridge): State<SharedBridge>,
    Path(id): Path<String>,
) -> ApiResult<TaskSummary> {
    Ok(Json(bridge.approve(&id).await?))
}

/// POST /api/tasks/{id}/reject
pub async fn reject_task(
    State(bridge): State<SharedBridge>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<TaskSummary> {
    let request: RejectRequest = parse_optional_body(&body)?;
    Ok(Json(bridge.reject(&id, request.reason).await?))
}

/// GET /api/tasks/{id}/review
pub async fn review_task(
    State(bridge): State<SharedBridge>,
    Path(id): Path<String>,
) -> ApiResult<ReviewReport> {
    Ok(Json(bridge.review(&id).await?))
}

/// POST /api/tasks/{id}/confirm
pub async fn confirm_task(
    State(bridge): State<SharedBridge>,
    Path(id): Path<String>,
) -> ApiResult<Confirmation> {
    Ok(Json(bridge.confirm(&id).await?))
}

/// POST /api/tasks/{id}/reject-review
pub async fn reject_review(
    State(bridge): State<SharedBridge>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<TaskSummary> {
    let request: RejectRequest = parse_optional_body(&body)?;
    Ok(Json(bridge.reject_review(&id, request.reason).await?))
}

/// POST /api/tasks/{id}/continue
pub async fn continue_task(
    State(bridge): State<SharedBridge>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), ApiError> {
    let task = bridge.continue_task(&id).await?;
    Ok((
        StatusCode::CREATED,
        Json(TaskCreatedResponse {
            task_id: task.id,
            status: task.state,
        }),
    ))
}

/// PUT /api/mode
pub async fn set_mode(State(bridge): State<SharedBridge>, body: Bytes) -> ApiResult<ModeResponse> {
    let request: ModeRequest = parse_body(&body)?;
    bridge.set_mode(request.mode).await;
    Ok(Json(ModeResponse { mode: request.mode }))
}

/// PATCH /api/config
pub async fn update_config(
    State(bridge): State<SharedBridge>,
    body: Bytes,
) -> ApiResult<RuntimeSettings> {
    let update: ConfigUpdate = parse_body(&body)?;
    Ok(Json(bridge.update_config(update).await?))
}

/// GET /api/status
pub async fn status(State(bridge): State<SharedBridge>) -> ApiResult<BridgeStatus> {
    Ok(Json(bridge.status().await?))
}

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "drover".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
