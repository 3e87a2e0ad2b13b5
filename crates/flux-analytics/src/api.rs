use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use flux_broadcast::serve_websocket;
use flux_config::{DetectionPatch, FilterPatch, TrainingPatch, VideoConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::control::{ControlPlane, Feedback};
use crate::error::ControlError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        let message = err.to_string();
        match err {
            ControlError::Config(_) | ControlError::InvalidLabel(_) => ApiError::BadRequest(message),
            ControlError::SampleNotFound(_) => ApiError::NotFound(message),
            ControlError::TrainingInProgress(_) => ApiError::Conflict(message),
            ControlError::Capture(_) | ControlError::Store(_) => ApiError::InternalError(message),
        }
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub limit: Option<usize>,
}

pub fn create_router(control: ControlPlane) -> Router {
    Router::new()
        .route("/health", get(health))
        // 配置
        .route("/api/config", get(get_config))
        .route("/api/config/video", get(get_video).post(update_video))
        .route("/api/config/ai", get(get_detection).post(update_detection))
        .route("/api/config/filter", get(get_filter).post(update_filter))
        .route("/api/config/training", get(get_training).post(update_training))
        // 标注与训练
        .route("/api/feedback", post(submit_feedback))
        .route("/api/training/status", get(training_status))
        .route("/api/training/trigger", post(trigger_training))
        .route("/api/samples/pending", get(pending_samples))
        .route("/api/status", get(system_status))
        // 实时推送
        .route("/ws", get(websocket))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(control)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn get_config(State(control): State<ControlPlane>) -> Json<Value> {
    Json(json!(control.config()))
}

async fn get_video(State(control): State<ControlPlane>) -> Json<Value> {
    Json(json!(control.video()))
}

async fn update_video(State(control): State<ControlPlane>, Json(req): Json<VideoConfig>) -> ApiResult {
    let outcome = control.update_video(req).await?;
    Ok(Json(json!({
        "success": true,
        "message": "video config updated",
        "config": outcome.config,
        "version": outcome.version,
        "restarted": outcome.restarted,
    })))
}

async fn get_detection(State(control): State<ControlPlane>) -> Json<Value> {
    Json(json!(control.detection()))
}

async fn update_detection(State(control): State<ControlPlane>, Json(req): Json<DetectionPatch>) -> ApiResult {
    let outcome = control.update_detection(req).await?;
    Ok(Json(json!({
        "success": true,
        "message": outcome.remote.message,
        "local_only": outcome.remote.local_only,
        "remote_success": outcome.remote.success,
        "config": outcome.config,
        "version": outcome.version,
    })))
}

async fn get_filter(State(control): State<ControlPlane>) -> Json<Value> {
    Json(json!(control.filter()))
}

async fn update_filter(State(control): State<ControlPlane>, Json(req): Json<FilterPatch>) -> ApiResult {
    let config = control.update_filter(req)?;
    Ok(Json(json!({
        "success": true,
        "message": "filter config updated",
        "config": config,
    })))
}

async fn get_training(State(control): State<ControlPlane>) -> Json<Value> {
    Json(json!(control.training()))
}

async fn update_training(State(control): State<ControlPlane>, Json(req): Json<TrainingPatch>) -> ApiResult {
    let config = control.update_training(req)?;
    Ok(Json(json!({
        "success": true,
        "message": "training config updated",
        "config": config,
    })))
}

async fn submit_feedback(State(control): State<ControlPlane>, Json(req): Json<Feedback>) -> ApiResult {
    let outcome = control.submit_feedback(req).await?;
    Ok(Json(json!({
        "success": true,
        "message": "sample label updated",
        "labeled_samples_count": outcome.labeled_samples_count,
        "training": outcome.training,
    })))
}

async fn training_status(State(control): State<ControlPlane>) -> ApiResult {
    Ok(Json(json!(control.training_status().await?)))
}

async fn trigger_training(State(control): State<ControlPlane>) -> ApiResult {
    let run = control.trigger_training().await?;
    Ok(Json(json!({
        "success": true,
        "message": "training started",
        "training_id": run.training_id,
        "sample_count": run.sample_count,
    })))
}

async fn pending_samples(State(control): State<ControlPlane>, Query(q): Query<PendingQuery>) -> ApiResult {
    let samples = control.pending_samples(q.limit).await?;
    Ok(Json(json!({
        "count": samples.len(),
        "samples": samples,
    })))
}

async fn system_status(State(control): State<ControlPlane>) -> Json<Value> {
    Json(json!(control.system_status()))
}

async fn websocket(State(control): State<ControlPlane>, ws: WebSocketUpgrade) -> Response {
    let hub = control.pipeline().hub().clone();
    ws.on_upgrade(move |socket| serve_websocket(socket, hub))
}
