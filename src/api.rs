use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    error::EngineError,
    models::{ChunkRequest, EngineEvent, OverviewRequest, StartAnalysisRequest},
    service::AnalysisService,
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AnalysisService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateFileRequest {
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    pub hidden: bool,
}

pub fn router(service: Arc<AnalysisService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/analyses", post(start_analysis).get(list_analyses))
        .route("/v1/analyses/{analysis_id}", delete(cancel_analysis))
        .route("/v1/analyses/{analysis_id}/dismiss", post(dismiss_analysis))
        .route("/v1/files/status", get(file_status))
        .route("/v1/files/chunk", post(fetch_chunk))
        .route("/v1/files/overview", post(fetch_overview))
        .route("/v1/engine/events", post(ingest_event))
        .route("/v1/notifications", get(list_notifications))
        .route("/v1/cache/invalidate", post(invalidate_file))
        .route("/v1/cache/chunks/clear", post(invalidate_all_chunks))
        .route("/v1/cache/overviews/clear", post(invalidate_all_overviews))
        .route("/v1/cache/clear", post(clear_cache))
        .route("/v1/cache/enforce", post(enforce_limits))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/visibility", post(set_visibility))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "listenerAttached": state.service.listener_attached(),
        "timestamp": Utc::now(),
    }))
}

pub async fn start_analysis(
    State(state): State<AppState>,
    Json(payload): Json<StartAnalysisRequest>,
) -> impl IntoResponse {
    if payload.file_path.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": "INVALID_ANALYSIS_REQUEST",
                    "message": "Request must include a file path."
                }
            })),
        )
            .into_response();
    }

    let response = state
        .service
        .start_analysis(&payload.file_path, &payload.spec)
        .await;
    let status = if response.success {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(response)).into_response()
}

pub async fn list_analyses(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.global_view().await)
}

pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> impl IntoResponse {
    let cancelled = state.service.cancel_analysis(&analysis_id).await;
    Json(json!({ "cancelled": cancelled }))
}

pub async fn dismiss_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> impl IntoResponse {
    match state.service.dismiss(&analysis_id).await {
        Some(job) => (StatusCode::OK, Json(json!({ "dismissed": job }))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "code": "JOB_NOT_FOUND",
                    "message": "Analysis job not found."
                }
            })),
        )
            .into_response(),
    }
}

pub async fn file_status(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> impl IntoResponse {
    Json(state.service.file_view(&query.path).await)
}

pub async fn fetch_chunk(
    State(state): State<AppState>,
    Json(payload): Json<ChunkRequest>,
) -> impl IntoResponse {
    if payload.file_path.trim().is_empty() || payload.sample_count == 0 {
        return invalid_page_request("Chunk request must include a file path and a sample count.");
    }
    match state.service.fetch_chunk(&payload).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(err) => page_fetch_failed(&payload.file_path, err),
    }
}

pub async fn fetch_overview(
    State(state): State<AppState>,
    Json(payload): Json<OverviewRequest>,
) -> impl IntoResponse {
    if payload.file_path.trim().is_empty() || payload.max_points == 0 {
        return invalid_page_request("Overview request must include a file path and a point count.");
    }
    match state.service.fetch_overview(&payload).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(err) => page_fetch_failed(&payload.file_path, err),
    }
}

fn invalid_page_request(message: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": {
                "code": "INVALID_PAGE_REQUEST",
                "message": message
            }
        })),
    )
        .into_response()
}

fn page_fetch_failed(file_path: &str, err: EngineError) -> axum::response::Response {
    warn!(file_path = %file_path, error = %err, "Result page fetch failed");
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "error": {
                "code": "PAGE_FETCH_FAILED",
                "message": err.user_message()
            }
        })),
    )
        .into_response()
}

pub async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<EngineEvent>,
) -> impl IntoResponse {
    let analysis_id = event.analysis_id.clone();
    if !state.service.publish_event(event).await {
        warn!(job_id = %analysis_id, "Event transport closed, dropping engine event");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": {
                    "code": "TRANSPORT_UNAVAILABLE",
                    "message": "Event transport is closed."
                }
            })),
        )
            .into_response();
    }
    (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response()
}

pub async fn list_notifications(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.notifications())
}

pub async fn invalidate_file(
    State(state): State<AppState>,
    Json(payload): Json<InvalidateFileRequest>,
) -> impl IntoResponse {
    let removed = state.service.invalidate_file(&payload.file_path).await;
    Json(json!({ "removed": removed }))
}

pub async fn invalidate_all_chunks(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "removed": state.service.invalidate_all_chunks().await }))
}

pub async fn invalidate_all_overviews(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "removed": state.service.invalidate_all_overviews().await }))
}

pub async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "removed": state.service.clear_cache().await }))
}

pub async fn enforce_limits(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "evicted": state.service.enforce_memory_limits().await }))
}

pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.cache_stats().await)
}

pub async fn set_visibility(
    State(state): State<AppState>,
    Json(payload): Json<VisibilityRequest>,
) -> impl IntoResponse {
    let evicted = state.service.set_visibility(payload.hidden).await;
    Json(json!({ "hidden": payload.hidden, "evicted": evicted }))
}
