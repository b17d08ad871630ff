//! analyst HTTP 接口
//!
//! 启动: cargo run --bin analyst-web --features web
//! POST /tasks/start、POST /tasks/feedback、GET /tasks/:thread_id/status

#![cfg(feature = "web")]

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use analyst::{
    create_service, load_config, AgentError, AnalysisService, AppConfig, FeedbackResponse,
    SessionState, StartResponse,
};

type ApiError = (StatusCode, Json<Value>);

#[derive(Deserialize)]
struct StartRequest {
    query: String,
}

#[derive(Deserialize)]
struct FeedbackRequest {
    thread_id: String,
    feedback: String,
}

/// 会话不存在 -> 404，其余 -> 500
/// 会话不存在返回 404；其余错误只记日志，响应体不带内部细节
fn api_error(e: AgentError) -> ApiError {
    match e {
        AgentError::SessionNotFound(_) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() })))
        }
        _ => {
            tracing::error!(error = %e, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
        }
    }
}

async fn start_task(
    State(service): State<Arc<AnalysisService>>,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    if req.query.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "query is required" })),
        ));
    }
    service.start(&req.query).await.map(Json).map_err(api_error)
}

async fn task_feedback(
    State(service): State<Arc<AnalysisService>>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    service
        .feedback(&req.thread_id, &req.feedback)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn task_status(
    State(service): State<Arc<AnalysisService>>,
    Path(thread_id): Path<String>,
) -> Result<Json<SessionState>, ApiError> {
    service.status(&thread_id).await.map(Json).map_err(api_error)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    analyst::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    let service = Arc::new(create_service(&cfg));

    let app = Router::new()
        .route("/tasks/start", post(start_task))
        .route("/tasks/feedback", post(task_feedback))
        .route("/tasks/:thread_id/status", get(task_status))
        .with_state(service);

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind))?;
    tracing::info!("analyst API: http://{}", cfg.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_hides_internal_details() {
        let (status, Json(body)) =
            api_error(AgentError::Checkpoint("/var/lib/analyst/db locked".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "internal error" }));

        let (status, Json(body)) = api_error(AgentError::SessionNotFound("abc".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Session not found: abc" }));
    }
}
