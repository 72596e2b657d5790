//! Warm-up control endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::db;
use crate::models::mail_log::MailLogEntry;
use crate::models::session::WarmupSession;
use crate::services::warmup::{StatusReport, WarmupError, WarmupManager};

use super::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct WarmupActionReq {
    pub domain_account_id: String,
}

/// POST /warmup/start
pub async fn start(
    State(manager): State<Arc<WarmupManager>>,
    Json(req): Json<WarmupActionReq>,
) -> Result<Json<ApiResponse<WarmupSession>>, WarmupError> {
    let session = manager.start(&req.domain_account_id).await?;
    Ok(Json(ApiResponse::ok(session)))
}

/// POST /warmup/pause
pub async fn pause(
    State(manager): State<Arc<WarmupManager>>,
    Json(req): Json<WarmupActionReq>,
) -> Result<Json<ApiResponse<WarmupSession>>, WarmupError> {
    let session = manager.pause(&req.domain_account_id).await?;
    Ok(Json(ApiResponse::ok(session)))
}

/// POST /warmup/resume
pub async fn resume(
    State(manager): State<Arc<WarmupManager>>,
    Json(req): Json<WarmupActionReq>,
) -> Result<Json<ApiResponse<WarmupSession>>, WarmupError> {
    let session = manager.resume(&req.domain_account_id).await?;
    Ok(Json(ApiResponse::ok(session)))
}

/// POST /warmup/stop
pub async fn stop(
    State(manager): State<Arc<WarmupManager>>,
    Json(req): Json<WarmupActionReq>,
) -> Result<Json<ApiResponse<WarmupSession>>, WarmupError> {
    match manager.stop(&req.domain_account_id).await? {
        Some(session) => Ok(Json(ApiResponse::ok(session))),
        None => Ok(Json(ApiResponse {
            success: true,
            data: None,
            error: None,
            message: Some("nothing to stop".into()),
        })),
    }
}

/// GET /warmup/status/:id
pub async fn status(
    State(manager): State<Arc<WarmupManager>>,
    Path(domain_account_id): Path<String>,
) -> Result<Json<ApiResponse<StatusReport>>, WarmupError> {
    let report = manager.status(&domain_account_id).await?;
    Ok(Json(ApiResponse::ok(report)))
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    pub domain_account_id: Option<String>,
}

/// GET /warmup/sessions
pub async fn sessions(
    State(pool): State<SqlitePool>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<ApiResponse<Vec<WarmupSession>>>, WarmupError> {
    let rows = db::sessions::list(&pool, query.domain_account_id.as_deref()).await?;
    Ok(Json(ApiResponse::ok(rows)))
}

/// GET /warmup/sessions/:id/logs
pub async fn session_logs(
    State(pool): State<SqlitePool>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<MailLogEntry>>>, WarmupError> {
    if db::sessions::find_by_id(&pool, &session_id).await?.is_none() {
        return Err(WarmupError::NotFound(format!("session {session_id} not found")));
    }
    let rows = db::mail_log::list_by_session(&pool, &session_id).await?;
    Ok(Json(ApiResponse::ok(rows)))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
}

/// GET /warmup/logs
pub async fn recent_logs(
    State(pool): State<SqlitePool>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<ApiResponse<Vec<MailLogEntry>>>, WarmupError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let rows = db::mail_log::recent(&pool, limit).await?;
    Ok(Json(ApiResponse::ok(rows)))
}
