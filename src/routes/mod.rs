//! Axum router, shared state and the response envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::crypto::CredentialCipher;
use crate::services::warmup::{WarmupError, WarmupManager};

pub mod accounts;
pub mod warmup;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub manager: Arc<WarmupManager>,
    pub cipher: Arc<CredentialCipher>,
}

impl axum::extract::FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl axum::extract::FromRef<AppState> for Arc<WarmupManager> {
    fn from_ref(state: &AppState) -> Self {
        state.manager.clone()
    }
}

impl axum::extract::FromRef<AppState> for Arc<CredentialCipher> {
    fn from_ref(state: &AppState) -> Self {
        state.cipher.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/accounts/domain",
            post(accounts::create_domain).get(accounts::list_domains),
        )
        .route(
            "/accounts/domain/:id",
            get(accounts::get_domain).delete(accounts::delete_domain),
        )
        .route(
            "/accounts/lead",
            post(accounts::create_lead).get(accounts::list_leads),
        )
        .route("/accounts/lead/:id", axum::routing::delete(accounts::delete_lead))
        .route("/accounts/test", post(accounts::test_connection))
        .route("/warmup/start", post(warmup::start))
        .route("/warmup/pause", post(warmup::pause))
        .route("/warmup/resume", post(warmup::resume))
        .route("/warmup/stop", post(warmup::stop))
        .route("/warmup/status/:id", get(warmup::status))
        .route("/warmup/sessions", get(warmup::sessions))
        .route("/warmup/sessions/:id/logs", get(warmup::session_logs))
        .route("/warmup/logs", get(warmup::recent_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Uniform envelope: `{success, data?, error?, message?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            message: Some(message.into()),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }
}

impl IntoResponse for WarmupError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            WarmupError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            WarmupError::NotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
            WarmupError::Conflict(message) => (StatusCode::CONFLICT, message.clone()),
            WarmupError::Store(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            WarmupError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
        };
        if status.is_server_error() {
            tracing::error!(status = %status, error = %error, "request failed");
        }
        (status, Json(ApiResponse::error(error))).into_response()
    }
}
