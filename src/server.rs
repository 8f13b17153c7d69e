//!
//! identity-bridge HTTP server
//! ---------------------------
//! Axum routes over [`Backend`]: login, configuration management, health and
//! version. Every handler builds its own request context; a caller-provided
//! `x-request-id` header is reused as the request id.
//!
//! Failures render as `{"status":"error","code":<kind>,"error":<message>}` with
//! the HTTP status of the error kind.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::backend::Backend;
use crate::error::{BridgeError, ErrorKind};
use crate::identity::RequestContext;
use crate::storage::{FileStorage, MemoryStorage, Storage};
use crate::upstream::HttpConnector;
use crate::version::{self, VersionInfo};

pub const DEFAULT_HTTP_PORT: u16 = 8210;
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 10_000;
const REQUEST_ID_HEADER: &str = "x-request-id";

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.kind().is_internal() {
            error!(error = %self.chain_message(), "request failed");
        }
        (status, Json(json!({"status": "error", "code": self.code_str(), "error": self.message()}))).into_response()
    }
}

/// Process-level settings for the server binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub http_port: u16,
    /// Directory for file storage; `None` keeps configuration in memory.
    pub data_dir: Option<PathBuf>,
    pub upstream_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            data_dir: None,
            upstream_timeout: Duration::from_millis(DEFAULT_UPSTREAM_TIMEOUT_MS),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
}

pub fn router(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/", get(|| async { "identity-bridge ok" }))
        .route("/login", post(login))
        .route("/config", post(create_config).put(update_config).get(read_config).delete(delete_config))
        .route("/health", get(health))
        .route("/version", get(version_handler))
        .with_state(AppState { backend })
}

fn request_context(state: &AppState, headers: &HeaderMap) -> RequestContext {
    let ctx = state.backend.request_context();
    match headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty()) {
        Some(id) => ctx.with_request_id(id),
        None => ctx,
    }
}

fn body_object(body: Result<Json<Value>, JsonRejection>) -> Result<Map<String, Value>, BridgeError> {
    match body {
        Ok(Json(Value::Object(map))) => Ok(map),
        Ok(_) => Err(BridgeError::new(ErrorKind::InvalidField, "request body must be a JSON object")),
        Err(rejection) => Err(BridgeError::new(ErrorKind::InvalidField, format!("invalid request body: {}", rejection.body_text()))),
    }
}

fn config_body(config: &crate::config::Config) -> Response {
    match config.to_response() {
        Ok(map) => (StatusCode::OK, Json(json!({"status": "ok", "config": map}))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn login(State(state): State<AppState>, headers: HeaderMap, body: Result<Json<Value>, JsonRejection>) -> Response {
    let body = match body_object(body) {
        Ok(b) => b,
        Err(e) => return e.into_response(),
    };
    let ctx = request_context(&state, &headers);
    let fut = async { state.backend.login(&ctx, &body).await };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(resp)) => (StatusCode::OK, Json(resp)).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            error!(request_id = %ctx.request_id, panic = %msg, "login panicked");
            BridgeError::internal("login failed unexpectedly").into_response()
        }
    }
}

async fn create_config(State(state): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Response {
    let body = match body_object(body) {
        Ok(b) => b,
        Err(e) => return e.into_response(),
    };
    match state.backend.create_config(&body).await {
        Ok(config) => config_body(&config),
        Err(e) => e.into_response(),
    }
}

async fn update_config(State(state): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Response {
    let body = match body_object(body) {
        Ok(b) => b,
        Err(e) => return e.into_response(),
    };
    match state.backend.update_config(&body).await {
        Ok(config) => config_body(&config),
        Err(e) => e.into_response(),
    }
}

async fn read_config(State(state): State<AppState>) -> Response {
    match state.backend.read_config().await {
        Ok(config) => config_body(&config),
        Err(e) => e.into_response(),
    }
}

async fn delete_config(State(state): State<AppState>) -> Response {
    match state.backend.delete_config().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ctx = request_context(&state, &headers);
    let report = state.backend.health(&ctx).await;
    let status = if report.is_healthy() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(report)).into_response()
}

async fn version_handler() -> impl IntoResponse {
    Json(VersionInfo::current())
}

fn storage_for(settings: &ServerSettings) -> anyhow::Result<Arc<dyn Storage>> {
    match &settings.data_dir {
        Some(dir) => {
            let storage = FileStorage::new(dir)
                .with_context(|| format!("While opening file storage under {}", dir.display()))?;
            Ok(Arc::new(storage))
        }
        None => Ok(Arc::new(MemoryStorage::new())),
    }
}

/// Build the backend from `settings`, bind the HTTP port and serve until ctrl-c.
pub async fn run(settings: ServerSettings) -> anyhow::Result<()> {
    let storage = storage_for(&settings)?;
    let connector = Arc::new(HttpConnector { request_timeout: settings.upstream_timeout });
    let backend = Arc::new(Backend::new(storage, connector).with_request_timeout(settings.upstream_timeout));
    let app = router(backend);

    let addr: SocketAddr = format!("0.0.0.0:{}", settings.http_port).parse()?;
    info!(version = %version::human_version(), %addr, data_dir = ?settings.data_dir, "starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_object_body_is_invalid() {
        let err = body_object(Ok(Json(json!(["a"])))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidField);
    }

    #[test]
    fn default_settings() {
        let s = ServerSettings::default();
        assert_eq!(s.http_port, 8210);
        assert!(s.data_dir.is_none());
        assert_eq!(s.upstream_timeout, Duration::from_secs(10));
    }
}
