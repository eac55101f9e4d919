//! HTTP routes.
//!
//! `/` and `/health` are exempt from admission control; everything under
//! `/api` passes through the middleware. `/api/anomaly/:user_id` is the
//! operator-facing inspection endpoint - analysis runs only when asked
//! for, never as a side effect of normal traffic.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware as axum_middleware, Json, Router};
use serde_json::json;
use tollgate_core::TOKEN_BUCKET_ALGORITHM;
use tower_http::cors::CorsLayer;

use crate::middleware::{admission_middleware, client_identifier};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/test", get(api_test))
        .route("/api/info", get(api_info))
        .route("/api/anomaly/:user_id", get(api_anomaly))
        .layer(axum_middleware::from_fn_with_state(state.clone(), admission_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Tollgate admission control",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "active",
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn api_test(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    Json(json!({
        "message": "Request successful!",
        "user_id": client_identifier(&headers, peer),
    }))
}

async fn api_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let limits = &state.config.limits;
    Json(json!({
        "max_requests": limits.max_tokens,
        "window_seconds": limits.window_seconds,
        "algorithm": TOKEN_BUCKET_ALGORITHM,
    }))
}

async fn api_anomaly(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Response {
    match state.detector.analyze(&user_id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            tracing::error!(%user_id, "anomaly analysis failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Admission store unavailable" })),
            )
                .into_response()
        }
    }
}
