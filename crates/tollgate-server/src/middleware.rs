//! Admission middleware.
//!
//! For every non-exempt request: derive the client identifier, run the
//! admission check, record the outcome for anomaly scoring exactly once,
//! feed the analytics sink, then either short-circuit with 429 or
//! forward with rate-limit observability headers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tollgate_core::Decision;

use crate::config::FailPolicy;
use crate::analytics::RequestLog;
use crate::state::AppState;

/// Paths served without admission control.
pub const EXEMPT_PATHS: &[&str] = &["/", "/health"];

const API_KEY_HEADER: &str = "x-api-key";

/// Identifier precedence: API key header, else peer address.
pub fn client_identifier(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if EXEMPT_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    let identifier = client_identifier(request.headers(), peer);
    let started = Instant::now();

    let decision = match state.limiter.check(&identifier).await {
        Ok(decision) => decision,
        Err(e) => match state.config.fail_policy {
            FailPolicy::Closed => {
                tracing::error!(%identifier, "admission store unavailable, failing closed: {e}");
                return store_unavailable_response();
            }
            FailPolicy::Open => {
                // Explicitly configured: admit unmetered while the store
                // is down. The outcome cannot be recorded either, so the
                // request leaves no trace in the history window.
                tracing::warn!(%identifier, "admission store unavailable, failing open: {e}");
                return next.run(request).await;
            }
        },
    };
    let check_ms = started.elapsed().as_secs_f64() * 1000.0;

    // Outcome is recorded regardless of the decision; a recording
    // failure must not veto an already-admitted request.
    if let Err(e) = state.detector.record(&identifier, decision.allowed).await {
        tracing::warn!(%identifier, "failed to record request outcome: {e}");
    }

    state.analytics.record(RequestLog::new(
        &identifier,
        &path,
        decision.allowed,
        check_ms,
        decision.algorithm,
    ));

    if !decision.allowed {
        return throttled_response(&identifier, &decision);
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(v) = decision.tokens_remaining.to_string().parse() {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = decision.algorithm.parse() {
        headers.insert("x-ratelimit-algorithm", v);
    }
    if let Ok(v) = format!("{check_ms:.2}ms").parse() {
        headers.insert("x-response-time", v);
    }
    response
}

fn throttled_response(identifier: &str, decision: &Decision) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Rate limit exceeded",
            "message": format!(
                "Too many requests. Try again in {} seconds.",
                decision.retry_after
            ),
            "retry_after": decision.retry_after,
            "user_id": identifier,
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    if let Ok(v) = (decision.retry_after as u64).to_string().parse() {
        headers.insert("retry-after", v);
    }
    if let Ok(v) = "0".parse() {
        headers.insert("x-ratelimit-remaining", v);
    }
    response
}

fn store_unavailable_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "Admission store unavailable",
            "message": "Rate limiting is temporarily unavailable. Try again shortly.",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::Router;
    use tower::ServiceExt;

    use tollgate_engine::{AnomalyDetector, TokenBucketLimiter};
    use tollgate_store::{AdmissionStore, MemoryStore, RawDecision, StoreError};

    use crate::analytics::AnalyticsHandle;
    use crate::config::{LimitsConfig, ServerConfig};
    use crate::routes::router;

    fn peer() -> SocketAddr {
        "10.1.2.3:55000".parse().unwrap()
    }

    /// Store stub that answers every call with `Unavailable`.
    struct DownStore;

    #[async_trait]
    impl AdmissionStore for DownStore {
        async fn bucket_check(
            &self,
            _key: &str,
            _max_tokens: u32,
            _refill_rate: f64,
            _ttl_secs: u64,
            _now: f64,
        ) -> Result<RawDecision, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn history_push(
            &self,
            _key: &str,
            _entry: &str,
            _capacity: usize,
            _ttl_secs: u64,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn history_read(&self, _key: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn app(store: Arc<dyn AdmissionStore>, config: ServerConfig) -> Router {
        let limits = config.limits.to_rate_limit_config();
        let limiter = TokenBucketLimiter::new(Arc::clone(&store), limits.clone()).unwrap();
        let detector = AnomalyDetector::new(store, limits).unwrap();
        router(Arc::new(AppState {
            limiter,
            detector,
            config,
            analytics: AnalyticsHandle::disabled(),
        }))
    }

    fn request(path: &str) -> HttpRequest<Body> {
        let mut request = HttpRequest::builder().uri(path).body(Body::empty()).unwrap();
        request.extensions_mut().insert(ConnectInfo(peer()));
        request
    }

    #[tokio::test]
    async fn failing_store_with_closed_policy_rejects() {
        let config = ServerConfig { fail_policy: FailPolicy::Closed, ..Default::default() };
        let response = app(Arc::new(DownStore), config)
            .oneshot(request("/api/test"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn failing_store_with_open_policy_forwards() {
        let config = ServerConfig { fail_policy: FailPolicy::Open, ..Default::default() };
        let response = app(Arc::new(DownStore), config)
            .oneshot(request("/api/test"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // Unmetered while the store is down: no rate-limit headers.
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
    }

    #[tokio::test]
    async fn exempt_paths_bypass_the_store_entirely() {
        let config = ServerConfig { fail_policy: FailPolicy::Closed, ..Default::default() };
        let response = app(Arc::new(DownStore), config)
            .oneshot(request("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn exhausted_bucket_yields_429_with_throttle_headers() {
        let config = ServerConfig {
            limits: LimitsConfig { max_tokens: 1, ..Default::default() },
            ..Default::default()
        };
        let app = app(Arc::new(MemoryStore::new()), config);

        let first = app.clone().oneshot(request("/api/test")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(
            first.headers().get("x-ratelimit-remaining").unwrap(),
            "0"
        );
        assert_eq!(
            first.headers().get("x-ratelimit-algorithm").unwrap(),
            "token_bucket"
        );

        let second = app.oneshot(request("/api/test")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers().get("x-ratelimit-remaining").unwrap(), "0");
        assert!(second.headers().get("retry-after").is_some());
    }

    #[test]
    fn api_key_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "key-123".parse().unwrap());
        assert_eq!(client_identifier(&headers, peer()), "key-123");
    }

    #[test]
    fn falls_back_to_peer_ip() {
        assert_eq!(client_identifier(&HeaderMap::new(), peer()), "10.1.2.3");
    }

    #[test]
    fn empty_api_key_falls_back() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "".parse().unwrap());
        assert_eq!(client_identifier(&headers, peer()), "10.1.2.3");
    }

    #[test]
    fn exempt_paths_cover_banner_and_health() {
        assert!(EXEMPT_PATHS.contains(&"/"));
        assert!(EXEMPT_PATHS.contains(&"/health"));
        assert!(!EXEMPT_PATHS.contains(&"/api/test"));
    }
}
