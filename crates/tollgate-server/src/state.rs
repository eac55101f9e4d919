use tollgate_engine::{AnomalyDetector, TokenBucketLimiter};

use crate::analytics::AnalyticsHandle;
use crate::config::ServerConfig;

/// Shared handles for every request handler and the middleware.
pub struct AppState {
    pub limiter: TokenBucketLimiter,
    pub detector: AnomalyDetector,
    pub config: ServerConfig,
    pub analytics: AnalyticsHandle,
}
