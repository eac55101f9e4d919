//! Token-bucket admission engine.
//!
//! Each client owns a bucket refilled continuously at `refill_rate`
//! tokens per second up to `max_tokens`; every admitted request consumes
//! one token. Bucket state lives only in the shared store - no
//! in-process caching - so every concurrent checker observes a single
//! consistent bucket. A deny writes nothing: `last_refill` advances only
//! on an allowed consumption, so rapid denied retries cannot erode the
//! refill clock.

use std::sync::Arc;

use tollgate_core::{bucket_key, round2, unix_now, Decision, RateLimitConfig, TOKEN_BUCKET_ALGORITHM};
use tollgate_store::AdmissionStore;

use crate::EngineError;

/// Per-client token-bucket rate limiter over a shared store.
pub struct TokenBucketLimiter {
    store: Arc<dyn AdmissionStore>,
    config: RateLimitConfig,
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenBucketLimiter {
    /// Build a limiter, rejecting unusable configuration up front.
    pub fn new(store: Arc<dyn AdmissionStore>, config: RateLimitConfig) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        Ok(Self { store, config })
    }

    /// The configuration this limiter enforces.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether one request from `identifier` is admitted now.
    pub async fn check(&self, identifier: &str) -> Result<Decision, EngineError> {
        self.check_at(identifier, unix_now()).await
    }

    /// Decision at an explicit point in time (fractional Unix seconds).
    ///
    /// The whole load/refill/consume sequence executes atomically inside
    /// the store: two simultaneous callers racing on one remaining token
    /// cannot both be admitted.
    pub async fn check_at(&self, identifier: &str, now: f64) -> Result<Decision, EngineError> {
        let key = bucket_key(identifier);
        let raw = self
            .store
            .bucket_check(
                &key,
                self.config.max_tokens,
                self.config.refill_rate,
                self.config.bucket_ttl.as_secs(),
                now,
            )
            .await?;

        if !raw.allowed {
            tracing::debug!(identifier, retry_after = raw.retry_after, "request denied");
        }

        // Tokens stay fractional internally; only the report is floored.
        Ok(Decision {
            allowed: raw.allowed,
            tokens_remaining: raw.tokens.floor() as u64,
            retry_after: round2(raw.retry_after),
            algorithm: TOKEN_BUCKET_ALGORITHM,
        })
    }
}
