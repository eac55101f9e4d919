use std::time::Duration;

/// Configuration consumed by the admission and scoring engines.
///
/// `refill_rate` is tokens added per second; by convention it is derived
/// as `max_tokens / window_seconds` (100 requests per 60 s ~= 1.67/s).
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Bucket capacity.
    pub max_tokens: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Idle TTL for bucket state in the store.
    pub bucket_ttl: Duration,
    /// Idle TTL for per-client history, independent of the bucket TTL.
    pub history_ttl: Duration,
    /// Most-recent entries retained per client.
    pub history_capacity: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            refill_rate: 100.0 / 60.0,
            bucket_ttl: Duration::from_secs(3600),
            history_ttl: Duration::from_secs(300),
            history_capacity: 100,
        }
    }
}

impl RateLimitConfig {
    /// Derive the refill rate from a request budget over a window.
    pub fn per_window(max_tokens: u32, window_seconds: u32) -> Self {
        Self {
            max_tokens,
            refill_rate: f64::from(max_tokens) / f64::from(window_seconds.max(1)),
            ..Self::default()
        }
    }

    /// Check the configuration for values the engines cannot operate with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than zero".into());
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(format!("refill_rate must be positive, got {}", self.refill_rate));
        }
        if self.history_capacity == 0 {
            return Err("history_capacity must be greater than zero".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RateLimitConfig::default().validate().is_ok());
    }

    #[test]
    fn per_window_derives_rate() {
        let cfg = RateLimitConfig::per_window(100, 60);
        assert!((cfg.refill_rate - 100.0 / 60.0).abs() < 1e-9);
        assert_eq!(cfg.max_tokens, 100);
    }

    #[test]
    fn zero_capacity_rejected() {
        let cfg = RateLimitConfig { max_tokens: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_positive_rate_rejected() {
        let cfg = RateLimitConfig { refill_rate: 0.0, ..Default::default() };
        assert!(cfg.validate().is_err());
        let cfg = RateLimitConfig { refill_rate: f64::NAN, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_history_capacity_rejected() {
        let cfg = RateLimitConfig { history_capacity: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }
}
