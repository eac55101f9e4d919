//! Server configuration loaded from a TOML file.
//!
//! Every field has a default, so an empty (or absent) file yields a
//! working single-node setup pointing at a local Redis.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tollgate_core::RateLimitConfig;

/// What the façade does when the shared store is unreachable.
///
/// This is a deployment decision, never an implicit fallback: `open`
/// admits traffic unmetered while the store is down, `closed` rejects
/// it with 503. The configured policy is logged at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    Open,
    Closed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub redis_url: String,
    pub fail_policy: FailPolicy,
    /// JSONL analytics sink; disabled when unset.
    pub analytics_path: Option<PathBuf>,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            fail_policy: FailPolicy::Closed,
            analytics_path: None,
            limits: LimitsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_tokens: u32,
    pub window_seconds: u32,
    pub bucket_ttl_secs: u64,
    pub history_ttl_secs: u64,
    pub history_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            window_seconds: 60,
            bucket_ttl_secs: 3600,
            history_ttl_secs: 300,
            history_capacity: 100,
        }
    }
}

impl LimitsConfig {
    /// The engine configuration, with `refill_rate` derived as
    /// `max_tokens / window_seconds`.
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_tokens: self.max_tokens,
            refill_rate: f64::from(self.max_tokens) / f64::from(self.window_seconds.max(1)),
            bucket_ttl: Duration::from_secs(self.bucket_ttl_secs),
            history_ttl: Duration::from_secs(self.history_ttl_secs),
            history_capacity: self.history_capacity,
        }
    }
}

impl ServerConfig {
    /// Load from `path`, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))
            }
        }
    }
}
