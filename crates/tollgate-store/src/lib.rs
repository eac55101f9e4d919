//! Shared atomic state store boundary.
//!
//! All cross-process coordination happens through an [`AdmissionStore`]:
//! the token-bucket transaction must execute indivisibly per key (two
//! concurrent callers racing on one remaining token must not both be
//! admitted), while history writes only need eventual convergence to the
//! capacity bound.
//!
//! Two backends:
//! - [`RedisStore`] runs the bucket transaction as a server-side Lua
//!   script so the read-modify-write is a single round trip.
//! - [`MemoryStore`] guards the same arithmetic with a process-local
//!   mutex; used by tests and single-node deployments.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

/// Failures surfaced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or did not answer in time.
    /// Fail-open vs. fail-closed on this condition is the caller's
    /// policy decision; the store never decides it.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The server-side transaction program was evicted and could not be
    /// restored. Backends recover from a single eviction internally;
    /// this surfaces only after the reload-and-retry also failed.
    #[error("atomic script missing: {0}")]
    ScriptMissing(String),
}

/// Raw outcome of the bucket transaction, before external rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDecision {
    pub allowed: bool,
    /// Fractional tokens left after the check (0 on deny).
    pub tokens: f64,
    /// Seconds until at least one token is available (0 on allow).
    pub retry_after: f64,
}

/// Abstraction over the shared state store.
///
/// `now` is supplied by the caller as fractional Unix seconds so engines
/// stay deterministic under test; production callers pass the wall clock.
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    /// Execute the token-bucket consume-or-deny transaction for `key`.
    ///
    /// Semantics, indivisible with respect to concurrent calls on the
    /// same key:
    /// 1. absent bucket: initialize to `max_tokens - 1` (one token
    ///    pre-consumed), stamp `last_refill = now`, set the idle TTL,
    ///    allow;
    /// 2. otherwise refill by `elapsed * refill_rate`, clamped to
    ///    `max_tokens`;
    /// 3. if at least one whole token: consume it, persist, allow;
    /// 4. else deny without writing anything - `last_refill` only
    ///    advances on an allowed consumption.
    async fn bucket_check(
        &self,
        key: &str,
        max_tokens: u32,
        refill_rate: f64,
        ttl_secs: u64,
        now: f64,
    ) -> Result<RawDecision, StoreError>;

    /// Append one encoded history entry, trim the list to `capacity`
    /// newest entries, and refresh the idle TTL.
    async fn history_push(
        &self,
        key: &str,
        entry: &str,
        capacity: usize,
        ttl_secs: u64,
    ) -> Result<(), StoreError>;

    /// Snapshot the raw history list, newest first.
    async fn history_read(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

/// Shared bucket arithmetic for in-process backends (steps 2-4 above).
/// The Redis backend carries the same logic inside its Lua script.
pub(crate) fn apply_bucket(
    tokens: f64,
    last_refill: f64,
    max_tokens: u32,
    refill_rate: f64,
    now: f64,
) -> (RawDecision, Option<f64>) {
    let elapsed = (now - last_refill).max(0.0);
    let refilled = (tokens + elapsed * refill_rate).min(f64::from(max_tokens));
    if refilled >= 1.0 {
        let remaining = refilled - 1.0;
        (
            RawDecision { allowed: true, tokens: remaining, retry_after: 0.0 },
            Some(remaining),
        )
    } else {
        (
            RawDecision {
                allowed: false,
                tokens: 0.0,
                retry_after: (1.0 - refilled) / refill_rate,
            },
            None,
        )
    }
}
