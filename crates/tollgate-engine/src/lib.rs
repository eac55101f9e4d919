//! Tollgate engines - the two algorithmic cores of the admission layer.
//!
//! - [`TokenBucketLimiter`]: per-client rate limiting over state shared
//!   across all serving processes. The consume-or-deny decision executes
//!   atomically inside the store; this crate owns the configuration,
//!   validation, and external numeric shaping.
//! - [`AnomalyDetector`]: bounded per-client request history plus an
//!   on-demand heuristic risk analysis over the current snapshot.
//!
//! Engines are stateless apart from their store handle, so any number of
//! instances across any number of processes coordinate solely through
//! the store.

pub mod anomaly;
pub mod bucket;

pub use anomaly::AnomalyDetector;
pub use bucket::TokenBucketLimiter;

use thiserror::Error;
use tollgate_store::StoreError;

/// Failures an engine surfaces to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The shared store could not be reached. Deliberately propagated,
    /// never swallowed: whether to fail open or closed on this is the
    /// caller's deployment decision.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// The engine was constructed with unusable parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        // ScriptMissing only surfaces after the store's own
        // reload-and-retry failed, which is an availability problem.
        match err {
            StoreError::Unavailable(msg) | StoreError::ScriptMissing(msg) => {
                EngineError::StoreUnavailable(msg)
            }
        }
    }
}
