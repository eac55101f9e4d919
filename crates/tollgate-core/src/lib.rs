//! Tollgate core - shared types and conventions for the admission layer
//!
//! Defines the data model shared by the store backends and the engines:
//! admission decisions, history entries and their wire format, anomaly
//! reports, the rate-limit configuration struct, and the key naming
//! conventions for the shared state store.

pub mod config;
pub mod keys;
pub mod types;

pub use config::RateLimitConfig;
pub use keys::{bucket_key, history_key};
pub use types::{
    AnomalyReport, AnomalyStats, Decision, HistoryEntry, round1, round2, unix_now,
    TOKEN_BUCKET_ALGORITHM,
};
