//! Anomaly scoring engine.
//!
//! Keeps a bounded recent-history window per client and computes a
//! heuristic risk score from it on demand. Three independent, additive
//! checks:
//! - burst: more than 50 requests inside the last 10 seconds;
//! - high block rate: more than 70% of the last 50 requests denied;
//! - bot-like cadence: mean gap under 50 ms across the newest 20
//!   requests.
//!
//! The weights and the 35-point anomaly threshold are deliberate
//! constants with no derivation behind them; they are named here so a
//! deployment can fork and retune them in one place.

use std::sync::Arc;

use tollgate_core::{
    history_key, round1, unix_now, AnomalyReport, AnomalyStats, HistoryEntry, RateLimitConfig,
};
use tollgate_store::AdmissionStore;

use crate::EngineError;

/// Window inspected by the burst check, seconds.
pub const BURST_WINDOW_SECS: f64 = 10.0;
/// Requests inside the window before the burst check fires.
pub const BURST_THRESHOLD: usize = 50;
pub const BURST_WEIGHT: u32 = 40;

/// Newest entries inspected by the block-rate check.
pub const BLOCK_RATE_SAMPLE: usize = 50;
/// Percentage above which the block-rate check fires.
pub const BLOCK_RATE_THRESHOLD: f64 = 70.0;
pub const BLOCK_RATE_WEIGHT: u32 = 35;

/// Newest entries inspected by the cadence check.
pub const INTERVAL_SAMPLE: usize = 20;
/// Mean gap below which the cadence check fires, milliseconds.
pub const INTERVAL_THRESHOLD_MS: f64 = 50.0;
pub const INTERVAL_WEIGHT: u32 = 25;

/// Minimum recorded entries before any analysis is attempted.
pub const MIN_SAMPLE: usize = 10;
/// Score at or above which the traffic is flagged anomalous.
pub const ANOMALY_THRESHOLD: u8 = 35;

/// Records request outcomes and scores traffic patterns per client.
pub struct AnomalyDetector {
    store: Arc<dyn AdmissionStore>,
    config: RateLimitConfig,
}

impl AnomalyDetector {
    pub fn new(store: Arc<dyn AdmissionStore>, config: RateLimitConfig) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        Ok(Self { store, config })
    }

    /// Record one request outcome for `identifier`.
    ///
    /// Appends to the history list, trims it to the newest
    /// `history_capacity` entries, and refreshes the idle TTL. Informed
    /// of the admission decision, never consulted for it.
    pub async fn record(&self, identifier: &str, allowed: bool) -> Result<(), EngineError> {
        self.record_at(identifier, allowed, unix_now()).await
    }

    /// Record with an explicit timestamp (fractional Unix seconds).
    pub async fn record_at(&self, identifier: &str, allowed: bool, now: f64) -> Result<(), EngineError> {
        let key = history_key(identifier);
        let entry = HistoryEntry::new(now, allowed).encode();
        self.store
            .history_push(
                &key,
                &entry,
                self.config.history_capacity,
                self.config.history_ttl.as_secs(),
            )
            .await?;
        Ok(())
    }

    /// Score the client's current history snapshot.
    ///
    /// Pure with respect to the snapshot: repeated calls without an
    /// intervening [`record`](Self::record) return identical reports.
    pub async fn analyze(&self, identifier: &str) -> Result<AnomalyReport, EngineError> {
        self.analyze_at(identifier, unix_now()).await
    }

    /// Analysis against an explicit "now" (fractional Unix seconds).
    pub async fn analyze_at(&self, identifier: &str, now: f64) -> Result<AnomalyReport, EngineError> {
        let raw = self.store.history_read(&history_key(identifier)).await?;
        Ok(evaluate(&raw, now))
    }
}

/// Score a raw history snapshot. Entries that fail to parse are skipped
/// silently: corrupted history degrades analysis quality, not
/// availability.
pub fn evaluate(raw: &[String], now: f64) -> AnomalyReport {
    let mut entries: Vec<HistoryEntry> =
        raw.iter().filter_map(|line| HistoryEntry::parse(line)).collect();
    entries.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));

    let last_10s = entries
        .iter()
        .filter(|e| now - e.timestamp <= BURST_WINDOW_SECS)
        .count();
    let sample = &entries[..entries.len().min(BLOCK_RATE_SAMPLE)];
    let blocked = sample.iter().filter(|e| !e.allowed).count();
    let block_rate = if sample.is_empty() {
        0.0
    } else {
        blocked as f64 / sample.len() as f64 * 100.0
    };

    // Too little history for the heuristics; the stats are still real,
    // computed over whatever parsed.
    if raw.len() < MIN_SAMPLE || entries.is_empty() {
        return AnomalyReport {
            is_anomaly: false,
            risk_score: 0,
            reasons: vec![format!("insufficient data: {} requests recorded", raw.len())],
            stats: AnomalyStats {
                total_requests_analyzed: entries.len(),
                requests_last_10s: last_10s,
                block_rate_percent: round1(block_rate),
            },
        };
    }

    let mut risk: u32 = 0;
    let mut reasons: Vec<String> = Vec::new();

    if last_10s > BURST_THRESHOLD {
        risk += BURST_WEIGHT;
        reasons.push(format!("burst detected: {last_10s} requests in last 10 seconds"));
    }

    if block_rate > BLOCK_RATE_THRESHOLD {
        risk += BLOCK_RATE_WEIGHT;
        reasons.push(format!(
            "high block rate: {:.1}% of requests blocked",
            round1(block_rate)
        ));
    }

    if entries.len() >= INTERVAL_SAMPLE {
        let window = &entries[..INTERVAL_SAMPLE];
        let gap_sum: f64 = window
            .windows(2)
            .map(|pair| (pair[0].timestamp - pair[1].timestamp).abs() * 1000.0)
            .sum();
        let mean_gap_ms = gap_sum / (INTERVAL_SAMPLE - 1) as f64;
        if mean_gap_ms < INTERVAL_THRESHOLD_MS {
            risk += INTERVAL_WEIGHT;
            reasons.push(format!(
                "bot-like behavior: average {mean_gap_ms:.1}ms between requests"
            ));
        }
    }

    let risk_score = risk.min(100) as u8;
    if reasons.is_empty() {
        reasons.push("traffic pattern looks normal".to_string());
    }

    AnomalyReport {
        is_anomaly: risk_score >= ANOMALY_THRESHOLD,
        risk_score,
        reasons,
        stats: AnomalyStats {
            total_requests_analyzed: entries.len(),
            requests_last_10s: last_10s,
            block_rate_percent: round1(block_rate),
        },
    }
}
