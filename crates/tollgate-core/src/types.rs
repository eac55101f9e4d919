use serde::{Deserialize, Serialize};

/// Algorithm name reported alongside every admission decision.
pub const TOKEN_BUCKET_ALGORITHM: &str = "token_bucket";

/// Outcome of a single admission check.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Whole tokens left after this check (floored; 0 on deny).
    pub tokens_remaining: u64,
    /// Seconds until at least one token is available (0 on allow),
    /// rounded to two decimal places.
    pub retry_after: f64,
    /// Name of the admission algorithm, for observability headers.
    pub algorithm: &'static str,
}

/// One recorded request outcome in a client's history list.
///
/// Wire format in the store is `"{timestamp}:{0|1}"` where the timestamp
/// is fractional Unix seconds and the flag is 1 for allowed, 0 for denied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: f64,
    pub allowed: bool,
}

impl HistoryEntry {
    pub fn new(timestamp: f64, allowed: bool) -> Self {
        Self { timestamp, allowed }
    }

    /// Encode to the store wire format.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.timestamp, if self.allowed { 1 } else { 0 })
    }

    /// Parse the wire format. Returns `None` for anything malformed;
    /// callers skip such entries rather than failing the analysis.
    pub fn parse(raw: &str) -> Option<Self> {
        let (ts, flag) = raw.split_once(':')?;
        let timestamp: f64 = ts.parse().ok()?;
        if !timestamp.is_finite() {
            return None;
        }
        let allowed = match flag {
            "1" => true,
            "0" => false,
            _ => return None,
        };
        Some(Self { timestamp, allowed })
    }
}

/// Aggregate stats reported with every anomaly analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyStats {
    pub total_requests_analyzed: usize,
    pub requests_last_10s: usize,
    /// Percentage of recent requests denied, rounded to one decimal.
    pub block_rate_percent: f64,
}

/// Risk report derived from a client's history snapshot.
///
/// Purely computed at call time; repeated analysis over the same history
/// yields an identical report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub is_anomaly: bool,
    /// Additive heuristic score clamped to [0, 100]. Not a probability.
    pub risk_score: u8,
    pub reasons: Vec<String>,
    pub stats: AnomalyStats,
}

/// Current wall-clock time as fractional Unix seconds.
pub fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Round to two decimal places (externally reported retry_after).
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Round to one decimal place (block-rate percentage).
pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
