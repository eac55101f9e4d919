use std::sync::Arc;

use tollgate_core::RateLimitConfig;
use tollgate_engine::{AnomalyDetector, TokenBucketLimiter};
use tollgate_store::MemoryStore;

fn detector() -> AnomalyDetector {
    AnomalyDetector::new(Arc::new(MemoryStore::new()), RateLimitConfig::default()).unwrap()
}

#[tokio::test]
async fn test_fewer_than_ten_entries_reports_insufficient_data() {
    let detector = detector();
    for i in 0..9 {
        detector.record_at("c", true, 1000.0 + i as f64).await.unwrap();
    }
    let report = detector.analyze_at("c", 1010.0).await.unwrap();
    assert!(!report.is_anomaly);
    assert_eq!(report.risk_score, 0);
    assert_eq!(report.stats.total_requests_analyzed, 9);
    assert_eq!(report.stats.requests_last_10s, 9);
    assert!(report.reasons[0].contains("insufficient data"));
}

#[tokio::test]
async fn test_unknown_identifier_reports_zero_entries() {
    let report = detector().analyze_at("nobody", 1000.0).await.unwrap();
    assert!(!report.is_anomaly);
    assert_eq!(report.stats.total_requests_analyzed, 0);
}

#[tokio::test]
async fn test_history_never_exceeds_capacity() {
    let detector = detector();
    for i in 0..250 {
        detector.record_at("c", true, 1000.0 + i as f64).await.unwrap();
    }
    let report = detector.analyze_at("c", 2000.0).await.unwrap();
    assert_eq!(report.stats.total_requests_analyzed, 100);
}

#[tokio::test]
async fn test_analyze_is_idempotent_without_intervening_record() {
    let detector = detector();
    for i in 0..30 {
        detector.record_at("c", i % 3 != 0, 1000.0 + 0.2 * i as f64).await.unwrap();
    }
    let first = detector.analyze_at("c", 1010.0).await.unwrap();
    let second = detector.analyze_at("c", 1010.0).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_burst_of_sixty_in_nine_seconds_is_anomalous() {
    let detector = detector();
    for i in 0..60 {
        detector.record_at("c", true, 1000.0 + 0.15 * i as f64).await.unwrap();
    }
    let report = detector.analyze_at("c", 1009.0).await.unwrap();
    assert!(report.is_anomaly);
    assert!(report.risk_score >= 40);
    assert!(report.reasons.iter().any(|r| r.contains("burst detected")));
    assert_eq!(report.stats.requests_last_10s, 60);
}

#[tokio::test]
async fn test_heavy_blocking_is_anomalous() {
    let detector = detector();
    // 50 well-spaced requests, 36 of them denied (72%).
    for i in 0..50 {
        detector.record_at("c", i % 25 < 7, 1000.0 + 60.0 * i as f64).await.unwrap();
    }
    let report = detector.analyze_at("c", 100000.0).await.unwrap();
    assert!(report.is_anomaly);
    assert!(report.risk_score >= 35);
    assert!(report.reasons.iter().any(|r| r.contains("high block rate")));
    assert_eq!(report.stats.block_rate_percent, 72.0);
}

#[tokio::test]
async fn test_admission_outcomes_feed_the_detector() {
    // Both engines over one shared store, wired the way the facade
    // wires them: check, then record the outcome unconditionally.
    let store = Arc::new(MemoryStore::new());
    let config = RateLimitConfig { max_tokens: 3, refill_rate: 0.01, ..Default::default() };
    let limiter = TokenBucketLimiter::new(store.clone(), config.clone()).unwrap();
    let detector = AnomalyDetector::new(store, config).unwrap();

    for i in 0..12 {
        let now = 1000.0 + 0.5 * i as f64;
        let decision = limiter.check_at("c", now).await.unwrap();
        detector.record_at("c", decision.allowed, now).await.unwrap();
    }

    // 3 admitted, 9 denied -> 75% block rate over 12 entries.
    let report = detector.analyze_at("c", 1010.0).await.unwrap();
    assert!(report.is_anomaly);
    assert_eq!(report.stats.total_requests_analyzed, 12);
    assert_eq!(report.stats.block_rate_percent, 75.0);
    assert!(report.reasons.iter().any(|r| r.contains("high block rate")));
}
