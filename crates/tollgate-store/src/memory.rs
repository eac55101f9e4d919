//! In-process store backend.
//!
//! A mutex held across the read-modify-write gives the same per-key
//! indivisibility the Redis script gives across processes. Bucket TTLs
//! are evaluated against the caller-supplied `now` so idle expiry is
//! testable without sleeping; history TTLs use the monotonic clock.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{apply_bucket, AdmissionStore, RawDecision, StoreError};

#[derive(Debug)]
struct BucketSlot {
    tokens: f64,
    last_refill: f64,
    expires_at: f64,
}

#[derive(Debug)]
struct HistorySlot {
    /// Newest entry at the front.
    entries: VecDeque<String>,
    expires_at: Instant,
}

/// Mutex-guarded in-memory implementation of [`AdmissionStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, BucketSlot>>,
    histories: Mutex<HashMap<String, HistorySlot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdmissionStore for MemoryStore {
    async fn bucket_check(
        &self,
        key: &str,
        max_tokens: u32,
        refill_rate: f64,
        ttl_secs: u64,
        now: f64,
    ) -> Result<RawDecision, StoreError> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        // Lazy idle expiry.
        if buckets.get(key).is_some_and(|slot| slot.expires_at <= now) {
            buckets.remove(key);
        }

        match buckets.get_mut(key) {
            None => {
                let tokens = f64::from(max_tokens) - 1.0;
                buckets.insert(
                    key.to_string(),
                    BucketSlot { tokens, last_refill: now, expires_at: now + ttl_secs as f64 },
                );
                Ok(RawDecision { allowed: true, tokens, retry_after: 0.0 })
            }
            Some(slot) => {
                let (decision, persisted) =
                    apply_bucket(slot.tokens, slot.last_refill, max_tokens, refill_rate, now);
                if let Some(tokens) = persisted {
                    slot.tokens = tokens;
                    slot.last_refill = now;
                    slot.expires_at = now + ttl_secs as f64;
                }
                Ok(decision)
            }
        }
    }

    async fn history_push(
        &self,
        key: &str,
        entry: &str,
        capacity: usize,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let mut histories = self.histories.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let slot = histories.entry(key.to_string()).or_insert_with(|| HistorySlot {
            entries: VecDeque::with_capacity(capacity),
            expires_at: now,
        });
        if slot.expires_at <= now {
            slot.entries.clear();
        }
        slot.entries.push_front(entry.to_string());
        slot.entries.truncate(capacity);
        slot.expires_at = now + Duration::from_secs(ttl_secs);
        Ok(())
    }

    async fn history_read(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut histories = self.histories.lock().unwrap_or_else(|e| e.into_inner());
        match histories.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => {
                Ok(slot.entries.iter().cloned().collect())
            }
            Some(_) => {
                histories.remove(key);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}
