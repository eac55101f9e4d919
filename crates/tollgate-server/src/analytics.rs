//! Write-only analytics sink.
//!
//! One JSON object per non-exempt request, appended to a JSONL file by a
//! background task. The sink is fed through a bounded channel and drops
//! records when the channel is full: analytics must never block or fail
//! an admission decision. Nothing in the serving path reads it back.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 1024;

/// One admission outcome, as persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLog {
    pub id: Uuid,
    pub user_id: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub allowed: bool,
    /// Admission-check latency in milliseconds.
    pub response_time_ms: f64,
    pub algorithm: String,
}

impl RequestLog {
    pub fn new(
        user_id: &str,
        endpoint: &str,
        allowed: bool,
        response_time_ms: f64,
        algorithm: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            endpoint: endpoint.to_string(),
            timestamp: Utc::now(),
            allowed,
            response_time_ms,
            algorithm: algorithm.to_string(),
        }
    }
}

/// Cheap handle the middleware clones into every request.
#[derive(Clone)]
pub struct AnalyticsHandle {
    tx: Option<mpsc::Sender<RequestLog>>,
}

impl AnalyticsHandle {
    /// A handle that discards everything (no `analytics_path` configured).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a record; dropped silently if the writer is behind.
    pub fn record(&self, log: RequestLog) {
        if let Some(tx) = &self.tx {
            if tx.try_send(log).is_err() {
                tracing::debug!("analytics channel full, dropping record");
            }
        }
    }
}

/// Start the background writer appending to `path`.
pub fn spawn_writer(path: PathBuf) -> AnalyticsHandle {
    let (tx, mut rx) = mpsc::channel::<RequestLog>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), "analytics sink disabled: {e}");
                return;
            }
        };
        let mut writer = BufWriter::new(file);

        while let Some(log) = rx.recv().await {
            let Ok(mut line) = serde_json::to_string(&log) else { continue };
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                tracing::warn!(path = %path.display(), "analytics write failed, stopping sink");
                return;
            }
            let _ = writer.flush().await;
        }
    });

    AnalyticsHandle { tx: Some(tx) }
}
