//! Access log sink.
//!
//! # Responsibilities
//! - Accept access records from every request handler
//! - Write them as JSON lines from a single consumer task
//!
//! # Design Decisions
//! - Bounded queue; the overflow policy is explicit (drop newest or block)
//! - Dropped records are counted, never silently lost
//! - Without a configured file, records become `access` tracing events

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::{header, Request};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{LoggingConfig, OverflowPolicy};
use crate::observability::metrics;

/// One access log line.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccessRecord {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub url: String,
    pub user_agent: String,
}

impl AccessRecord {
    pub fn from_request<B>(ip: &str, request: &Request<B>) -> Self {
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| request.uri().authority().map(|a| a.as_str()))
            .unwrap_or_default();
        let path = request
            .uri()
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");

        Self {
            timestamp: Utc::now(),
            ip: ip.to_string(),
            url: format!("{host}{path}"),
            user_agent: request
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Producer handle of the access log. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AccessLog {
    tx: mpsc::Sender<AccessRecord>,
    overflow: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl AccessLog {
    /// Create a handle and the receiving end of its queue.
    pub fn channel(capacity: usize, overflow: OverflowPolicy) -> (Self, mpsc::Receiver<AccessRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                overflow,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Create a handle and spawn the consumer writing to the configured sink.
    pub fn spawn(config: &LoggingConfig) -> (Self, JoinHandle<()>) {
        let (log, rx) = Self::channel(config.queue_capacity, config.overflow);
        let path = config.access_log.clone();
        let consumer = tokio::spawn(async move {
            match path {
                Some(path) => write_to_file(&path, rx).await,
                None => write_to_tracing(rx).await,
            }
        });
        (log, consumer)
    }

    /// Submit a record according to the overflow policy.
    pub async fn record(&self, record: AccessRecord) {
        match self.overflow {
            OverflowPolicy::Block => {
                if self.tx.send(record).await.is_err() {
                    self.note_dropped();
                }
            }
            OverflowPolicy::DropNewest => {
                if self.tx.try_send(record).is_err() {
                    self.note_dropped();
                }
            }
        }
    }

    /// Records lost to a full or closed queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::record_access_log_dropped();
    }
}

async fn write_to_file(path: &Path, mut rx: mpsc::Receiver<AccessRecord>) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Cannot open access log, falling back to events");
            write_to_tracing(rx).await;
            return;
        }
    };

    while let Some(record) = rx.recv().await {
        let mut line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Unserializable access record");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = file.write_all(line.as_bytes()).await {
            tracing::error!(path = %path.display(), error = %e, "Access log write failed");
        }
    }

    let _ = file.flush().await;
}

async fn write_to_tracing(mut rx: mpsc::Receiver<AccessRecord>) {
    while let Some(record) = rx.recv().await {
        tracing::info!(
            target: "access",
            ip = %record.ip,
            url = %record.url,
            user_agent = %record.user_agent,
            "Request"
        );
    }
}
