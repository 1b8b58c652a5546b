//! Shared log channel
//!
//! Fan-out of pipeline milestones to management-API consumers: a broadcast
//! channel for live subscribers plus a bounded ring buffer backing the
//! `GET /logs` tail.

use axum::extract::{Query, State};
use axum::Json;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{ApiResponse, AppState};

/// Ring buffer capacity for the log tail
const TAIL_CAPACITY: usize = 512;

/// Broadcast channel capacity
const CHANNEL_CAPACITY: usize = 1024;

/// A single log line published on the shared channel
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub time: String,
    pub level: String,
    pub message: String,
}

impl LogEvent {
    fn new(level: &str, message: String) -> Self {
        LogEvent {
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
            level: level.to_string(),
            message,
        }
    }
}

/// Handle to the shared log channel; cheap to clone.
#[derive(Clone)]
pub struct LogChannel {
    tx: broadcast::Sender<LogEvent>,
    tail: Arc<Mutex<VecDeque<LogEvent>>>,
}

impl LogChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        LogChannel {
            tx,
            tail: Arc::new(Mutex::new(VecDeque::with_capacity(TAIL_CAPACITY))),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push("info", message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push("warning", message.into());
    }

    fn push(&self, level: &str, message: String) {
        let event = LogEvent::new(level, message);
        {
            let mut tail = self.tail.lock();
            if tail.len() == TAIL_CAPACITY {
                tail.pop_front();
            }
            tail.push_back(event.clone());
        }
        // No subscribers is fine; the tail still records the event.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    /// Most recent events, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<LogEvent> {
        let tail = self.tail.lock();
        let skip = tail.len().saturating_sub(limit);
        tail.iter().skip(skip).cloned().collect()
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        LogChannel::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// GET /logs - recent log tail
pub async fn get_logs(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> Json<ApiResponse> {
    let events = state.logs.tail(params.limit);
    Json(ApiResponse::ok(
        "logs",
        serde_json::json!(events),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_most_recent() {
        let logs = LogChannel::new();
        for i in 0..600 {
            logs.info(format!("event {}", i));
        }
        let tail = logs.tail(10);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[9].message, "event 599");
        assert_eq!(tail[0].message, "event 590");
    }

    #[test]
    fn test_subscribers_receive_events() {
        let logs = LogChannel::new();
        let mut rx = logs.subscribe();
        logs.warn("heads up");
        let event = rx.try_recv().unwrap();
        assert_eq!(event.level, "warning");
        assert_eq!(event.message, "heads up");
    }
}
