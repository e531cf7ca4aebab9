//! Monitor cycle result types

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::SignalDirection;

/// What the scheduler should do with a finished cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Success,
    /// Transient failure; run the cycle again.
    Retry,
    /// The service refused the scan. Not retried.
    Failed,
}

/// One opposite signal latched during a cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub followed_id: i64,
    pub symbol: String,
    pub strategy: String,
    pub followed_direction: SignalDirection,
    pub opposite_price: f64,
    pub detected_at: DateTime<Utc>,
    pub notified: bool,
}

/// A followed record whose evaluation failed to persist
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub followed_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub active_count: usize,
    pub signals_scanned: usize,
    pub detections: Vec<Detection>,
    pub failures: Vec<RecordFailure>,
    pub notification_failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleReport {
    /// Nothing to monitor
    pub fn idle() -> Self {
        Self {
            outcome: CycleOutcome::Success,
            active_count: 0,
            signals_scanned: 0,
            detections: Vec::new(),
            failures: Vec::new(),
            notification_failures: 0,
            error: None,
        }
    }

    /// The cycle stopped before evaluating any record
    pub fn aborted(outcome: CycleOutcome, active_count: usize, error: impl Into<String>) -> Self {
        Self {
            outcome,
            active_count,
            error: Some(error.into()),
            ..Self::idle()
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.outcome == CycleOutcome::Retry
    }
}
