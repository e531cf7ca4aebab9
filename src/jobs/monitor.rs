//! Opposite-signal detection over all active followed signals.
//!
//! One cycle loads the active records, runs a single broad scan, and checks
//! every record against that same snapshot. A record is latched at most once;
//! only the call that sets the latch sends an alert.

use crate::config::MonitorConfig;
use crate::error::{NotifyError, RepositoryError};
use crate::jobs::context::MonitorContext;
use crate::jobs::types::{CycleOutcome, CycleReport, Detection, RecordFailure};
use crate::models::{sort_newest_first, FollowedSignal, ScanRequest, Signal};
use crate::services::Alert;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct SignalMonitor {
    ctx: Arc<MonitorContext>,
    scan_request: ScanRequest,
    notify_timeout: Duration,
}

/// Outcome for a cycle that failed on a repository call before the
/// per-record loop.
fn outcome_for(error: &RepositoryError) -> CycleOutcome {
    match error {
        RepositoryError::Transport(_) | RepositoryError::Persistence(_) => CycleOutcome::Retry,
        RepositoryError::Remote(_)
        | RepositoryError::DuplicateFollow(_)
        | RepositoryError::NotFound(_) => CycleOutcome::Failed,
    }
}

impl SignalMonitor {
    pub fn new(ctx: Arc<MonitorContext>, config: &MonitorConfig) -> Self {
        Self {
            ctx,
            scan_request: config.scan_request(),
            notify_timeout: config.notify_timeout,
        }
    }

    pub fn scan_request(&self) -> &ScanRequest {
        &self.scan_request
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();
        let report = self.evaluate().await;

        if let Some(metrics) = &self.ctx.metrics {
            metrics.monitor_cycles_total.inc();
            metrics
                .monitor_cycle_duration_seconds
                .observe(start.elapsed().as_secs_f64());
            if report.outcome != CycleOutcome::Success {
                metrics.monitor_cycle_failures_total.inc();
            }
            metrics
                .opposite_signals_detected_total
                .inc_by(report.detections.len() as u64);
            metrics
                .notification_failures_total
                .inc_by(report.notification_failures as u64);
        }

        info!(
            outcome = ?report.outcome,
            active = report.active_count,
            scanned = report.signals_scanned,
            detections = report.detections.len(),
            failures = report.failures.len(),
            duration_ms = start.elapsed().as_millis(),
            "SignalMonitor: cycle finished with {} detections",
            report.detections.len()
        );
        report
    }

    async fn evaluate(&self) -> CycleReport {
        let repository = &self.ctx.repository;

        let active = match repository.active_followed_signals().await {
            Ok(active) => active,
            Err(e) => {
                error!(error = %e, "SignalMonitor: failed to load active followed signals");
                return CycleReport::aborted(outcome_for(&e), 0, e.to_string());
            }
        };

        if let Some(metrics) = &self.ctx.metrics {
            metrics.followed_signals_active.set(active.len() as i64);
        }

        if active.is_empty() {
            debug!("SignalMonitor: no active followed signals, skipping scan");
            return CycleReport::idle();
        }

        let response = match repository.perform_scan(&self.scan_request).await {
            Ok(response) => response,
            Err(e) => {
                let outcome = outcome_for(&e);
                warn!(
                    error = %e,
                    outcome = ?outcome,
                    active = active.len(),
                    "SignalMonitor: scan failed, no records evaluated"
                );
                return CycleReport::aborted(outcome, active.len(), e.to_string());
            }
        };

        let mut signals = response.signals;
        sort_newest_first(&mut signals);

        let mut report = CycleReport {
            active_count: active.len(),
            signals_scanned: signals.len(),
            ..CycleReport::idle()
        };

        let mut pending = Vec::new();
        for followed in &active {
            if followed.opposite_signal_detected {
                continue;
            }
            let Some(opposite) = signals.iter().find(|s| followed.is_contradicted_by(s)) else {
                continue;
            };

            match self.latch(followed, opposite).await {
                Ok(Some(latched)) => pending.push(latched),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        followed_id = followed.id,
                        symbol = %followed.symbol,
                        error = %e,
                        "SignalMonitor: failed to persist detection for {}",
                        followed.symbol
                    );
                    report.failures.push(RecordFailure {
                        followed_id: followed.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        for detection in self.deliver(pending).await {
            if !detection.notified {
                report.notification_failures += 1;
            }
            report.detections.push(detection);
        }

        if !report.failures.is_empty() {
            report.outcome = CycleOutcome::Retry;
        }
        report
    }

    /// Persist the latch. Returns the alert to send if this call set it.
    async fn latch(
        &self,
        followed: &FollowedSignal,
        opposite: &Signal,
    ) -> Result<Option<(Detection, Alert)>, RepositoryError> {
        let detected_at = Utc::now();
        let latched = self
            .ctx
            .repository
            .mark_opposite_signal_detected(followed.id, opposite.price, detected_at)
            .await?;

        if !latched {
            debug!(
                followed_id = followed.id,
                "SignalMonitor: followed signal {} already latched",
                followed.id
            );
            return Ok(None);
        }

        info!(
            followed_id = followed.id,
            symbol = %followed.symbol,
            strategy = %followed.strategy,
            direction = %followed.direction,
            opposite_price = opposite.price,
            "SignalMonitor: opposite signal for {} {}, {} required",
            followed.symbol,
            followed.strategy,
            followed.required_action()
        );

        let detection = Detection {
            followed_id: followed.id,
            symbol: followed.symbol.clone(),
            strategy: followed.strategy.clone(),
            followed_direction: followed.direction,
            opposite_price: opposite.price,
            detected_at,
            notified: false,
        };
        Ok(Some((detection, Alert::opposite_signal(followed, opposite))))
    }

    /// Sends every alert of the cycle at once, each bounded by
    /// `notify_timeout`, so the cycle waits at most one timeout for delivery.
    async fn deliver(&self, pending: Vec<(Detection, Alert)>) -> Vec<Detection> {
        let mut deliveries = JoinSet::new();
        let mut detections = Vec::with_capacity(pending.len());

        for (index, (detection, alert)) in pending.into_iter().enumerate() {
            let notifier = self.ctx.notifier.clone();
            let limit = self.notify_timeout;
            deliveries.spawn(async move {
                let result = match tokio::time::timeout(limit, notifier.notify(alert)).await {
                    Ok(result) => result,
                    Err(_) => Err(NotifyError::Timeout(limit.as_millis() as u64)),
                };
                (index, result)
            });
            detections.push(detection);
        }

        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((index, Ok(()))) => detections[index].notified = true,
                Ok((index, Err(e))) => warn!(
                    followed_id = detections[index].followed_id,
                    error = %e,
                    "SignalMonitor: alert delivery failed for {}",
                    detections[index].symbol
                ),
                Err(e) => error!(error = %e, "SignalMonitor: alert delivery task failed"),
            }
        }
        detections
    }
}
