//! Cron-based scheduler for the monitor cycle

use crate::config::MonitorConfig;
use crate::error::ConfigError;
use crate::jobs::{CycleReport, SignalMonitor};
use crate::repository::SignalRepository;
use backon::{ExponentialBuilder, Retryable};
use cron::Schedule;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Result of one scheduled or manual run
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerRun {
    /// The cycle ran; retries included.
    Completed(CycleReport),
    /// Another run was still in flight.
    SkippedBusy,
    /// The signal service was unreachable.
    SkippedOffline,
}

/// Runs the monitor on a fixed interval, at most one run in flight, only
/// when the signal service answers its health check.
pub struct MonitorScheduler {
    monitor: Arc<SignalMonitor>,
    repository: Arc<SignalRepository>,
    schedule: Schedule,
    max_retries: usize,
    min_retry_delay: Duration,
    in_flight: Arc<AtomicBool>,
    handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

/// Cron format: second minute hour day month weekday.
///
/// Only intervals that tile an hour (divisors of 60) or a day (whole hours
/// dividing 24) keep a constant spacing across the hour and day rollover.
pub fn cron_expression(interval_minutes: u64) -> Result<String, ConfigError> {
    let invalid = |message: String| ConfigError::Invalid {
        key: "MONITOR_INTERVAL_MINUTES",
        message,
    };

    match interval_minutes {
        0 => Err(invalid("scheduler disabled: interval is 0".to_string())),
        m if m < 60 && 60 % m == 0 => Ok(format!("0 */{} * * * *", m)),
        m if m % 60 == 0 && 24 % (m / 60) == 0 => Ok(format!("0 0 */{} * * *", m / 60)),
        m => Err(invalid(format!(
            "{} does not divide an hour or a day evenly",
            m
        ))),
    }
}

/// Clears the in-flight flag when the run ends, cancelled or not.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MonitorScheduler {
    pub fn new(
        monitor: Arc<SignalMonitor>,
        repository: Arc<SignalRepository>,
        config: &MonitorConfig,
    ) -> Result<Self, ConfigError> {
        let cron_expr = cron_expression(config.interval_minutes)?;
        let schedule = Schedule::from_str(&cron_expr).map_err(|e| ConfigError::Invalid {
            key: "MONITOR_INTERVAL_MINUTES",
            message: format!("invalid cron expression '{}': {}", cron_expr, e),
        })?;

        info!(
            interval_minutes = config.interval_minutes,
            cron = %cron_expr,
            "MonitorScheduler: created with interval {}m (cron: {})",
            config.interval_minutes,
            cron_expr
        );

        Ok(Self {
            monitor,
            repository,
            schedule,
            max_retries: config.max_retries,
            min_retry_delay: Duration::from_secs(2),
            in_flight: Arc::new(AtomicBool::new(false)),
            handle: Arc::new(RwLock::new(None)),
        })
    }

    /// Base delay between retries of a `Retry` cycle
    pub fn with_min_retry_delay(mut self, delay: Duration) -> Self {
        self.min_retry_delay = delay;
        self
    }

    /// Run one gated, single-flight cycle now.
    pub async fn trigger_now(&self) -> SchedulerRun {
        run_once(
            &self.monitor,
            &self.repository,
            &self.in_flight,
            self.max_retries,
            self.min_retry_delay,
        )
        .await
    }

    pub async fn start(&self) {
        let monitor = self.monitor.clone();
        let repository = self.repository.clone();
        let schedule = self.schedule.clone();
        let in_flight = self.in_flight.clone();
        let max_retries = self.max_retries;
        let min_retry_delay = self.min_retry_delay;

        let handle = tokio::spawn(async move {
            info!("MonitorScheduler: started, waiting for cron schedule...");

            loop {
                let mut upcoming = schedule.upcoming(chrono::Utc);
                if let Some(next_tick) = upcoming.next() {
                    let now = chrono::Utc::now();
                    if next_tick > now {
                        let duration = (next_tick - now).to_std().unwrap_or_default();
                        tokio::time::sleep(duration).await;
                    }
                } else {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    continue;
                }

                debug!("MonitorScheduler: cron tick");
                match run_once(&monitor, &repository, &in_flight, max_retries, min_retry_delay).await {
                    SchedulerRun::Completed(report) => debug!(
                        outcome = ?report.outcome,
                        "MonitorScheduler: scheduled run completed"
                    ),
                    SchedulerRun::SkippedBusy => {
                        warn!("MonitorScheduler: previous run still in flight, tick skipped")
                    }
                    SchedulerRun::SkippedOffline => {
                        info!("MonitorScheduler: signal service offline, tick skipped")
                    }
                }
            }
        });

        let mut h = self.handle.write().await;
        if let Some(previous) = h.replace(handle) {
            previous.abort();
        }
        info!("MonitorScheduler: started successfully");
    }

    pub async fn stop(&self) {
        let mut handle = self.handle.write().await;
        if let Some(h) = handle.take() {
            h.abort();
            info!("MonitorScheduler: stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        let handle = self.handle.read().await;
        handle.is_some()
    }
}

async fn run_once(
    monitor: &SignalMonitor,
    repository: &SignalRepository,
    in_flight: &Arc<AtomicBool>,
    max_retries: usize,
    min_retry_delay: Duration,
) -> SchedulerRun {
    if in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return SchedulerRun::SkippedBusy;
    }
    let _guard = InFlight(in_flight.clone());

    match repository.check_api_health().await {
        Ok(true) => {}
        Ok(false) => return SchedulerRun::SkippedOffline,
        Err(e) => {
            debug!(error = %e, "MonitorScheduler: health check failed");
            return SchedulerRun::SkippedOffline;
        }
    }

    let backoff = ExponentialBuilder::default()
        .with_min_delay(min_retry_delay)
        .with_max_delay(min_retry_delay.saturating_mul(16))
        .with_max_times(max_retries);

    let result = (move || async move {
        let report = monitor.run_cycle().await;
        if report.is_retryable() {
            Err(report)
        } else {
            Ok(report)
        }
    })
    .retry(backoff)
    .sleep(tokio::time::sleep)
    .notify(|report: &CycleReport, delay: Duration| {
        warn!(
            error = ?report.error,
            failures = report.failures.len(),
            delay_ms = delay.as_millis(),
            "MonitorScheduler: cycle needs retry, retrying in {:?}",
            delay
        );
    })
    .await;

    match result {
        Ok(report) => SchedulerRun::Completed(report),
        Err(report) => {
            error!(
                error = ?report.error,
                retries = max_retries,
                "MonitorScheduler: cycle still failing after {} retries",
                max_retries
            );
            SchedulerRun::Completed(report)
        }
    }
}
